pub mod database;
pub mod dispatcher;
pub mod registry;
pub mod scheduling;
pub mod schema;
pub mod sql_query;

pub use database::{HospitalDb, READ_TABLES};
pub use dispatcher::{DispatchOutcome, Dispatcher, ToolOutcome, ToolResult};
pub use registry::{Tool, ToolError, ToolRegistry, ToolSpec};
pub use scheduling::{ScheduleAppointmentTool, SCHEDULING_TOOL_NAME};
pub use schema::parameters_schema;
pub use sql_query::{SqlQueryTool, SQL_QUERY_TOOL_NAME};
