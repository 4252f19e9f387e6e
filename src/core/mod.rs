//! 核心编排层：错误与恢复、状态与路由、编排器、构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use builder::{create_llm_from_config, AgentBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use state::{DispatchPolicy, OutcomeStatus, Route, Stage, TurnLimits, TurnOutcome};
