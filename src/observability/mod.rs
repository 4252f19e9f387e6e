//! 可观测性：tracing 日志初始化 + 编排遥测

pub mod telemetry;

pub use telemetry::{
    InMemoryTelemetry, MetricsSummary, NoopTelemetry, StageSummary, TelemetrySink,
    STAGE_CALL_MODEL, STAGE_EXECUTE_TOOLS, STAGE_SYNTHESIZE,
};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志：默认 info，可通过 RUST_LOG 覆盖；日志写 stderr，stdout 留给对话输出
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
