//! Dr. IA - 医院助理
//!
//! 入口：初始化日志、加载配置、构建编排器，按 [app].mode 运行，退出前输出遥测汇总。

use std::sync::Arc;

use anyhow::Context;
use dria::agent::{run_interactive, run_scripted};
use dria::config::{load_config, AppConfig, RunMode};
use dria::observability::{self, InMemoryTelemetry, TelemetrySink};
use dria::AgentBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let mode = cfg.app.mode;
    let hospital = cfg.app.hospital_name.clone();
    let queries = cfg.app.test_queries.clone();

    let telemetry = Arc::new(InMemoryTelemetry::new());
    let orchestrator = AgentBuilder::new(cfg)
        .with_system_prompt_from_file()
        .build(telemetry.clone())
        .context("Failed to build orchestrator")?;

    match mode {
        RunMode::Test => {
            run_scripted(&orchestrator, &queries).await;
        }
        RunMode::Interactive => {
            run_interactive(&orchestrator, &hospital)
                .await
                .context("Interactive session failed")?;
        }
    }

    let summary = serde_json::to_string_pretty(&telemetry.summary())?;
    println!("\n📊 Session metrics:\n{summary}");
    Ok(())
}
