//! Agent 构建器：统一的初始化逻辑
//!
//! 配置 -> 数据库 + 工具注册表 -> LLM 后端 -> system prompt -> Planner / Dispatcher / Synthesizer -> Orchestrator。
//! 测试可通过 with_llm / with_database 注入脚本化模型与独立的内存库。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::AppConfig;
use crate::core::Orchestrator;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::observability::TelemetrySink;
use crate::react::{Planner, SentinelExtractor, Synthesizer};
use crate::tools::{Dispatcher, HospitalDb, ScheduleAppointmentTool, SqlQueryTool, ToolRegistry};

/// 找不到 config/prompts/system.md 时使用的提示词
const DEFAULT_SYSTEM_PROMPT: &str = "You are Dr. IA, the virtual assistant of {hospital}. \
Answer questions about specialties, doctors and appointments. \
Use the available tools to read the hospital database or to book appointments; never invent data.";

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_endpoint = std::env::var("OPENAI_API_KEY").is_ok() || cfg.llm.base_url.is_some();

    if provider == "openai" && has_endpoint {
        tracing::info!(model = %cfg.llm.model, base_url = ?cfg.llm.base_url, "Using OpenAI-compatible LLM");
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        if provider != "mock" {
            tracing::warn!(provider = %provider, "No API key or base_url set, using Mock LLM");
        }
        Arc::new(MockLlmClient)
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    system_prompt: String,
    llm: Option<Arc<dyn LlmClient>>,
    database: Option<HospitalDb>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            llm: None,
            database: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 从 config/prompts/system.md 加载系统提示词；找不到时保留默认值
    pub fn with_system_prompt_from_file(mut self) -> Self {
        if let Some(prompt) = ["config/prompts/system.md", "../config/prompts/system.md"]
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
        {
            self.system_prompt = prompt;
        }
        self
    }

    /// 指定 LLM 后端（不再按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_database(mut self, db: HospitalDb) -> Self {
        self.database = Some(db);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    pub fn open_database(&self) -> anyhow::Result<HospitalDb> {
        if let Some(db) = &self.database {
            return Ok(db.clone());
        }
        let path = &self.config.app.database_path;
        HospitalDb::open(path).with_context(|| format!("Failed to open hospital database at {path}"))
    }

    pub fn build_tool_registry(&self, db: &HospitalDb) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(SqlQueryTool::new(db.clone()));
        tools.register(ScheduleAppointmentTool::new(db.clone()));
        tools
    }

    /// 系统提示词，{hospital} 替换为配置中的医院名
    pub fn build_system_prompt(&self) -> String {
        self.system_prompt
            .replace("{hospital}", &self.config.app.hospital_name)
    }

    pub fn build(self, telemetry: Arc<dyn TelemetrySink>) -> anyhow::Result<Orchestrator> {
        let db = self.open_database()?;
        let registry = Arc::new(self.build_tool_registry(&db));
        let llm = self.build_llm();
        let cfg = &self.config;

        let planner = Planner::new(
            llm,
            Arc::new(SentinelExtractor::new(cfg.llm.eos_tokens.clone())),
            self.build_system_prompt(),
            registry.specs(),
            Duration::from_secs(cfg.llm.timeouts.request),
        );
        let dispatcher = Dispatcher::new(
            registry,
            telemetry.clone(),
            cfg.tools.tool_timeout_secs,
            cfg.tools.max_concurrent_tools,
        );
        let synthesizer = Synthesizer::new(cfg.app.hospital_name.clone());

        tracing::info!(
            tools = ?dispatcher.registry().tool_names(),
            max_turns = cfg.agent.max_turns,
            policy = ?cfg.agent.dispatch_policy,
            "orchestrator ready"
        );
        Ok(Orchestrator::new(
            planner,
            dispatcher,
            synthesizer,
            telemetry,
            cfg.agent.limits(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopTelemetry;

    #[test]
    fn test_system_prompt_substitution() {
        let builder = AgentBuilder::new(AppConfig::default()).with_system_prompt("Welcome to {hospital}.");
        assert_eq!(builder.build_system_prompt(), "Welcome to Hospital Santa Clara.");
    }

    #[test]
    fn test_registry_has_both_tools() {
        let builder = AgentBuilder::new(AppConfig::default());
        let db = builder.open_database().unwrap();
        let names = builder.build_tool_registry(&db).tool_names();
        assert_eq!(names, vec!["schedule_appointment", "sql_query"]);
    }

    #[test]
    fn test_build_with_defaults() {
        let orchestrator = AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .build(Arc::new(NoopTelemetry))
            .unwrap();
        assert_eq!(orchestrator.limits().max_turns, 4);
    }
}
