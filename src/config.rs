//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DRIA__*` 覆盖（双下划线表示嵌套，如 `DRIA__APP__MODE=interactive`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::state::{DispatchPolicy, TurnLimits};
use crate::tools::database::IN_MEMORY;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// 运行模式：test 依次跑预设问题；interactive 读标准输入
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Test,
    Interactive,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub mode: RunMode,
    /// 写进 system prompt 与回复中的医院名
    #[serde(default = "default_hospital_name")]
    pub hospital_name: String,
    /// SQLite 路径；":memory:" 为内存库
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// test 模式下依次提交的问题
    #[serde(default = "default_test_queries")]
    pub test_queries: Vec<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            mode: RunMode::default(),
            hospital_name: default_hospital_name(),
            database_path: default_database_path(),
            test_queries: default_test_queries(),
        }
    }
}

fn default_app_name() -> String {
    "Dr. IA".to_string()
}

fn default_hospital_name() -> String {
    "Hospital Santa Clara".to_string()
}

fn default_database_path() -> String {
    IN_MEMORY.to_string()
}

fn default_test_queries() -> Vec<String> {
    vec![
        "Which medical specialties are available at the hospital?".to_string(),
        "List all doctors and their specialties.".to_string(),
        "I would like to schedule an appointment with a cardiologist tomorrow at 10:00.".to_string(),
    ]
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：mock / openai（openai 指任意 OpenAI 兼容端点，包括本地 vLLM）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 输出清理时移除的结束 token
    #[serde(default = "default_eos_tokens")]
    pub eos_tokens: Vec<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            eos_tokens: default_eos_tokens(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "qwen3-1.7b-medical".to_string()
}

fn default_eos_tokens() -> Vec<String> {
    crate::react::extractor::DEFAULT_EOS_TOKENS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次生成超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [agent] 段：轮次上限与分发策略
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_reanalysis")]
    pub max_reanalysis: usize,
    #[serde(default)]
    pub dispatch_policy: DispatchPolicy,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_reanalysis: default_max_reanalysis(),
            dispatch_policy: DispatchPolicy::default(),
        }
    }
}

impl AgentSection {
    pub fn limits(&self) -> TurnLimits {
        TurnLimits {
            max_turns: self.max_turns.max(1),
            max_reanalysis: self.max_reanalysis,
            policy: self.dispatch_policy,
        }
    }
}

fn default_max_turns() -> usize {
    4
}

fn default_max_reanalysis() -> usize {
    1
}

/// [tools] 段：工具超时与并发
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_concurrent_tools: default_max_concurrent_tools(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_tools() -> usize {
    4
}

/// 从默认路径 config/default.toml（或 ../config/default.toml）、可选的显式文件与 DRIA__* 环境变量加载配置
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DRIA")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
