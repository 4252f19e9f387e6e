//! LLM 层：客户端抽象、ChatML 渲染与实现（OpenAI 兼容 / Mock / 脚本化）

pub mod mock;
pub mod openai;
pub mod prompt;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use prompt::render_prompt;
pub use traits::{GenerationRequest, LlmClient, LlmError};
