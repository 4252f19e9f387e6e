//! LLM 客户端抽象
//!
//! 模型是一个纯文本生成器：输入渲染好的 prompt（以及结构化消息，供聊天式端点使用），输出一段原始文本。
//! 工具调用意图由 react::extractor 从文本中解析，客户端不关心。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request build failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("empty response")]
    EmptyResponse,
}

/// 一次生成请求
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// 压缩后的消息
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// 由 messages + tools 渲染出的完整 prompt（本地模型直接使用；也用于清理回显）
    pub prompt: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    /// 日志中展示的后端名
    fn name(&self) -> &str {
        "llm"
    }
}
