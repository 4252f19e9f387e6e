//! Planner：调用模型并把原始输出变成一条 assistant 消息
//!
//! 压缩历史 -> 确保有 system prompt -> 渲染 prompt -> 生成（超时 / 取消）-> 解析工具调用。
//! 有工具调用时 content 只保留带前缀的推理文本；否则 content 为清理后的自由文本。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{render_prompt, GenerationRequest, LlmClient};
use crate::memory::{Message, Role};
use crate::react::compress::compress;
use crate::react::extractor::{reasoning_content, IntentExtractor};
use crate::tools::ToolSpec;

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    extractor: Arc<dyn IntentExtractor>,
    system_prompt: String,
    tools: Vec<ToolSpec>,
    timeout: Duration,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        extractor: Arc<dyn IntentExtractor>,
        system_prompt: impl Into<String>,
        tools: Vec<ToolSpec>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            extractor,
            system_prompt: system_prompt.into(),
            tools,
            timeout,
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 构造发给模型的请求；压缩后若丢了 system（历史里本就没有），补上基础 system prompt
    pub fn build_request(&self, history: &[Message]) -> GenerationRequest {
        let mut messages = compress(history);
        if !messages.iter().any(|m| m.role() == Role::System) {
            messages.insert(0, Message::system(self.system_prompt.clone()));
        }
        tracing::debug!(before = history.len(), after = messages.len(), "context compressed");
        let prompt = render_prompt(&messages, &self.tools);
        GenerationRequest {
            messages,
            tools: self.tools.clone(),
            prompt,
        }
    }

    /// 一次模型调用：返回要追加到对话中的 assistant 消息
    pub async fn decide(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message, AgentError> {
        let request = self.build_request(history);

        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.llm.generate(&request)) => match res {
                Ok(generated) => generated?,
                Err(_) => return Err(AgentError::GenerationTimeout(self.timeout.as_secs())),
            },
        };
        tracing::debug!(backend = self.llm.name(), chars = raw.len(), "model output received");

        Ok(self.interpret(&raw, &request.prompt))
    }

    fn interpret(&self, raw: &str, prompt: &str) -> Message {
        // 回显的 prompt 里有上一轮的 <tool_call> 块，必须先去掉再解析
        let generated = strip_prompt_echo(raw, prompt);
        let extraction = self.extractor.extract(generated);
        if extraction.rejected > 0 {
            tracing::warn!(rejected = extraction.rejected, "skipped malformed tool_call blocks");
        }

        if extraction.invocations.is_empty() {
            return Message::assistant(self.extractor.clean(generated, prompt));
        }

        let names: Vec<&str> = extraction.invocations.iter().map(|c| c.name.as_str()).collect();
        tracing::info!(tools = ?names, "model requested tools");
        let content = extraction
            .reasoning
            .as_deref()
            .map(reasoning_content)
            .unwrap_or_default();
        Message::assistant_with_tools(content, extraction.invocations)
    }
}

/// 本地模型 decode 全序列时输出以 prompt 开头；只取 prompt 之后新生成的部分
fn strip_prompt_echo<'a>(raw: &'a str, prompt: &str) -> &'a str {
    if prompt.is_empty() {
        return raw;
    }
    match raw.find(prompt) {
        Some(pos) => &raw[pos + prompt.len()..],
        None => raw,
    }
}
