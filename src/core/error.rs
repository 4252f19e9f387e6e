//! 编排错误类型与恢复动作
//!
//! 工具相关错误只会变成 tool 消息内容（循环继续）；模型错误、超时、取消与非法状态迁移
//! 会终止本次请求，由 RecoveryEngine 转成面向用户的回复。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("tool '{0}' not found.")]
    ToolNotFound(String),

    #[error("tool '{tool}' failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("tool '{0}' timed out.")]
    ToolTimeout(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Model generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("Cancelled")]
    Cancelled,

    /// 未定义的状态迁移或对话不变量被破坏（不应出现，出现即终止本次请求）
    #[error("Fatal orchestration error: {0}")]
    Fatal(String),
}

impl AgentError {
    /// 写入 tool 消息的统一格式：以 "Error: " 开头，便于模型与合成器识别
    pub fn as_tool_content(&self) -> String {
        format!("Error: {self}")
    }
}

/// 恢复引擎根据错误类型给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以致歉文本结束本次请求，计入错误统计
    Apologize(String),
    /// 用户取消：返回简短说明，不计为错误
    Abort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_content() {
        let err = AgentError::ToolNotFound("fly".to_string());
        assert_eq!(err.as_tool_content(), "Error: tool 'fly' not found.");
    }

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = LlmError::EmptyResponse.into();
        assert!(matches!(err, AgentError::Llm(LlmError::EmptyResponse)));
    }
}
