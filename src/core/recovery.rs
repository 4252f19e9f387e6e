//! 错误恢复引擎
//!
//! 将终止性的 AgentError 映射为 RecoveryAction，保证用户总能拿到一条回复。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：错误 -> 面向用户的致歉文本
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Cancelled => {
                RecoveryAction::Abort("The request was cancelled before it finished.".to_string())
            }
            AgentError::GenerationTimeout(secs) => RecoveryAction::Apologize(format!(
                "Sorry, the assistant took too long to answer (over {secs}s). Please try again in a moment."
            )),
            AgentError::Llm(e) => RecoveryAction::Apologize(format!(
                "Sorry, the language model is unavailable right now ({e}). Please try again later."
            )),
            AgentError::Fatal(_) => RecoveryAction::Apologize(
                "Sorry, something went wrong while handling your request. Please rephrase it and try again."
                    .to_string(),
            ),
            AgentError::ToolNotFound(_)
            | AgentError::ToolExecutionFailed { .. }
            | AgentError::ToolTimeout(_) => RecoveryAction::Apologize(format!(
                "Sorry, I could not complete your request: {err}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert!(matches!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort(_)));
    }

    #[test]
    fn test_recovery_generation_timeout() {
        let engine = RecoveryEngine::new();
        match engine.handle(&AgentError::GenerationTimeout(60)) {
            RecoveryAction::Apologize(msg) => assert!(msg.contains("60s")),
            other => panic!("Expected Apologize, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_llm_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::Api("503".to_string()));
        match engine.handle(&err) {
            RecoveryAction::Apologize(msg) => assert!(msg.contains("503")),
            other => panic!("Expected Apologize, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_fatal_hides_details() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Fatal("tool result 'x' has no preceding tool call".to_string());
        match engine.handle(&err) {
            RecoveryAction::Apologize(msg) => assert!(!msg.contains("tool result")),
            other => panic!("Expected Apologize, got {other:?}"),
        }
    }
}
