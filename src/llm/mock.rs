//! Mock LLM 客户端（无需 API / 本地模型）
//!
//! MockLlmClient 按关键词产出与本地模型同格式的原始文本（<think> 推理 + <tool_call> 块 + 结束 token），
//! 便于离线跑通整条编排链路；ScriptedLlmClient 按顺序返回预设输出，并记录收到的请求，供测试断言。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::llm::{GenerationRequest, LlmClient, LlmError};
use crate::memory::Message;

/// 关键词驱动的 Mock
#[derive(Debug, Default)]
pub struct MockLlmClient;

const SPECIALTIES_QUERY: &str = "SELECT specialty_name FROM SPECIALTIES ORDER BY specialty_name";
const DOCTORS_QUERY: &str = "SELECT d.person_name, s.specialty_name FROM DOCTORS d \
     JOIN SPECIALTIES s ON d.specialty_id = s.specialty_id ORDER BY d.person_name";

fn tool_call(thinking: &str, query: &str) -> String {
    let call = serde_json::json!({ "name": "sql_query", "arguments": { "query": query } });
    format!("<think>{thinking}</think>\n<tool_call>\n{call}\n</tool_call><|im_end|>")
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        // 压缩后的上下文不含 tool 消息；以带调用的 assistant 结尾说明上一轮工具没有给出可用结果
        if request.messages.last().is_some_and(Message::has_tool_calls) {
            return Ok("I was not able to complete that lookup with the information I have. \
                       Could you rephrase the question or give me more details, such as the doctor, \
                       your patient ID or the date and time?<|im_end|>"
                .to_string());
        }

        let question = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { content } => Some(content.to_lowercase()),
                _ => None,
            })
            .unwrap_or_default();

        let reply = if question.contains("doctor") || question.contains("médico") || question.contains("medico") {
            tool_call(
                "The user wants the medical staff. I will list every doctor with their specialty.",
                DOCTORS_QUERY,
            )
        } else if question.contains("specialt") || question.contains("especialidade") {
            tool_call(
                "The user is asking which specialties the hospital offers. I will read the SPECIALTIES table.",
                SPECIALTIES_QUERY,
            )
        } else if question.contains("schedule") || question.contains("appointment") || question.contains("agendar") {
            "<think>Scheduling needs the doctor id, the patient id and an exact date and time.</think>\n\
             I can book that for you. Please tell me your patient ID, the doctor (or specialty) you want \
             and the date and time in the format YYYY-MM-DD HH:MM:SS.<|im_end|>"
                .to_string()
        } else {
            "Hello! I am Dr. IA, the virtual assistant of the hospital. I can list our specialties \
             and doctors or book an appointment for you.<|im_end|>"
                .to_string()
        };
        Ok(reply)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：依次返回预设输出；脚本耗尽后返回 fallback（若有），否则报错
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    echo_prompt: bool,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// 每次都返回同一段输出
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            fallback: Some(response.into()),
            ..Self::default()
        }
    }

    /// 像本地 decode 全序列那样，把 prompt 原样拼在输出前
    pub fn with_prompt_echo(mut self) -> Self {
        self.echo_prompt = true;
        self
    }

    /// 已收到的请求（按时间顺序）
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| LlmError::Api("script exhausted".to_string()))?;

        if self.echo_prompt {
            Ok(format!("{}{}", request.prompt, next))
        } else {
            Ok(next)
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<Message>) -> GenerationRequest {
        GenerationRequest {
            messages,
            tools: Vec::new(),
            prompt: "PROMPT".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_emits_tool_call_for_specialties() {
        let out = MockLlmClient
            .generate(&request(vec![Message::user("Which specialties do you have?")]))
            .await
            .unwrap();
        assert!(out.contains("<tool_call>"));
        assert!(out.contains("SPECIALTIES"));
    }

    #[tokio::test]
    async fn test_mock_does_not_claim_success_after_tool_call() {
        let call = crate::memory::ToolInvocation::new("sql_query_call_0", "sql_query", serde_json::Map::new());
        let out = MockLlmClient
            .generate(&request(vec![
                Message::system("sys"),
                Message::user("doctors?"),
                Message::assistant_with_tools("", vec![call]),
            ]))
            .await
            .unwrap();
        assert!(!out.contains("<tool_call>"));
        assert!(out.contains("not able to complete"));
    }

    #[tokio::test]
    async fn test_scripted_order_and_exhaustion() {
        let client = ScriptedLlmClient::new(["one", "two"]).with_prompt_echo();
        let req = request(vec![Message::user("hi")]);
        assert_eq!(client.generate(&req).await.unwrap(), "PROMPTone");
        assert_eq!(client.generate(&req).await.unwrap(), "PROMPTtwo");
        assert!(client.generate(&req).await.is_err());
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_repeating() {
        let client = ScriptedLlmClient::repeating("again");
        let req = request(vec![Message::user("hi")]);
        for _ in 0..3 {
            assert_eq!(client.generate(&req).await.unwrap(), "again");
        }
    }
}
