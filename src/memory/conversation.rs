//! 单次请求的对话状态：消息、工具调用
//!
//! Message 按角色拆成枚举变体，tool 消息必须带 tool_call_id，缺少关联 ID 的 tool 消息无法构造；
//! ConversationState 只允许追加，追加 tool 消息时校验其 ID 对应本轮一个尚未被消费的工具调用。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// 消息角色（与模型对话模板一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 一次结构化工具调用；id 由解析器生成，从不信任模型给出的 ID
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        /// 产生该结果的工具名
        name: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// 带工具调用的 assistant 消息；content 可为空，也可能携带保留下来的推理文本
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            name: name.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolInvocation] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

/// 单次用户请求的对话状态：消息序列（仅追加）+ 透传给遥测的旁路数据
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    telemetry_data: Map<String, Value>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一次请求建立初始状态：注入 system prompt + 用户消息
    pub fn for_request(system_prompt: &str, user_input: &str) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_input)],
            telemetry_data: Map::new(),
        }
    }

    /// 追加消息；tool 消息必须对应本轮最近一次工具调用中尚未被消费的 ID
    pub fn push(&mut self, message: Message) -> Result<(), AgentError> {
        if let Message::Tool { tool_call_id, .. } = &message {
            self.check_tool_call_id(tool_call_id)?;
        }
        self.messages.push(message);
        Ok(())
    }

    fn check_tool_call_id(&self, id: &str) -> Result<(), AgentError> {
        let Some(pos) = self.messages.iter().rposition(Message::has_tool_calls) else {
            return Err(AgentError::Fatal(format!(
                "tool result '{id}' has no preceding tool call"
            )));
        };
        let issued = self.messages[pos]
            .tool_calls()
            .iter()
            .filter(|c| c.id == id)
            .count();
        let consumed = self.messages[pos + 1..]
            .iter()
            .filter(|m| matches!(m, Message::Tool { tool_call_id, .. } if tool_call_id == id))
            .count();
        if issued == 1 && consumed == 0 {
            Ok(())
        } else {
            Err(AgentError::Fatal(format!(
                "tool result '{id}' does not match exactly one pending tool call (issued {issued}, consumed {consumed})"
            )))
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 最近一条携带工具调用的 assistant 消息（触发本轮分发的那一条）
    pub fn triggering_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.has_tool_calls())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn telemetry_data(&self) -> &Map<String, Value> {
        &self.telemetry_data
    }

    pub fn telemetry_data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.telemetry_data
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolInvocation {
        ToolInvocation::new(id, "sql_query", Map::new())
    }

    #[test]
    fn test_message_serde_uses_role_tag() {
        let msg = Message::tool("sql_query_call_0", "sql_query", "[]");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "sql_query_call_0");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_tool_message_without_id_is_rejected_by_serde() {
        let raw = serde_json::json!({"role": "tool", "content": "x", "name": "sql_query"});
        assert!(serde_json::from_value::<Message>(raw).is_err());
    }

    #[test]
    fn test_accessors() {
        let msg = Message::assistant_with_tools("thinking", vec![call("a")]);
        assert_eq!(msg.role(), Role::Assistant);
        assert_eq!(msg.content(), "thinking");
        assert!(msg.has_tool_calls());
        assert!(!Message::user("hi").has_tool_calls());
    }

    #[test]
    fn test_push_tool_message_matches_pending_call() {
        let mut state = ConversationState::for_request("sys", "hi");
        state
            .push(Message::assistant_with_tools("", vec![call("a"), call("b")]))
            .unwrap();
        state.push(Message::tool("b", "sql_query", "[]")).unwrap();
        state.push(Message::tool("a", "sql_query", "[]")).unwrap();
        assert_eq!(state.len(), 5);
    }

    #[test]
    fn test_push_tool_message_rejects_unknown_or_consumed_id() {
        let mut state = ConversationState::for_request("sys", "hi");
        assert!(matches!(
            state.push(Message::tool("a", "sql_query", "[]")),
            Err(AgentError::Fatal(_))
        ));

        state
            .push(Message::assistant_with_tools("", vec![call("a")]))
            .unwrap();
        assert!(state.push(Message::tool("zzz", "sql_query", "[]")).is_err());
        state.push(Message::tool("a", "sql_query", "[]")).unwrap();
        assert!(state.push(Message::tool("a", "sql_query", "[]")).is_err());
    }

    #[test]
    fn test_triggering_assistant_is_latest_with_calls() {
        let mut state = ConversationState::for_request("sys", "hi");
        state
            .push(Message::assistant_with_tools("first", vec![call("a")]))
            .unwrap();
        state.push(Message::tool("a", "sql_query", "[]")).unwrap();
        state.push(Message::assistant("done")).unwrap();
        assert_eq!(state.triggering_assistant().map(Message::content), Some("first"));
    }
}
