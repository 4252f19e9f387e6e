//! 记忆层：单次请求内的对话状态（无跨请求持久化）

pub mod conversation;

pub use conversation::{ConversationState, Message, Role, ToolInvocation};
