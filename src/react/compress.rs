//! 上下文压缩
//!
//! 小模型上下文窗口很窄：超过 MAX_CONTEXT_MESSAGES 条时只保留第一条 system、最近一条 user、
//! 最近一条 assistant（按此顺序）。不调用模型，不做摘要；输出长度不超过阈值，因而幂等。

use crate::memory::{Message, Role};

pub const MAX_CONTEXT_MESSAGES: usize = 3;

pub fn compress(history: &[Message]) -> Vec<Message> {
    if history.len() <= MAX_CONTEXT_MESSAGES {
        return history.to_vec();
    }

    let first = |role: Role| history.iter().find(|m| m.role() == role);
    let latest = |role: Role| history.iter().rev().find(|m| m.role() == role);

    [first(Role::System), latest(Role::User), latest(Role::Assistant)]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
}
