//! 状态定义：编排阶段、路由规则、轮次上限与请求结果
//!
//! 路由只看最新一条消息：user / tool -> 调用模型；带工具调用的 assistant -> 分发；
//! 其余 assistant -> 结束。其他情况是未定义迁移，直接报 Fatal。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Message;

/// 编排阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Decide,
    Dispatch,
    Respond,
    End,
}

/// 下一步该做什么
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// 调用模型
    Generate,
    /// 执行工具
    Dispatch,
    /// 回复用户
    Respond,
}

pub fn route(latest: &Message) -> Result<Route, AgentError> {
    match latest {
        Message::User { .. } | Message::Tool { .. } => Ok(Route::Generate),
        Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => Ok(Route::Dispatch),
        Message::Assistant { .. } => Ok(Route::Respond),
        Message::System { .. } => Err(AgentError::Fatal(
            "no transition defined after a system message".to_string(),
        )),
    }
}

/// 工具执行成功后的处理方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// 全部成功则直接合成回复；有失败则让模型重新分析（次数有限）
    #[default]
    SynthesizeOnSuccess,
    /// 总是把结果交回模型，由轮次上限兜底
    AlwaysLoop,
}

/// 单次请求的轮次限制
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnLimits {
    /// 模型调用次数上限
    pub max_turns: usize,
    /// 工具失败后允许模型重新分析的次数
    pub max_reanalysis: usize,
    pub policy: DispatchPolicy,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_turns: 4,
            max_reanalysis: 1,
            policy: DispatchPolicy::default(),
        }
    }
}

/// 请求的结束方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// 模型直接给出文本回复
    Completed,
    /// 由工具结果合成回复
    Synthesized,
    /// 工具持续失败，重新分析次数用尽后尽力合成
    ReanalysisExhausted,
    /// 达到轮次上限后尽力合成
    MaxTurnsReached,
    /// 出错后返回致歉
    Failed,
    Cancelled,
}

/// 一次请求的结果
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub status: OutcomeStatus,
    /// 模型调用次数
    pub turns: usize,
    pub messages: Vec<Message>,
}
