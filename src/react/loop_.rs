//! 编排主循环
//!
//! Start -> Decide -> (Generate | Dispatch | Respond) -> ... -> End。
//! Decide 只看最新消息决定下一步；Dispatch 后按 DispatchPolicy 直接合成回复或交回模型。
//! 模型调用次数与失败后的重新分析次数都有上限，用尽时尽力合成一条回复，循环必然结束。

use std::time::Instant;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::core::state::{route, DispatchPolicy, OutcomeStatus, Route, Stage, TurnLimits, TurnOutcome};
use crate::core::AgentError;
use crate::memory::{ConversationState, Message};
use crate::observability::{TelemetrySink, STAGE_CALL_MODEL, STAGE_EXECUTE_TOOLS, STAGE_SYNTHESIZE};
use crate::react::{Planner, Synthesizer};
use crate::tools::{Dispatcher, ToolResult};

/// 单次请求的循环配置
pub struct TurnSession<'a> {
    pub planner: &'a Planner,
    pub dispatcher: &'a Dispatcher,
    pub synthesizer: &'a Synthesizer,
    pub telemetry: &'a dyn TelemetrySink,
    pub limits: TurnLimits,
    pub cancel_token: CancellationToken,
}

impl<'a> TurnSession<'a> {
    pub fn new(
        planner: &'a Planner,
        dispatcher: &'a Dispatcher,
        synthesizer: &'a Synthesizer,
        telemetry: &'a dyn TelemetrySink,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            synthesizer,
            telemetry,
            limits: TurnLimits::default(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_limits(mut self, limits: TurnLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }
}

/// 旁路记录模型调用次数，出错时编排器据此上报
pub const TURNS_KEY: &str = "turns";

/// 从 state 的最新消息开始推进，直到产出最终回复
pub async fn run_turns(
    session: &TurnSession<'_>,
    state: &mut ConversationState,
) -> Result<TurnOutcome, AgentError> {
    let limits = session.limits;
    let telemetry = session.telemetry;
    let mut stage = Stage::Start;
    let mut turns = 0usize;
    let mut reanalysis = 0usize;
    let mut last_results: Vec<ToolResult> = Vec::new();
    let mut status = OutcomeStatus::Completed;
    let mut answer = String::new();

    loop {
        stage = match stage {
            Stage::Start => Stage::Decide,

            Stage::Decide => {
                if session.cancel_token.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                let latest = state
                    .last()
                    .ok_or_else(|| AgentError::Fatal("conversation is empty".to_string()))?;
                match route(latest)? {
                    Route::Dispatch => Stage::Dispatch,
                    Route::Respond => Stage::Respond,
                    Route::Generate if turns >= limits.max_turns => {
                        tracing::warn!(turns, "maximum turns reached, synthesizing best-effort answer");
                        let text = if last_results.is_empty() {
                            format!(
                                "Sorry, I could not finish your request within {} steps. Please try rephrasing it.",
                                limits.max_turns
                            )
                        } else {
                            synthesize(session, &last_results, state, true)
                        };
                        state.push(Message::assistant(text))?;
                        status = OutcomeStatus::MaxTurnsReached;
                        Stage::Decide
                    }
                    Route::Generate => {
                        turns += 1;
                        state.telemetry_data_mut().insert(TURNS_KEY.to_string(), json!(turns));
                        let started = Instant::now();
                        let decided = session.planner.decide(state.messages(), &session.cancel_token).await;
                        telemetry.record_stage(STAGE_CALL_MODEL, started.elapsed(), decided.is_ok());
                        state.push(decided?)?;
                        Stage::Decide
                    }
                }
            }

            Stage::Dispatch => {
                let invocations = state
                    .last()
                    .map(|m| m.tool_calls().to_vec())
                    .unwrap_or_default();
                if invocations.is_empty() {
                    return Err(AgentError::Fatal("dispatch without tool calls".to_string()));
                }

                let started = Instant::now();
                let outcome = session.dispatcher.dispatch(&invocations).await;
                telemetry.record_stage(STAGE_EXECUTE_TOOLS, started.elapsed(), outcome.all_succeeded);
                for message in outcome.tool_messages {
                    state.push(message)?;
                }
                last_results = outcome.results;

                match limits.policy {
                    DispatchPolicy::SynthesizeOnSuccess if outcome.all_succeeded => {
                        let text = synthesize(session, &last_results, state, false);
                        state.push(Message::assistant(text))?;
                        status = OutcomeStatus::Synthesized;
                    }
                    DispatchPolicy::SynthesizeOnSuccess => {
                        reanalysis += 1;
                        if reanalysis > limits.max_reanalysis {
                            tracing::warn!(reanalysis, "tools keep failing, synthesizing best-effort answer");
                            let text = synthesize(session, &last_results, state, true);
                            state.push(Message::assistant(text))?;
                            status = OutcomeStatus::ReanalysisExhausted;
                        } else {
                            tracing::info!(reanalysis, "tool failure handed back to the model");
                        }
                    }
                    DispatchPolicy::AlwaysLoop => {}
                }
                Stage::Decide
            }

            Stage::Respond => {
                answer = state.last().map(|m| m.content().to_string()).unwrap_or_default();
                Stage::End
            }

            Stage::End => break,
        };
    }

    Ok(TurnOutcome {
        answer,
        status,
        turns,
        messages: state.messages().to_vec(),
    })
}

fn synthesize(
    session: &TurnSession<'_>,
    results: &[ToolResult],
    state: &ConversationState,
    best_effort: bool,
) -> String {
    let started = Instant::now();
    let text = if best_effort {
        session.synthesizer.synthesize_best_effort(results, state)
    } else {
        session.synthesizer.synthesize(results, state)
    };
    session
        .telemetry
        .record_stage(STAGE_SYNTHESIZE, started.elapsed(), true);
    text
}
