//! 编排器：单次用户请求的入口
//!
//! 为每个请求建立新的对话状态（system prompt + 用户输入），驱动主循环，
//! 任何终止性错误都由 RecoveryEngine 转成致歉回复；handle 从不返回错误。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::state::{OutcomeStatus, TurnLimits, TurnOutcome};
use crate::core::{RecoveryAction, RecoveryEngine};
use crate::memory::ConversationState;
use crate::observability::TelemetrySink;
use crate::react::loop_::TURNS_KEY;
use crate::react::{run_turns, Planner, Synthesizer, TurnSession};
use crate::tools::Dispatcher;

pub struct Orchestrator {
    planner: Planner,
    dispatcher: Dispatcher,
    synthesizer: Synthesizer,
    recovery: RecoveryEngine,
    telemetry: Arc<dyn TelemetrySink>,
    system_prompt: String,
    limits: TurnLimits,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        dispatcher: Dispatcher,
        synthesizer: Synthesizer,
        telemetry: Arc<dyn TelemetrySink>,
        limits: TurnLimits,
    ) -> Self {
        let system_prompt = planner.base_system_prompt().to_string();
        Self {
            planner,
            dispatcher,
            synthesizer,
            recovery: RecoveryEngine::new(),
            telemetry,
            system_prompt,
            limits,
        }
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    pub fn limits(&self) -> TurnLimits {
        self.limits
    }

    pub async fn handle(&self, user_input: &str) -> TurnOutcome {
        self.handle_with_cancel(user_input, CancellationToken::new())
            .await
    }

    /// 处理一次请求；cancel 被触发时尽快结束并返回 Cancelled
    pub async fn handle_with_cancel(&self, user_input: &str, cancel: CancellationToken) -> TurnOutcome {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("request", id = %request_id);
        self.telemetry.record_request();

        let mut state = ConversationState::for_request(&self.system_prompt, user_input);
        state
            .telemetry_data_mut()
            .insert("request_id".to_string(), serde_json::json!(request_id));

        let session = TurnSession::new(
            &self.planner,
            &self.dispatcher,
            &self.synthesizer,
            self.telemetry.as_ref(),
        )
        .with_limits(self.limits)
        .with_cancel_token(cancel);

        let result = run_turns(&session, &mut state).instrument(span.clone()).await;
        match result {
            Ok(outcome) => {
                tracing::info!(parent: &span, status = ?outcome.status, turns = outcome.turns, "request finished");
                outcome
            }
            Err(err) => {
                let turns = state
                    .telemetry_data()
                    .get(TURNS_KEY)
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                let (answer, status) = match self.recovery.handle(&err) {
                    RecoveryAction::Apologize(text) => {
                        tracing::error!(parent: &span, error = %err, turns, "request failed");
                        self.telemetry.record_error();
                        (text, OutcomeStatus::Failed)
                    }
                    RecoveryAction::Abort(text) => {
                        tracing::info!(parent: &span, turns, "request cancelled");
                        (text, OutcomeStatus::Cancelled)
                    }
                };
                TurnOutcome {
                    answer,
                    status,
                    turns,
                    messages: state.into_messages(),
                }
            }
        }
    }
}
