//! 工具分发器
//!
//! 一条 assistant 消息中的全部调用并发执行（Semaphore 限流），每个调用在独立任务中运行并施加超时，
//! 单个工具的失败、超时或 panic 只影响它自己的结果。结果按调用顺序返回，每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::memory::{Message, ToolInvocation};
use crate::observability::TelemetrySink;
use crate::tools::ToolRegistry;

/// 单次调用的结果类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok,
    ToolError,
    NotFound,
}

/// 单次调用的结果；raw_output 原样写入 tool 消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub tool_name: String,
    pub raw_output: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        self.outcome == ToolOutcome::Ok
    }
}

/// 一轮分发的产物
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// 与调用顺序一致
    pub results: Vec<ToolResult>,
    /// 每个调用恰好一条 tool 消息
    pub tool_messages: Vec<Message>,
    pub all_succeeded: bool,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    telemetry: Arc<dyn TelemetrySink>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        telemetry: Arc<dyn TelemetrySink>,
        timeout_secs: u64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            telemetry,
            timeout: Duration::from_secs(timeout_secs),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 单次调用的超时（测试中使用毫秒级超时）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, invocations: &[ToolInvocation]) -> DispatchOutcome {
        let results = join_all(invocations.iter().map(|inv| self.run_one(inv))).await;
        let tool_messages = results
            .iter()
            .map(|r| Message::tool(&r.invocation_id, &r.tool_name, &r.raw_output))
            .collect();
        let all_succeeded = results.iter().all(ToolResult::is_ok);
        DispatchOutcome {
            results,
            tool_messages,
            all_succeeded,
        }
    }

    async fn run_one(&self, inv: &ToolInvocation) -> ToolResult {
        let Some(tool) = self.registry.get(&inv.name) else {
            tracing::warn!(tool = %inv.name, id = %inv.id, "model requested an unregistered tool");
            return ToolResult {
                invocation_id: inv.id.clone(),
                tool_name: inv.name.clone(),
                raw_output: AgentError::ToolNotFound(inv.name.clone()).as_tool_content(),
                outcome: ToolOutcome::NotFound,
            };
        };
        self.telemetry.record_tool_call(&inv.name);

        // 信号量从不关闭；acquire 失败时不限流继续执行
        let _permit = self.permits.clone().acquire_owned().await.ok();
        let args = Value::Object(inv.arguments.clone());
        let preview = args_preview(&args);
        let start = Instant::now();

        let mut handle = tokio::spawn(async move { tool.invoke(args).await });
        let (outcome, label, raw_output) = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => (ToolOutcome::Ok, "ok", output),
            Ok(Ok(Err(e))) => (
                ToolOutcome::ToolError,
                "error",
                AgentError::ToolExecutionFailed {
                    tool: inv.name.clone(),
                    reason: e.to_string(),
                }
                .as_tool_content(),
            ),
            Ok(Err(join_err)) => (
                ToolOutcome::ToolError,
                "panicked",
                AgentError::ToolExecutionFailed {
                    tool: inv.name.clone(),
                    reason: format!("task aborted: {join_err}"),
                }
                .as_tool_content(),
            ),
            Err(_) => {
                handle.abort();
                (
                    ToolOutcome::ToolError,
                    "timeout",
                    AgentError::ToolTimeout(inv.name.clone()).as_tool_content(),
                )
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": inv.name,
            "id": inv.id,
            "ok": outcome == ToolOutcome::Ok,
            "outcome": label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ToolResult {
            invocation_id: inv.id.clone(),
            tool_name: inv.name.clone(),
            raw_output,
            outcome,
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{InMemoryTelemetry, NoopTelemetry};
    use crate::tools::{Tool, ToolError};
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        async fn invoke(&self, args: Value) -> Result<String, ToolError> {
            Ok(args.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn invoke(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::Failed("boom".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn invoke(&self, _args: Value) -> Result<String, ToolError> {
            panic!("tool bug");
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn invoke(&self, _args: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn dispatcher(telemetry: Arc<dyn TelemetrySink>) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register(Failing);
        registry.register(Panicking);
        registry.register(Slow);
        Dispatcher::new(Arc::new(registry), telemetry, 30, 4)
            .with_timeout(Duration::from_millis(100))
    }

    fn inv(id: &str, name: &str) -> ToolInvocation {
        let mut args = Map::new();
        args.insert("id".to_string(), json!(id));
        ToolInvocation::new(id, name, args)
    }

    #[tokio::test]
    async fn test_results_follow_invocation_order() {
        let d = dispatcher(Arc::new(NoopTelemetry));
        let out = d
            .dispatch(&[inv("a", "echo"), inv("b", "slow"), inv("c", "echo")])
            .await;
        let ids: Vec<&str> = out.results.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(out.tool_messages.len(), 3);
        assert!(!out.all_succeeded);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let d = dispatcher(Arc::new(NoopTelemetry));
        let out = d
            .dispatch(&[inv("a", "failing"), inv("b", "panicking"), inv("c", "echo")])
            .await;
        assert_eq!(out.results[0].outcome, ToolOutcome::ToolError);
        assert!(out.results[0].raw_output.starts_with("Error: "));
        assert!(out.results[0].raw_output.contains("boom"));
        assert_eq!(out.results[1].outcome, ToolOutcome::ToolError);
        assert_eq!(out.results[2].outcome, ToolOutcome::Ok);
        assert!(out.results[2].raw_output.contains("\"id\":\"c\""));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let d = dispatcher(Arc::new(NoopTelemetry));
        let out = d.dispatch(&[inv("x", "fly")]).await;
        assert_eq!(out.results[0].outcome, ToolOutcome::NotFound);
        assert_eq!(out.results[0].raw_output, "Error: tool 'fly' not found.");
        match &out.tool_messages[0] {
            Message::Tool { tool_call_id, name, .. } => {
                assert_eq!(tool_call_id, "x");
                assert_eq!(name, "fly");
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let d = dispatcher(Arc::new(NoopTelemetry));
        let out = d.dispatch(&[inv("s", "slow")]).await;
        assert_eq!(out.results[0].outcome, ToolOutcome::ToolError);
        assert!(out.results[0].raw_output.contains("timed out"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_timeout_holds_while_database_is_busy() {
        use crate::tools::{HospitalDb, SqlQueryTool};
        use std::sync::mpsc;

        let db = HospitalDb::open_in_memory().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(SqlQueryTool::new(db.clone()));
        let d = Dispatcher::new(Arc::new(registry), Arc::new(NoopTelemetry), 30, 4)
            .with_timeout(Duration::from_millis(100));

        // 另一个线程长时间持有连接锁
        let (locked_tx, locked_rx) = mpsc::channel();
        let holder = std::thread::spawn(move || {
            db.with_connection(|_| {
                locked_tx.send(()).ok();
                std::thread::sleep(Duration::from_millis(600));
                Ok(())
            })
            .unwrap();
        });
        locked_rx.recv().unwrap();

        let mut args = Map::new();
        args.insert("query".to_string(), json!("SELECT specialty_name FROM SPECIALTIES"));
        let started = Instant::now();
        let out = d
            .dispatch(&[ToolInvocation::new("sql_query_call_0", "sql_query", args)])
            .await;

        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(out.results[0].outcome, ToolOutcome::ToolError);
        assert!(out.results[0].raw_output.contains("timed out"));
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_tool_calls_recorded() {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let d = dispatcher(telemetry.clone());
        d.dispatch(&[inv("a", "echo"), inv("b", "echo"), inv("c", "fly")])
            .await;
        let summary = telemetry.summary();
        assert_eq!(summary.tools_called["echo"], 2);
        assert!(!summary.tools_called.contains_key("fly"));
    }
}
