//! 编排遥测：阶段耗时与成败、工具调用次数、请求数与错误数
//!
//! TelemetrySink 由编排器以 Arc<dyn TelemetrySink> 持有；InMemoryTelemetry 在进程内聚合，
//! 退出时输出 MetricsSummary。实现需保证并发调用安全（工具并行分发时会同时记录）。

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

pub const STAGE_CALL_MODEL: &str = "call_model";
pub const STAGE_EXECUTE_TOOLS: &str = "execute_tools";
pub const STAGE_SYNTHESIZE: &str = "synthesize";

/// 遥测接收端
pub trait TelemetrySink: Send + Sync {
    fn record_stage(&self, stage: &str, duration: Duration, success: bool);
    fn record_tool_call(&self, tool: &str);
    fn record_request(&self);
    fn record_error(&self);
    fn summary(&self) -> MetricsSummary;
}

/// 单个阶段的统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageSummary {
    pub execution_count: u64,
    pub total_time_seconds: f64,
    pub average_time_seconds: f64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSummary {
    pub session_duration_seconds: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub nodes_executed: BTreeMap<String, StageSummary>,
    pub tools_called: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct StageStats {
    count: u64,
    total: Duration,
    successes: u64,
    failures: u64,
}

#[derive(Debug)]
struct Metrics {
    started_at: Instant,
    total_requests: u64,
    errors: u64,
    stages: BTreeMap<String, StageStats>,
    tool_calls: BTreeMap<String, u64>,
}

impl Metrics {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: 0,
            errors: 0,
            stages: BTreeMap::new(),
            tool_calls: BTreeMap::new(),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// 进程内聚合的遥测
#[derive(Debug)]
pub struct InMemoryTelemetry {
    metrics: Mutex<Metrics>,
}

impl Default for InMemoryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(Metrics::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 清空所有计数并重新开始计时
    pub fn reset(&self) {
        *self.lock() = Metrics::new();
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn record_stage(&self, stage: &str, duration: Duration, success: bool) {
        let mut m = self.lock();
        let stats = m.stages.entry(stage.to_string()).or_default();
        stats.count += 1;
        stats.total += duration;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
    }

    fn record_tool_call(&self, tool: &str) {
        *self.lock().tool_calls.entry(tool.to_string()).or_insert(0) += 1;
    }

    fn record_request(&self) {
        self.lock().total_requests += 1;
    }

    fn record_error(&self) {
        self.lock().errors += 1;
    }

    fn summary(&self) -> MetricsSummary {
        let m = self.lock();
        let nodes_executed = m
            .stages
            .iter()
            .map(|(name, s)| {
                let count = s.count.max(1) as f64;
                (
                    name.clone(),
                    StageSummary {
                        execution_count: s.count,
                        total_time_seconds: round2(s.total.as_secs_f64()),
                        average_time_seconds: round2(s.total.as_secs_f64() / count),
                        successes: s.successes,
                        failures: s.failures,
                        success_rate_percent: round2(s.successes as f64 / count * 100.0),
                    },
                )
            })
            .collect();
        MetricsSummary {
            session_duration_seconds: round2(m.started_at.elapsed().as_secs_f64()),
            total_requests: m.total_requests,
            total_errors: m.errors,
            nodes_executed,
            tools_called: m.tool_calls.clone(),
        }
    }
}

/// 不记录任何东西的遥测（测试或关闭遥测时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_stage(&self, _stage: &str, _duration: Duration, _success: bool) {}
    fn record_tool_call(&self, _tool: &str) {}
    fn record_request(&self) {}
    fn record_error(&self) {}

    fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            session_duration_seconds: 0.0,
            total_requests: 0,
            total_errors: 0,
            nodes_executed: BTreeMap::new(),
            tools_called: BTreeMap::new(),
        }
    }
}
