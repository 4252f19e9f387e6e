//! 回复合成
//!
//! 工具全部成功时，不再让小模型复述结果，而是按结果的形状直接渲染回复：
//! 医生名单、专科列表、名称列表、预约结果；识别不了的形状退回截断预览。
//! 若触发本轮的 assistant 消息带有推理文本，则以分隔线拼在回复前面。

use serde_json::Value;

use crate::memory::ConversationState;
use crate::react::extractor::REASONING_MARKER;
use crate::tools::scheduling::STATUS_SCHEDULED;
use crate::tools::{ToolResult, SCHEDULING_TOOL_NAME};

/// 推理与回复之间的分隔
pub const DIVIDER: &str = "\n\n---\n\n";

/// 专科列表末尾的固定说明
pub const COMPLETENESS_PHRASE: &str = "These are all the specialties in our clinical staff.";

const FALLBACK_PREVIEW_CHARS: usize = 500;
const PERSON_NAME_FIELDS: &[&str] = &["person_name", "nome"];
const SPECIALTY_NAME_FIELDS: &[&str] = &["specialty_name", "nome_especialidade"];
const ERROR_MARKERS: &[&str] = &["error", "erro", "failed", "falha"];
const NOT_AVAILABLE: &str = "N/A";

fn field_text(item: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match item.get(*name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn has_field(item: &Value, names: &[&str]) -> bool {
    names.iter().any(|name| item.get(*name).is_some())
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// 把推理文本（若有）拼在回复前
pub fn merge_reasoning(conversation: &ConversationState, narrative: String) -> String {
    match conversation
        .triggering_assistant()
        .map(|m| m.content())
        .filter(|c| c.starts_with(REASONING_MARKER))
    {
        Some(reasoning) => format!("{reasoning}{DIVIDER}{narrative}"),
        None => narrative,
    }
}

#[derive(Debug, Clone)]
pub struct Synthesizer {
    hospital: String,
}

impl Synthesizer {
    pub fn new(hospital: impl Into<String>) -> Self {
        Self {
            hospital: hospital.into(),
        }
    }

    /// 由本轮第一个结果合成最终回复
    pub fn synthesize(&self, results: &[ToolResult], conversation: &ConversationState) -> String {
        let narrative = match results.first() {
            Some(first) => self.narrate(first),
            None => "🤖 **Request processed:**\n\nNo tool produced a result for this request.".to_string(),
        };
        merge_reasoning(conversation, narrative)
    }

    /// 轮次或重试用尽时的尽力合成：优先渲染第一个成功结果，否则致歉
    pub fn synthesize_best_effort(&self, results: &[ToolResult], conversation: &ConversationState) -> String {
        let narrative = match results.iter().find(|r| r.is_ok()) {
            Some(ok) => self.narrate(ok),
            None => apology(results),
        };
        merge_reasoning(conversation, narrative)
    }

    fn narrate(&self, result: &ToolResult) -> String {
        let raw = result.raw_output.trim();
        if !result.is_ok() {
            return alert(raw);
        }
        let Ok(data) = serde_json::from_str::<Value>(raw) else {
            return opaque(raw);
        };
        if let Some(text) = self.render_records(&data) {
            return text;
        }
        if result.tool_name == SCHEDULING_TOOL_NAME {
            if let Some(text) = render_scheduling(&data) {
                return text;
            }
        }
        fallback(raw)
    }

    fn render_records(&self, data: &Value) -> Option<String> {
        let items = data.as_array()?;
        let Some(first) = items.first() else {
            return Some("🔍 **Query result:**\n\nNo records found matching your search.".to_string());
        };

        match (
            has_field(first, PERSON_NAME_FIELDS),
            has_field(first, SPECIALTY_NAME_FIELDS),
        ) {
            (true, true) => {
                let lines: Vec<String> = items
                    .iter()
                    .map(|item| {
                        format!(
                            "**{}** - {}",
                            field_text(item, PERSON_NAME_FIELDS).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                            field_text(item, SPECIALTY_NAME_FIELDS).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                        )
                    })
                    .collect();
                Some(format!(
                    "👨‍⚕️ **Medical staff of {}:**\n\n{}\n\nTotal of {} professionals on our team.",
                    self.hospital,
                    lines.join("\n"),
                    lines.len()
                ))
            }
            (false, true) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|item| field_text(item, SPECIALTY_NAME_FIELDS))
                    .collect();
                Some(format!(
                    "🎯 **Available medical specialties:**\n\nAt {} we have {} specialties:\n\n{}\n\n{}",
                    self.hospital,
                    names.len(),
                    bullets(&names),
                    COMPLETENESS_PHRASE
                ))
            }
            (true, false) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|item| field_text(item, PERSON_NAME_FIELDS))
                    .collect();
                Some(format!(
                    "📋 **Records found ({}):**\n\n{}",
                    names.len(),
                    bullets(&names)
                ))
            }
            (false, false) => None,
        }
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("• {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_scheduling(data: &Value) -> Option<String> {
    let status = data.get("status")?.as_str()?;
    let text = |key: &str| field_text(data, &[key]);
    if status == STATUS_SCHEDULED {
        Some(format!(
            "✅ **Appointment confirmed!**\n\n• Doctor: {}\n• Specialty: {}\n• Date/Time: {}\n\n{}",
            text("doctor").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            text("specialty").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            text("date_time").unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            text("message").unwrap_or_else(|| "Appointment scheduled successfully!".to_string()),
        ))
    } else {
        Some(format!(
            "❌ **Sorry, the appointment could not be booked.**\n\n{}",
            text("message").unwrap_or_else(|| "Please try another date or time.".to_string())
        ))
    }
}

fn alert(raw: &str) -> String {
    format!("⚠️ **System alert:**\n\nThe tool reported a problem:\n\n{raw}")
}

fn opaque(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        alert(raw)
    } else {
        format!("✅ **Request processed:**\n\n{raw}")
    }
}

fn fallback(raw: &str) -> String {
    let shown = preview(raw, FALLBACK_PREVIEW_CHARS);
    let ellipsis = if shown.len() < raw.len() { "..." } else { "" };
    format!("🤖 **Request processed:**\n\nHere is the data I found:\n{shown}{ellipsis}")
}

fn apology(results: &[ToolResult]) -> String {
    let details: Vec<String> = results
        .iter()
        .map(|r| format!("• {}: {}", r.tool_name, preview(&r.raw_output, 200)))
        .collect();
    if details.is_empty() {
        "Sorry, an error occurred while processing your request.".to_string()
    } else {
        format!(
            "Sorry, an error occurred while processing your request or the tool failed.\n\n{}",
            details.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Message, ToolInvocation};
    use crate::react::extractor::reasoning_content;
    use crate::tools::ToolOutcome;
    use serde_json::Map;

    fn ok(tool: &str, raw: &str) -> ToolResult {
        ToolResult {
            invocation_id: format!("{tool}_call_0"),
            tool_name: tool.to_string(),
            raw_output: raw.to_string(),
            outcome: ToolOutcome::Ok,
        }
    }

    fn synth() -> Synthesizer {
        Synthesizer::new("Hospital Santa Clara")
    }

    fn empty_state() -> ConversationState {
        ConversationState::for_request("sys", "q")
    }

    #[test]
    fn test_roster() {
        let raw = r#"[{"person_name":"Ana Souza","specialty_name":"Cardiology"},{"nome":"Lee Park","nome_especialidade":"Pediatrics"}]"#;
        let out = synth().synthesize(&[ok("sql_query", raw)], &empty_state());
        assert!(out.contains("**Ana Souza** - Cardiology"));
        assert!(out.contains("**Lee Park** - Pediatrics"));
        assert!(out.contains("Total of 2 professionals"));
        assert!(out.contains("Hospital Santa Clara"));
    }

    #[test]
    fn test_specialty_list() {
        let raw = r#"[{"specialty_name":"Cardiology"},{"specialty_name":"Neurology"}]"#;
        let out = synth().synthesize(&[ok("sql_query", raw)], &empty_state());
        assert!(out.contains("• Cardiology\n• Neurology"));
        assert!(out.ends_with(COMPLETENESS_PHRASE));
    }

    #[test]
    fn test_name_list() {
        let raw = r#"[{"person_name":"João Silva","birth_date":"1980-05-12"}]"#;
        let out = synth().synthesize(&[ok("sql_query", raw)], &empty_state());
        assert!(out.contains("Records found (1)"));
        assert!(out.contains("• João Silva"));
    }

    #[test]
    fn test_empty_result() {
        let out = synth().synthesize(&[ok("sql_query", "[]")], &empty_state());
        assert!(out.contains("No records found"));
    }

    #[test]
    fn test_scheduling_confirmation_and_failure() {
        let done = r#"{"status":"scheduled","doctor":"Lee Park","specialty":"Pediatrics","date_time":"2030-01-10 10:00:00"}"#;
        let out = synth().synthesize(&[ok(SCHEDULING_TOOL_NAME, done)], &empty_state());
        assert!(out.contains("Appointment confirmed"));
        assert!(out.contains("• Doctor: Lee Park"));
        assert!(out.contains("Appointment scheduled successfully!"));

        let busy = r#"{"status":"unavailable","message":"Dr. Lee Park is not available."}"#;
        let out = synth().synthesize(&[ok(SCHEDULING_TOOL_NAME, busy)], &empty_state());
        assert!(out.contains("could not be booked"));
        assert!(out.contains("not available"));
    }

    #[test]
    fn test_non_json_output() {
        let out = synth().synthesize(&[ok("sql_query", "database error: locked")], &empty_state());
        assert!(out.contains("System alert"));

        let out = synth().synthesize(&[ok("sql_query", "all good")], &empty_state());
        assert!(out.contains("all good"));
        assert!(!out.contains("System alert"));
    }

    #[test]
    fn test_failed_result_is_alert() {
        let failed = ToolResult {
            invocation_id: "sql_query_call_0".to_string(),
            tool_name: "sql_query".to_string(),
            raw_output: "[]".to_string(),
            outcome: ToolOutcome::ToolError,
        };
        let out = synth().synthesize(&[failed], &empty_state());
        assert!(out.contains("System alert"));
    }

    #[test]
    fn test_unrecognized_shape_is_truncated() {
        let long = format!(r#"{{"blob":"{}"}}"#, "x".repeat(800));
        let out = synth().synthesize(&[ok("sql_query", &long)], &empty_state());
        assert!(out.ends_with("..."));
        assert!(out.chars().count() < 600);
    }

    #[test]
    fn test_reasoning_is_prefixed() {
        let mut state = empty_state();
        state
            .push(Message::assistant_with_tools(
                reasoning_content("Need the specialties."),
                vec![ToolInvocation::new("sql_query_call_0", "sql_query", Map::new())],
            ))
            .unwrap();
        let out = synth().synthesize(&[ok("sql_query", r#"[{"specialty_name":"Cardiology"}]"#)], &state);
        assert!(out.starts_with(REASONING_MARKER));
        assert!(out.contains(DIVIDER));
        assert!(out.contains("Need the specialties."));
    }

    #[test]
    fn test_best_effort_prefers_success_then_apologizes() {
        let failed = ToolResult {
            invocation_id: "x_call_0".to_string(),
            tool_name: "x".to_string(),
            raw_output: "Error: tool 'x' not found.".to_string(),
            outcome: ToolOutcome::NotFound,
        };
        let out = synth().synthesize_best_effort(
            &[failed.clone(), ok("sql_query", r#"[{"specialty_name":"Cardiology"}]"#)],
            &empty_state(),
        );
        assert!(out.contains("• Cardiology"));

        let out = synth().synthesize_best_effort(&[failed], &empty_state());
        assert!(out.starts_with("Sorry"));
        assert!(out.contains("not found"));
    }
}
