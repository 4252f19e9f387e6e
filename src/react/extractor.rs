//! 工具调用意图解析
//!
//! 小模型用 <tool_call>{"name": ..., "arguments": {...}}</tool_call> 哨兵块表达工具调用。
//! 解析对噪声宽容：非法 JSON、缺字段、照抄模板占位符的块都只是跳过（计入 rejected），从不返回错误。
//! 调用 ID 一律由解析器生成：`{name}_call_{i}`，i 为该块在有效调用中的序号。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::memory::ToolInvocation;

pub const TOOL_CALL_OPEN: &str = "<tool_call>";

/// 模板占位符：出现即说明模型在照抄格式说明
const PLACEHOLDER_TOKENS: &[&str] = &["<function-name>", "<args-json-object>"];

pub const DEFAULT_EOS_TOKENS: &[&str] = &["<|im_end|>", "<|endoftext|>"];

/// 保留推理文本时的前缀；合成器据此识别可合并的推理
pub const REASONING_MARKER: &str = "🧠 **Assistant reasoning:**";

static TOOL_CALL_RE: OnceLock<Regex> = OnceLock::new();
static THINK_RE: OnceLock<Regex> = OnceLock::new();

fn tool_call_re() -> &'static Regex {
    TOOL_CALL_RE.get_or_init(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").unwrap())
}

fn think_re() -> &'static Regex {
    THINK_RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").unwrap())
}

/// 带推理前缀的 assistant 内容
pub fn reasoning_content(reasoning: &str) -> String {
    format!("{REASONING_MARKER}\n\n{reasoning}")
}

/// 一次解析的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub invocations: Vec<ToolInvocation>,
    /// 第一个 <think> 块的内容（已 trim，空则为 None）
    pub reasoning: Option<String>,
    /// 被跳过的工具调用块数量
    pub rejected: usize,
}

/// 从原始输出中解析工具调用、清理自由文本
pub trait IntentExtractor: Send + Sync {
    fn extract(&self, raw_text: &str) -> Extraction;

    /// 去掉 prompt 回显、结束 token、工具调用块，并把 <think> 块替换为其内容
    fn clean(&self, raw_text: &str, prompt_echo: &str) -> String;
}

/// 基于哨兵标签的解析器
#[derive(Debug, Clone)]
pub struct SentinelExtractor {
    eos_tokens: Vec<String>,
}

impl Default for SentinelExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_EOS_TOKENS.iter().map(|s| s.to_string()).collect())
    }
}

impl SentinelExtractor {
    pub fn new(eos_tokens: Vec<String>) -> Self {
        Self { eos_tokens }
    }

    fn parse_block(interior: &str) -> Option<(String, Map<String, Value>)> {
        // 未闭合的开标签会让非贪婪匹配吞进下一个块，只取最后一个开标签之后的内容
        let interior = match interior.rfind(TOOL_CALL_OPEN) {
            Some(pos) => &interior[pos + TOOL_CALL_OPEN.len()..],
            None => interior,
        }
        .trim();

        if PLACEHOLDER_TOKENS.iter().any(|p| interior.contains(p)) {
            tracing::debug!("skipping tool_call block copied from the format instructions");
            return None;
        }
        let value: Value = match serde_json::from_str(interior) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "tool_call block is not valid JSON");
                return None;
            }
        };
        let name = value.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        let arguments = value.get("arguments")?.as_object()?.clone();
        Some((name.to_string(), arguments))
    }
}

impl IntentExtractor for SentinelExtractor {
    fn extract(&self, raw_text: &str) -> Extraction {
        let mut extraction = Extraction::default();
        for caps in tool_call_re().captures_iter(raw_text) {
            let interior = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            match Self::parse_block(interior) {
                Some((name, arguments)) => {
                    let id = format!("{name}_call_{}", extraction.invocations.len());
                    extraction.invocations.push(ToolInvocation::new(id, name, arguments));
                }
                None => extraction.rejected += 1,
            }
        }
        extraction.reasoning = think_re()
            .captures(raw_text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        extraction
    }

    fn clean(&self, raw_text: &str, prompt_echo: &str) -> String {
        let mut text = if prompt_echo.is_empty() {
            raw_text.to_string()
        } else {
            raw_text.replace(prompt_echo, "")
        };
        for eos in &self.eos_tokens {
            text = text.replace(eos.as_str(), "");
        }
        let text = tool_call_re().replace_all(&text, "");
        let text = think_re().replace_all(&text, "${1}");
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_call_with_reasoning() {
        let raw = "<think>The user wants specialties.</think>\n<tool_call>\n{\"name\": \"sql_query\", \"arguments\": {\"query\": \"SELECT specialty_name FROM SPECIALTIES\"}}\n</tool_call><|im_end|>";
        let ex = SentinelExtractor::default().extract(raw);
        assert_eq!(ex.invocations.len(), 1);
        assert_eq!(ex.invocations[0].id, "sql_query_call_0");
        assert_eq!(ex.invocations[0].name, "sql_query");
        assert_eq!(
            ex.invocations[0].arguments["query"],
            "SELECT specialty_name FROM SPECIALTIES"
        );
        assert_eq!(ex.reasoning.as_deref(), Some("The user wants specialties."));
        assert_eq!(ex.rejected, 0);
    }

    #[test]
    fn test_malformed_blocks_are_skipped() {
        let raw = "<tool_call>{not json}</tool_call>\
                   <tool_call>{\"name\": \"sql_query\"}</tool_call>\
                   <tool_call>{\"name\": \"\", \"arguments\": {}}</tool_call>\
                   <tool_call>{\"name\": \"sql_query\", \"arguments\": {\"query\": \"x\"}}</tool_call>";
        let ex = SentinelExtractor::default().extract(raw);
        assert_eq!(ex.invocations.len(), 1);
        assert_eq!(ex.invocations[0].id, "sql_query_call_0");
        assert_eq!(ex.rejected, 3);
    }

    #[test]
    fn test_placeholder_block_is_skipped() {
        let raw = "<tool_call>\n{\"name\": <function-name>, \"arguments\": <args-json-object>}\n</tool_call>";
        let ex = SentinelExtractor::default().extract(raw);
        assert!(ex.invocations.is_empty());
        assert_eq!(ex.rejected, 1);
    }

    #[test]
    fn test_ids_unique_for_repeated_tool() {
        let block = "<tool_call>{\"name\": \"sql_query\", \"arguments\": {}}</tool_call>";
        let raw = format!("{block}{block}{block}");
        let ex = SentinelExtractor::default().extract(&raw);
        let ids: Vec<&str> = ex.invocations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["sql_query_call_0", "sql_query_call_1", "sql_query_call_2"]);
    }

    #[test]
    fn test_unclosed_open_tag_does_not_hide_next_block() {
        let raw = "<tool_call>{\"name\": \"broken\" <tool_call>{\"name\": \"sql_query\", \"arguments\": {}}</tool_call>";
        let ex = SentinelExtractor::default().extract(raw);
        assert_eq!(ex.invocations.len(), 1);
        assert_eq!(ex.invocations[0].name, "sql_query");
    }

    #[test]
    fn test_plain_text_has_no_invocations() {
        let ex = SentinelExtractor::default().extract("Hello, how can I help?");
        assert_eq!(ex, Extraction::default());
    }

    #[test]
    fn test_clean_removes_noise() {
        let prompt = "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n";
        let raw = format!(
            "{prompt}<think>greeting</think>\nHello! <tool_call>{{\"name\": \"x\", \"arguments\": {{}}}}</tool_call>How can I help?<|im_end|><|endoftext|>"
        );
        let cleaned = SentinelExtractor::default().clean(&raw, prompt);
        assert_eq!(cleaned, "greeting\nHello! How can I help?");
    }

    #[test]
    fn test_clean_without_noise_is_trimmed_input() {
        assert_eq!(SentinelExtractor::default().clean("  plain  ", ""), "plain");
    }
}
