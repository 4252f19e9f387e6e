//! ChatML 渲染（Qwen 风格对话模板）
//!
//! 工具声明放在 system 段的 <tools> 块中；assistant 的工具调用渲染为 <tool_call> 块，
//! tool 结果以 <tool_response> 包裹、作为 user 段回填。末尾追加 assistant 起始标记，模型从这里续写。

use crate::memory::{Message, ToolInvocation};
use crate::tools::ToolSpec;

pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";

/// 工具协议说明；<function-name> / <args-json-object> 是模板占位符，解析器会跳过原样照抄的块
const TOOL_PROTOCOL: &str = "\
For each function call, return a json object with function name and arguments within <tool_call></tool_call> XML tags:
<tool_call>
{\"name\": <function-name>, \"arguments\": <args-json-object>}
</tool_call>";

/// system 段中的工具说明
pub fn tools_section(tools: &[ToolSpec]) -> String {
    let declarations: Vec<String> = tools
        .iter()
        .map(|t| t.to_function_json().to_string())
        .collect();
    format!(
        "# Tools\n\nYou may call one or more functions to assist with the user query.\n\n\
         You are provided with function signatures within <tools></tools> XML tags:\n<tools>\n{}\n</tools>\n\n{}",
        declarations.join("\n"),
        TOOL_PROTOCOL
    )
}

/// 单个工具调用的线上格式
pub fn render_tool_call(call: &ToolInvocation) -> String {
    let body = serde_json::json!({ "name": call.name, "arguments": call.arguments });
    format!("<tool_call>\n{body}\n</tool_call>")
}

/// assistant 消息的线上文本：有工具调用时只保留调用块
pub fn assistant_wire_content(message: &Message) -> String {
    if message.has_tool_calls() {
        message
            .tool_calls()
            .iter()
            .map(render_tool_call)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        message.content().to_string()
    }
}

/// tool 结果的线上文本
pub fn tool_response_content(content: &str) -> String {
    format!("<tool_response>\n{content}\n</tool_response>")
}

/// system 内容 + 工具说明
pub fn system_content(system: &str, tools: &[ToolSpec]) -> String {
    match (system.trim().is_empty(), tools.is_empty()) {
        (_, true) => system.to_string(),
        (true, false) => tools_section(tools),
        (false, false) => format!("{}\n\n{}", system.trim_end(), tools_section(tools)),
    }
}

fn block(out: &mut String, role: &str, content: &str) {
    out.push_str(IM_START);
    out.push_str(role);
    out.push('\n');
    out.push_str(content);
    out.push_str(IM_END);
    out.push('\n');
}

/// 渲染完整 prompt
pub fn render_prompt(messages: &[Message], tools: &[ToolSpec]) -> String {
    let mut out = String::new();
    let has_system = matches!(messages.first(), Some(Message::System { .. }));
    if !has_system && !tools.is_empty() {
        block(&mut out, "system", &tools_section(tools));
    }

    for message in messages {
        match message {
            Message::System { content } => block(&mut out, "system", &system_content(content, tools)),
            Message::User { content } => block(&mut out, "user", content),
            Message::Assistant { .. } => block(&mut out, "assistant", &assistant_wire_content(message)),
            Message::Tool { content, .. } => block(&mut out, "user", &tool_response_content(content)),
        }
    }

    out.push_str(IM_START);
    out.push_str("assistant\n");
    out
}
