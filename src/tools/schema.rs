//! 回复协议 JSON Schema 生成（schemars）
//!
//! 把「合法回复信封」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};

use crate::tools::{ToolCall, TOOL_CATALOG};

/// LLM 回复格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ReplyFormat {
    /// 给用户看的自然语言回复
    pub reply: String,
    /// 本轮需要执行的工具调用，按顺序执行；无需调用时为空数组
    pub tool_calls: Vec<ToolCall>,
}

/// 回复信封的 JSON Schema 字符串
pub fn reply_schema_json() -> String {
    let schema = schema_for!(ReplyFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 拼入 system prompt 的协议说明：工具清单 + Schema
pub fn reply_protocol_prompt() -> String {
    let mut out = String::from(
        "## Reply protocol\nWhen you need to record answers or look things up, reply with a single JSON object \
         {\"reply\": \"...\", \"tool_calls\": [{\"tool\": \"...\", \"args\": {...}}]}. \
         After tools run you will receive their results and must answer the user in plain text.\n\n## Tools\n",
    );
    for (name, description) in TOOL_CATALOG {
        out.push_str(&format!("- {name}: {description}\n"));
    }
    out.push_str("\n## Schema\n");
    out.push_str(&reply_schema_json());
    out
}
