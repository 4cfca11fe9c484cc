//! 工具层：强类型工具调用、回复协议 Schema、执行器

pub mod call;
pub mod executor;
pub mod schema;

pub use call::{ToolCall, ToolCallError, TOOL_CATALOG};
pub use executor::{ToolEffect, ToolExecutor, ToolResult, ToolScope};
pub use schema::{reply_protocol_prompt, reply_schema_json};
