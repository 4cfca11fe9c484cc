//! 记忆层：对话消息

pub mod conversation;

pub use conversation::{Message, Role, ToolCallRecord};
