//! LLM 协作方抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Scripted）实现 ModelClient：输入有序消息 + 上下文摘要，
//! 输出自由文本与结构化工具调用列表。未知工具名由编排层当作数据处理，这里不做校验。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// LLM 请求的原始工具调用（名称 + 未校验的 JSON 参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    #[serde(alias = "tool")]
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl RawToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// 单次 LLM 调用结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<RawToolCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tools(text: impl Into<String>, tool_calls: Vec<RawToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 非流式完成：messages 为完整对话历史，context 为本轮新生成的状态摘要
    async fn complete(&self, messages: &[Message], context: &str) -> Result<ModelReply, String>;
}
