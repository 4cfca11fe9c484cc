//! 引擎错误类型
//!
//! 工具级失败（ToolExecutionFailure / InvalidToolCall）只作为数据回灌给 LLM；
//! 回合级失败（ModelEmptyResponse / Timeout / ModelError）直接返回给调用方。

use thiserror::Error;

use crate::forms::DocumentType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Unknown field '{field}' for {document}")]
    UnknownField { document: DocumentType, field: String },

    #[error("Field '{field}' on {document} takes a {expected} value")]
    FieldKindMismatch {
        document: DocumentType,
        field: String,
        expected: &'static str,
    },

    #[error("Unknown unified field or option: {0}")]
    UnknownMapping(String),

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailure(String),

    /// 第二轮 LLM 返回空文本：回合失败，不做兜底回复
    #[error("Model returned an empty response")]
    ModelEmptyResponse,

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl FormError {
    /// 回合级错误对应的 HTTP 语义分类
    pub fn code(&self) -> &'static str {
        match self {
            FormError::SessionNotFound(_) => "session_not_found",
            FormError::UnknownField { .. } => "unknown_field",
            FormError::FieldKindMismatch { .. } => "field_kind_mismatch",
            FormError::UnknownMapping(_) => "unknown_mapping",
            FormError::InvalidMapping(_) => "invalid_mapping",
            FormError::InvalidToolCall(_) => "invalid_tool_call",
            FormError::ToolExecutionFailure(_) => "tool_failure",
            FormError::ModelEmptyResponse => "model_empty_response",
            FormError::ModelError(_) => "model_error",
            FormError::PersistenceFailure(_) => "persistence_failure",
            FormError::Timeout(_) => "timeout",
            FormError::Config(_) => "config_error",
        }
    }
}
