//! 广播事件协议定义
//!
//! 推送给 `global` 房间和 `session:<id>` 房间的事件

use serde::Serialize;

use crate::forms::{CompleteSnapshot, Progress};

/// 全局房间
pub const GLOBAL_ROOM: &str = "global";

/// 会话房间名
pub fn session_room(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// 引擎对外发布的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormEvent {
    /// 一轮对话改动了表单后的字段快照
    FieldsUpdated {
        session_id: String,
        snapshot: CompleteSnapshot,
        progress: Progress,
    },

    /// 预览 / 最终文档已生成
    DocumentsRendered {
        session_id: String,
        application_id: String,
        artifacts: Vec<String>,
    },

    /// 会话已删除
    SessionDeleted { session_id: String },
}

impl FormEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FormEvent::FieldsUpdated { .. } => "fields_updated",
            FormEvent::DocumentsRendered { .. } => "documents_rendered",
            FormEvent::SessionDeleted { .. } => "session_deleted",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
