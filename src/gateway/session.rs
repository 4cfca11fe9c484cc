//! 对话会话
//!
//! 与表单状态分开持久化；会话可以先没有关联申请，等对话收集到足够信息后再关联。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 会话 ID
pub type SessionId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: SessionId,
    /// 会话归属（如登录用户、电话号码），可选
    pub owner_ref: Option<String>,
    /// 按到达顺序追加，不重排不去重
    pub messages: Vec<Message>,
    pub user_data: HashMap<String, serde_json::Value>,
    pub application_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(owner_ref: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: format!("session_{}", uuid::Uuid::new_v4()),
            owner_ref,
            messages: Vec::new(),
            user_data: HashMap::new(),
            application_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
