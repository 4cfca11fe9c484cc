//! 会话存储抽象层
//!
//! 定义统一的对话会话接口，支持内存和 SQLite（feature `async-sqlite`）两种实现

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::session::{ChatSession, SessionId};
use crate::core::FormError;
use crate::memory::Message;

#[cfg(feature = "async-sqlite")]
pub use sqlx_impl::SqliteChatSessionStore;

/// 会话存储接口
#[async_trait]
pub trait ChatSessionStore: Send + Sync {
    /// 新建会话
    async fn create(&self, owner_ref: Option<String>) -> Result<ChatSession, FormError>;

    /// 读取会话（含完整消息历史）
    async fn get(&self, session_id: &str) -> Result<Option<ChatSession>, FormError>;

    /// 按顺序追加消息
    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), FormError>;

    /// 关联申请
    async fn link_application(&self, session_id: &str, application_id: &str) -> Result<(), FormError>;

    /// 写入一条 user_data
    async fn set_user_data(&self, session_id: &str, key: &str, value: serde_json::Value) -> Result<(), FormError>;

    /// 删除会话；返回是否存在
    async fn delete(&self, session_id: &str) -> Result<bool, FormError>;
}

/// 内存会话存储
#[derive(Default)]
pub struct MemoryChatSessionStore {
    sessions: RwLock<HashMap<SessionId, ChatSession>>,
}

impl MemoryChatSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_session<F, R>(&self, session_id: &str, f: F) -> Result<R, FormError>
    where
        F: FnOnce(&mut ChatSession) -> R + Send,
    {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(session_id)
            .map(f)
            .ok_or_else(|| FormError::SessionNotFound(session_id.to_string()))
    }
}

#[async_trait]
impl ChatSessionStore for MemoryChatSessionStore {
    async fn create(&self, owner_ref: Option<String>) -> Result<ChatSession, FormError> {
        let session = ChatSession::new(owner_ref);
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<ChatSession>, FormError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), FormError> {
        self.with_session(session_id, |s| {
            for m in messages {
                s.push(m.clone());
            }
        })
        .await
    }

    async fn link_application(&self, session_id: &str, application_id: &str) -> Result<(), FormError> {
        self.with_session(session_id, |s| {
            s.application_id = Some(application_id.to_string());
            s.touch();
        })
        .await
    }

    async fn set_user_data(&self, session_id: &str, key: &str, value: serde_json::Value) -> Result<(), FormError> {
        self.with_session(session_id, |s| {
            s.user_data.insert(key.to_string(), value);
            s.touch();
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, FormError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[cfg(feature = "async-sqlite")]
mod sqlx_impl {
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::Row;

    use super::ChatSessionStore;
    use crate::core::FormError;
    use crate::gateway::session::ChatSession;
    use crate::memory::{Message, Role};

    fn db_err(e: sqlx::Error) -> FormError {
        FormError::PersistenceFailure(e.to_string())
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    /// SQLite 会话存储：会话元数据与消息分表
    pub struct SqliteChatSessionStore {
        pool: sqlx::sqlite::SqlitePool,
    }

    impl SqliteChatSessionStore {
        pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
            let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await?;
            Self::from_pool(pool).await
        }

        pub async fn from_pool(pool: sqlx::sqlite::SqlitePool) -> Result<Self, sqlx::Error> {
            let store = Self { pool };
            store.init_tables().await?;
            Ok(store)
        }

        async fn init_tables(&self) -> Result<(), sqlx::Error> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS chat_sessions (
                    id TEXT PRIMARY KEY,
                    owner_ref TEXT,
                    application_id TEXT,
                    user_data TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tool_calls TEXT,
                    created_at TEXT NOT NULL
                )",
            )
            .execute(&self.pool)
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id)")
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn exists(&self, session_id: &str) -> Result<bool, FormError> {
            let row = sqlx::query("SELECT 1 FROM chat_sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(row.is_some())
        }

        async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, FormError> {
            let rows = sqlx::query(
                "SELECT role, content, tool_calls, created_at FROM chat_messages WHERE session_id = ? ORDER BY id ASC",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            let mut messages = Vec::with_capacity(rows.len());
            for row in rows {
                let role: String = row.get("role");
                let Some(role) = Role::parse(&role) else {
                    continue;
                };
                let tool_calls: Option<String> = row.get("tool_calls");
                let created_at: String = row.get("created_at");
                messages.push(Message {
                    role,
                    content: row.get("content"),
                    tool_calls: tool_calls.and_then(|t| serde_json::from_str(&t).ok()),
                    timestamp: parse_time(&created_at),
                });
            }
            Ok(messages)
        }

        async fn touch(&self, session_id: &str) -> Result<(), FormError> {
            sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl ChatSessionStore for SqliteChatSessionStore {
        async fn create(&self, owner_ref: Option<String>) -> Result<ChatSession, FormError> {
            let session = ChatSession::new(owner_ref);
            sqlx::query(
                "INSERT INTO chat_sessions (id, owner_ref, application_id, user_data, created_at, updated_at)
                 VALUES (?, ?, NULL, '{}', ?, ?)",
            )
            .bind(&session.session_id)
            .bind(&session.owner_ref)
            .bind(session.created_at.to_rfc3339())
            .bind(session.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(session)
        }

        async fn get(&self, session_id: &str) -> Result<Option<ChatSession>, FormError> {
            let row = sqlx::query(
                "SELECT owner_ref, application_id, user_data, created_at, updated_at FROM chat_sessions WHERE id = ?",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let user_data: String = row.get("user_data");
            let created_at: String = row.get("created_at");
            let updated_at: String = row.get("updated_at");

            Ok(Some(ChatSession {
                session_id: session_id.to_string(),
                owner_ref: row.get("owner_ref"),
                messages: self.load_messages(session_id).await?,
                user_data: serde_json::from_str(&user_data).unwrap_or_default(),
                application_id: row.get("application_id"),
                created_at: parse_time(&created_at),
                updated_at: parse_time(&updated_at),
            }))
        }

        async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), FormError> {
            if !self.exists(session_id).await? {
                return Err(FormError::SessionNotFound(session_id.to_string()));
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for m in messages {
                let tool_calls = m
                    .tool_calls
                    .as_ref()
                    .and_then(|calls| serde_json::to_string(calls).ok());
                sqlx::query(
                    "INSERT INTO chat_messages (session_id, role, content, tool_calls, created_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(session_id)
                .bind(m.role.as_str())
                .bind(&m.content)
                .bind(tool_calls)
                .bind(m.timestamp.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            self.touch(session_id).await
        }

        async fn link_application(&self, session_id: &str, application_id: &str) -> Result<(), FormError> {
            let result = sqlx::query("UPDATE chat_sessions SET application_id = ?, updated_at = ? WHERE id = ?")
                .bind(application_id)
                .bind(Utc::now().to_rfc3339())
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            if result.rows_affected() == 0 {
                return Err(FormError::SessionNotFound(session_id.to_string()));
            }
            Ok(())
        }

        async fn set_user_data(&self, session_id: &str, key: &str, value: serde_json::Value) -> Result<(), FormError> {
            let row = sqlx::query("SELECT user_data FROM chat_sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or_else(|| FormError::SessionNotFound(session_id.to_string()))?;
            let raw: String = row.get("user_data");
            let mut data: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&raw).unwrap_or_default();
            data.insert(key.to_string(), value);

            sqlx::query("UPDATE chat_sessions SET user_data = ?, updated_at = ? WHERE id = ?")
                .bind(serde_json::Value::Object(data).to_string())
                .bind(Utc::now().to_rfc3339())
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(())
        }

        async fn delete(&self, session_id: &str) -> Result<bool, FormError> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_sqlite_session_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let store = SqliteChatSessionStore::new(dir.path().join("sessions.db")).await.unwrap();

            let session = store.create(Some("owner-1".into())).await.unwrap();
            store
                .append_messages(&session.session_id, &[Message::user("hi"), Message::assistant("hello")])
                .await
                .unwrap();
            store.link_application(&session.session_id, "A1").await.unwrap();
            store
                .set_user_data(&session.session_id, "eligibility", serde_json::json!({"score": 80}))
                .await
                .unwrap();

            let loaded = store.get(&session.session_id).await.unwrap().unwrap();
            assert_eq!(loaded.owner_ref.as_deref(), Some("owner-1"));
            assert_eq!(loaded.application_id.as_deref(), Some("A1"));
            assert_eq!(loaded.messages.len(), 2);
            assert_eq!(loaded.messages[0].content, "hi");
            assert_eq!(loaded.user_data["eligibility"]["score"], 80);

            assert!(store.delete(&session.session_id).await.unwrap());
            assert!(store.get(&session.session_id).await.unwrap().is_none());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_keep_arrival_order() {
        let store = MemoryChatSessionStore::new();
        let session = store.create(None).await.unwrap();
        store
            .append_messages(&session.session_id, &[Message::user("one"), Message::user("one")])
            .await
            .unwrap();
        store
            .append_messages(&session.session_id, &[Message::assistant("two")])
            .await
            .unwrap();

        let loaded = store.get(&session.session_id).await.unwrap().unwrap();
        let contents: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "one", "two"]);
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let store = MemoryChatSessionStore::new();
        assert_eq!(
            store.link_application("nope", "A1").await,
            Err(FormError::SessionNotFound("nope".into()))
        );
        assert!(!store.delete("nope").await.unwrap());
    }
}
