//! 字段持久化存储
//!
//! 只在 `FormStateCache::start` 时读、在 `save` / `end` 时写。写入是字段级 upsert，
//! 不整文档覆盖，避免冲掉其它代码路径写入的字段。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::forms::{DocumentType, FieldValue};

/// 持久化存储接口
#[async_trait]
pub trait FieldStore: Send + Sync {
    /// 读取某申请某文档的字段；从未写过时返回 None
    async fn load_fields(
        &self,
        application_id: &str,
        doc: DocumentType,
    ) -> Result<Option<BTreeMap<String, FieldValue>>, String>;

    /// 字段级 upsert
    async fn save_fields(
        &self,
        application_id: &str,
        doc: DocumentType,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<(), String>;
}

/// 内存存储：值以 JSON 保存，可混入非 schema 的簿记键；带写入计数便于测试
#[derive(Default)]
pub struct MemoryFieldStore {
    documents: Mutex<HashMap<(String, DocumentType), BTreeMap<String, serde_json::Value>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入原始 JSON（模拟其它代码路径或存储自带的簿记字段）
    pub fn seed(&self, application_id: &str, doc: DocumentType, values: serde_json::Value) {
        if let (Ok(mut docs), serde_json::Value::Object(map)) = (self.documents.lock(), values) {
            let entry = docs.entry((application_id.to_string(), doc)).or_default();
            entry.extend(map);
        }
    }

    /// 读取原始 JSON（含簿记键）
    pub fn raw(&self, application_id: &str, doc: DocumentType) -> Option<BTreeMap<String, serde_json::Value>> {
        self.documents
            .lock()
            .ok()
            .and_then(|docs| docs.get(&(application_id.to_string(), doc)).cloned())
    }

    /// save_fields 调用次数（每份文档计一次）
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 令后续写入失败（模拟存储不可用）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FieldStore for MemoryFieldStore {
    async fn load_fields(
        &self,
        application_id: &str,
        doc: DocumentType,
    ) -> Result<Option<BTreeMap<String, FieldValue>>, String> {
        let docs = self
            .documents
            .lock()
            .map_err(|e| format!("field store lock poisoned: {e}"))?;
        Ok(docs.get(&(application_id.to_string(), doc)).map(|raw| {
            raw.iter()
                .filter_map(|(k, v)| FieldValue::from_json(v).map(|fv| (k.clone(), fv)))
                .collect()
        }))
    }

    async fn save_fields(
        &self,
        application_id: &str,
        doc: DocumentType,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<(), String> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err("field store unavailable".to_string());
        }
        let mut docs = self
            .documents
            .lock()
            .map_err(|e| format!("field store lock poisoned: {e}"))?;
        let entry = docs.entry((application_id.to_string(), doc)).or_default();
        for (name, value) in fields {
            entry.insert(name.clone(), value.to_json());
        }
        Ok(())
    }
}

#[cfg(feature = "async-sqlite")]
pub use sqlx_impl::SqliteFieldStore;

#[cfg(feature = "async-sqlite")]
mod sqlx_impl {
    use std::collections::BTreeMap;
    use std::path::Path;

    use async_trait::async_trait;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
    use sqlx::Row;

    use super::FieldStore;
    use crate::forms::{DocumentType, FieldValue};

    /// SQLite 字段存储：每个字段一行，主键 (application_id, document, field)
    pub struct SqliteFieldStore {
        pool: SqlitePool,
    }

    impl SqliteFieldStore {
        pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
            let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await?;

            let store = Self { pool };
            store.init_tables().await?;
            Ok(store)
        }

        pub async fn from_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
            let store = Self { pool };
            store.init_tables().await?;
            Ok(store)
        }

        async fn init_tables(&self) -> Result<(), sqlx::Error> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS form_fields (
                    application_id TEXT NOT NULL,
                    document TEXT NOT NULL,
                    field TEXT NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (application_id, document, field)
                )",
            )
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl FieldStore for SqliteFieldStore {
        async fn load_fields(
            &self,
            application_id: &str,
            doc: DocumentType,
        ) -> Result<Option<BTreeMap<String, FieldValue>>, String> {
            let rows = sqlx::query(
                "SELECT field, value FROM form_fields WHERE application_id = ? AND document = ?",
            )
            .bind(application_id)
            .bind(doc.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

            if rows.is_empty() {
                return Ok(None);
            }

            let mut fields = BTreeMap::new();
            for row in rows {
                let field: String = row.get("field");
                let raw: String = row.get("value");
                match serde_json::from_str::<serde_json::Value>(&raw)
                    .ok()
                    .as_ref()
                    .and_then(FieldValue::from_json)
                {
                    Some(value) => {
                        fields.insert(field, value);
                    }
                    None => tracing::warn!(application_id, field = %field, "skipping unreadable stored value"),
                }
            }
            Ok(Some(fields))
        }

        async fn save_fields(
            &self,
            application_id: &str,
            doc: DocumentType,
            fields: &BTreeMap<String, FieldValue>,
        ) -> Result<(), String> {
            let now = chrono::Utc::now().to_rfc3339();
            let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;
            for (name, value) in fields {
                sqlx::query(
                    "INSERT INTO form_fields (application_id, document, field, value, updated_at)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(application_id, document, field)
                     DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                )
                .bind(application_id)
                .bind(doc.as_str())
                .bind(name)
                .bind(value.to_json().to_string())
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.to_string())?;
            }
            tx.commit().await.map_err(|e| e.to_string())?;
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_upsert_keeps_other_keys() {
        let store = MemoryFieldStore::new();
        store.seed("A1", DocumentType::Sba1919, serde_json::json!({"_rev": "3", "business_name": "Old"}));

        let mut fields = BTreeMap::new();
        fields.insert("business_name".to_string(), FieldValue::from("New"));
        store.save_fields("A1", DocumentType::Sba1919, &fields).await.unwrap();

        let raw = store.raw("A1", DocumentType::Sba1919).unwrap();
        assert_eq!(raw.get("_rev"), Some(&serde_json::json!("3")));
        assert_eq!(raw.get("business_name"), Some(&serde_json::json!("New")));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failure_mode() {
        let store = MemoryFieldStore::new();
        store.set_fail_writes(true);
        let result = store.save_fields("A1", DocumentType::Sba413, &BTreeMap::new()).await;
        assert!(result.is_err());
        assert!(store.load_fields("A1", DocumentType::Sba413).await.unwrap().is_none());
    }
}
