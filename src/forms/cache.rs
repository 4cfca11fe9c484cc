//! 会话表单状态缓存
//!
//! 进程内以 application_id 为键保存 `SessionFormState`，是会话活跃期间的唯一真相源。
//! 持久化存储只在 start 时读、在 save / end 时写；写盘期间不持有锁，
//! 靠 revision 判断写盘后能否清除脏标记。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::FormError;
use crate::forms::state::{
    CompleteSnapshot, DocumentStateEntry, Progress, SessionFormState, SkipOutcome, UpdateOutcome,
};
use crate::forms::store::FieldStore;
use crate::forms::{DocumentType, FieldValue, SchemaRegistry};

/// 会话表单状态缓存（显式构造并按引用传入，不做全局单例）
pub struct FormStateCache {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn FieldStore>,
    states: RwLock<HashMap<String, SessionFormState>>,
}

impl FormStateCache {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn FieldStore>) -> Self {
        Self {
            registry,
            store,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// 幂等：已在内存中则原样返回，不重新读库（避免旧数据覆盖进行中的编辑）
    pub async fn start(&self, application_id: &str) -> Result<SessionFormState, FormError> {
        if let Some(existing) = self.get(application_id).await {
            return Ok(existing);
        }

        let persisted_1919 = self
            .store
            .load_fields(application_id, DocumentType::Sba1919)
            .await
            .map_err(FormError::PersistenceFailure)?;
        let persisted_413 = self
            .store
            .load_fields(application_id, DocumentType::Sba413)
            .await
            .map_err(FormError::PersistenceFailure)?;

        let state = SessionFormState::new(
            application_id,
            DocumentStateEntry::from_persisted(&self.registry, DocumentType::Sba1919, persisted_1919.as_ref()),
            DocumentStateEntry::from_persisted(&self.registry, DocumentType::Sba413, persisted_413.as_ref()),
        );

        let mut states = self.states.write().await;
        // 读库期间若已有人建好，保留先到者
        let entry = states
            .entry(application_id.to_string())
            .or_insert_with(|| {
                tracing::info!(application_id, "form session started");
                state
            });
        Ok(entry.clone())
    }

    pub async fn has(&self, application_id: &str) -> bool {
        self.states.read().await.contains_key(application_id)
    }

    pub async fn get(&self, application_id: &str) -> Option<SessionFormState> {
        self.states.read().await.get(application_id).cloned()
    }

    pub async fn set_active_document(&self, application_id: &str, doc: DocumentType) -> bool {
        let mut states = self.states.write().await;
        match states.get_mut(application_id) {
            Some(state) => {
                state.active_document = Some(doc);
                true
            }
            None => false,
        }
    }

    /// 写入单个字段，光标移到该字段，返回其后的下一个空字段
    pub async fn update_field(
        &self,
        application_id: &str,
        doc: DocumentType,
        field: &str,
        value: FieldValue,
    ) -> Result<UpdateOutcome, FormError> {
        let mut states = self.states.write().await;
        let state = states
            .get_mut(application_id)
            .ok_or_else(|| FormError::SessionNotFound(application_id.to_string()))?;
        self.apply_update(state, doc, field, value)
    }

    /// 一次写锁内按顺序应用多个字段写入，期间其它读者观察不到中间状态。
    /// 任何字段不在 schema 中或类型不符则整批不生效。返回每份文档最后一次写入的结果。
    pub async fn update_fields_atomic(
        &self,
        application_id: &str,
        batch: &[(DocumentType, String, FieldValue)],
    ) -> Result<HashMap<DocumentType, UpdateOutcome>, FormError> {
        for (doc, field, value) in batch {
            self.checked_value(*doc, field, value.clone())?;
        }

        let mut states = self.states.write().await;
        let state = states
            .get_mut(application_id)
            .ok_or_else(|| FormError::SessionNotFound(application_id.to_string()))?;

        let mut outcomes = HashMap::new();
        for (doc, field, value) in batch {
            let outcome = self.apply_update(state, *doc, field, value.clone())?;
            outcomes.insert(*doc, outcome);
        }
        Ok(outcomes)
    }

    /// schema 校验：字段存在且值与字段类型相符（复选框的 true/false 文本会转成布尔）
    fn checked_value(&self, doc: DocumentType, field: &str, value: FieldValue) -> Result<(usize, FieldValue), FormError> {
        let position = self
            .registry
            .position_of(doc, field)
            .ok_or_else(|| FormError::UnknownField {
                document: doc,
                field: field.to_string(),
            })?;
        let def = &self.registry.fields_of(doc)[position];
        let value = def.accept(value).ok_or_else(|| FormError::FieldKindMismatch {
            document: doc,
            field: field.to_string(),
            expected: def.kind.as_str(),
        })?;
        Ok((position, value))
    }

    fn apply_update(
        &self,
        state: &mut SessionFormState,
        doc: DocumentType,
        field: &str,
        value: FieldValue,
    ) -> Result<UpdateOutcome, FormError> {
        let fields = self.registry.fields_of(doc);
        let (position, value) = self.checked_value(doc, field, value)?;

        let entry = state.doc_mut(doc);
        entry.all_fields.insert(field.to_string(), value);
        entry.recompute(fields);
        entry.cursor_index = position;

        let next_field = entry
            .scan_empty(fields, position, false)
            .map(|i| fields[i].name.to_string());
        let is_submittable = entry.is_submittable;
        state.mark_dirty();

        tracing::debug!(
            application_id = %state.application_id,
            document = %doc,
            field,
            "field updated"
        );

        let message = next_field.is_none().then(|| "All fields filled".to_string());
        Ok(UpdateOutcome {
            success: true,
            next_field,
            is_submittable,
            message,
        })
    }

    /// 跳过第一个空字段（不写值），光标前移到它之后的下一个空字段
    pub async fn skip_field(&self, application_id: &str, doc: DocumentType) -> Result<SkipOutcome, FormError> {
        let mut states = self.states.write().await;
        let state = states
            .get_mut(application_id)
            .ok_or_else(|| FormError::SessionNotFound(application_id.to_string()))?;

        let fields = self.registry.fields_of(doc);
        let entry = state.doc_mut(doc);
        if fields.is_empty() {
            return Ok(SkipOutcome {
                success: false,
                skipped_field: None,
                next_field: None,
                was_required: false,
                message: Some("Document has no fields".to_string()),
            });
        }

        let first_empty = entry
            .empty_fields
            .first()
            .and_then(|name| fields.iter().position(|def| def.name == name.as_str()));
        let Some(current) = first_empty else {
            let at_cursor = &fields[entry.cursor_index.min(fields.len() - 1)];
            return Ok(SkipOutcome {
                success: true,
                skipped_field: Some(at_cursor.name.to_string()),
                next_field: None,
                was_required: at_cursor.required,
                message: Some("All fields filled".to_string()),
            });
        };

        let skipped = &fields[current];
        let next = entry.scan_empty(fields, current, false);
        entry.cursor_index = next.unwrap_or(current);

        let message = match next {
            None => Some("No other empty fields".to_string()),
            Some(_) if skipped.required => Some(format!(
                "'{}' is required and must be completed before submission",
                self.registry.label_of(doc, skipped.name)
            )),
            Some(_) => None,
        };

        Ok(SkipOutcome {
            success: true,
            skipped_field: Some(skipped.name.to_string()),
            next_field: next.map(|i| fields[i].name.to_string()),
            was_required: skipped.required,
            message,
        })
    }

    /// 当前待填字段名（只读，供上下文摘要使用）
    pub async fn current_field(&self, application_id: &str, doc: DocumentType) -> Option<String> {
        let states = self.states.read().await;
        let fields = self.registry.fields_of(doc);
        states
            .get(application_id)
            .and_then(|s| s.doc(doc).current_field(fields))
            .map(|i| fields[i].name.to_string())
    }

    /// 脏时字段级写回两份文档；失败保持脏标记，下次调用自然重试
    pub async fn save(&self, application_id: &str) -> bool {
        let (revision, fields_1919, fields_413) = {
            let states = self.states.read().await;
            match states.get(application_id) {
                Some(state) if state.dirty => (
                    state.revision,
                    state.sba_1919.all_fields.clone(),
                    state.sba_413.all_fields.clone(),
                ),
                Some(_) => return true,
                None => {
                    tracing::warn!(application_id, "save requested for unknown form session");
                    return false;
                }
            }
        };

        for (doc, fields) in [
            (DocumentType::Sba1919, &fields_1919),
            (DocumentType::Sba413, &fields_413),
        ] {
            if let Err(e) = self.store.save_fields(application_id, doc, fields).await {
                tracing::warn!(application_id, document = %doc, error = %e, "form save failed, state stays dirty");
                return false;
            }
        }

        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(application_id) {
            if state.revision == revision {
                state.dirty = false;
            }
            state.last_saved = Some(chrono::Utc::now());
        }
        tracing::info!(application_id, "form state saved");
        true
    }

    /// 先保存再驱逐；无论保存成败都移出内存
    pub async fn end(&self, application_id: &str) -> bool {
        let saved = self.save(application_id).await;
        if self.states.write().await.remove(application_id).is_some() {
            tracing::info!(application_id, saved, "form session ended");
        }
        saved
    }

    /// 刷写所有脏状态（关闭时使用），返回失败个数
    pub async fn save_all(&self) -> usize {
        let ids: Vec<String> = self
            .states
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(id, _)| id.clone())
            .collect();
        let mut failures = 0;
        for id in ids {
            if !self.save(&id).await {
                failures += 1;
            }
        }
        failures
    }

    pub async fn progress(&self, application_id: &str) -> Option<Progress> {
        let states = self.states.read().await;
        states.get(application_id).map(|s| Progress {
            sba_1919: s.sba_1919.progress(),
            sba_413: s.sba_413.progress(),
        })
    }

    pub async fn complete_snapshot(&self, application_id: &str) -> Option<CompleteSnapshot> {
        let states = self.states.read().await;
        states.get(application_id).map(|s| CompleteSnapshot {
            application_id: s.application_id.clone(),
            sba_1919: s.sba_1919.snapshot(self.registry.fields_of(DocumentType::Sba1919)),
            sba_413: s.sba_413.snapshot(self.registry.fields_of(DocumentType::Sba413)),
        })
    }

    pub async fn active_count(&self) -> usize {
        self.states.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::store::MemoryFieldStore;
    use crate::forms::FieldDefinition;

    fn small_registry() -> Arc<SchemaRegistry> {
        let fields = vec![
            FieldDefinition::text("first", "First", true),
            FieldDefinition::text("second", "Second", true),
            FieldDefinition::text("notes", "Notes", false),
        ];
        Arc::new(SchemaRegistry::from_definitions(fields.clone(), fields))
    }

    fn cache_with(store: Arc<MemoryFieldStore>) -> FormStateCache {
        FormStateCache::new(small_registry(), store)
    }

    #[tokio::test]
    async fn test_fresh_state_not_submittable() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        let state = cache.start("A1").await.unwrap();
        assert!(!state.sba_1919.is_submittable);
        assert!(!state.sba_413.is_submittable);
        assert!(!state.dirty);
        assert_eq!(state.sba_1919.missing_required, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_fill_required_on_one_document() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        let before_413 = cache.get("A1").await.unwrap().sba_413;

        cache.update_field("A1", DocumentType::Sba1919, "first", "x".into()).await.unwrap();
        let outcome = cache
            .update_field("A1", DocumentType::Sba1919, "second", "y".into())
            .await
            .unwrap();
        assert!(outcome.is_submittable);
        assert_eq!(outcome.next_field.as_deref(), Some("notes"));

        let state = cache.get("A1").await.unwrap();
        assert!(state.sba_1919.is_submittable);
        assert!(!state.sba_413.is_submittable);
        assert_eq!(state.sba_413, before_413);
        assert!(state.dirty);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store = Arc::new(MemoryFieldStore::new());
        let cache = cache_with(store.clone());
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "first", "mine".into()).await.unwrap();

        // 存储里出现了别的值，但内存状态不应被覆盖
        store.seed("A1", DocumentType::Sba1919, serde_json::json!({"first": "stale"}));
        let again = cache.start("A1").await.unwrap();
        assert_eq!(again.sba_1919.all_fields.get("first"), Some(&FieldValue::from("mine")));
    }

    #[tokio::test]
    async fn test_start_overlays_persisted_values() {
        let store = Arc::new(MemoryFieldStore::new());
        store.seed(
            "A1",
            DocumentType::Sba413,
            serde_json::json!({"first": "saved", "_internal": {"rev": 2}, "unknown": "x"}),
        );
        let cache = cache_with(store);
        let state = cache.start("A1").await.unwrap();
        assert_eq!(state.sba_413.filled_fields, vec!["first"]);
        assert!(!state.sba_413.all_fields.contains_key("unknown"));
        assert_eq!(state.sba_413.cursor_index, 0);
    }

    #[tokio::test]
    async fn test_update_unknown_field_and_missing_session() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        let err = cache
            .update_field("nope", DocumentType::Sba1919, "first", "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, FormError::SessionNotFound(_)));

        cache.start("A1").await.unwrap();
        let err = cache
            .update_field("A1", DocumentType::Sba1919, "bogus", "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, FormError::UnknownField { .. }));
        assert!(!cache.get("A1").await.unwrap().dirty);
    }

    fn mixed_registry() -> Arc<SchemaRegistry> {
        let fields = vec![
            FieldDefinition::text("first", "First", true),
            FieldDefinition::text("notes", "Notes", false),
            FieldDefinition::checkbox("agree", "Agree"),
        ];
        Arc::new(SchemaRegistry::from_definitions(fields.clone(), fields))
    }

    #[tokio::test]
    async fn test_filled_iff_non_empty_or_true() {
        let cache = FormStateCache::new(mixed_registry(), Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        for (field, value, filled) in [
            ("notes", FieldValue::from("v"), true),
            ("notes", FieldValue::from(""), false),
            ("agree", FieldValue::Bool(true), true),
            ("agree", FieldValue::Bool(false), false),
        ] {
            cache.update_field("A1", DocumentType::Sba413, field, value).await.unwrap();
            let state = cache.get("A1").await.unwrap();
            assert_eq!(state.sba_413.filled_fields.contains(&field.to_string()), filled);
            let required: Vec<_> = state
                .sba_413
                .empty_fields
                .iter()
                .filter(|f| cache.registry().is_required(DocumentType::Sba413, f))
                .cloned()
                .collect();
            assert_eq!(state.sba_413.missing_required, required);
            assert_eq!(state.sba_413.is_submittable, required.is_empty());
        }
    }

    #[tokio::test]
    async fn test_checkbox_accepts_true_false_text_only() {
        let cache = FormStateCache::new(mixed_registry(), Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();

        cache.update_field("A1", DocumentType::Sba1919, "agree", "no".into()).await.unwrap();
        let state = cache.get("A1").await.unwrap();
        assert_eq!(state.sba_1919.all_fields["agree"], FieldValue::Bool(false));
        assert!(!state.sba_1919.filled_fields.contains(&"agree".to_string()));

        cache.update_field("A1", DocumentType::Sba1919, "agree", "TRUE".into()).await.unwrap();
        assert_eq!(cache.get("A1").await.unwrap().sba_1919.all_fields["agree"], FieldValue::Bool(true));

        let err = cache
            .update_field("A1", DocumentType::Sba1919, "agree", "maybe".into())
            .await
            .unwrap_err();
        assert!(matches!(err, FormError::FieldKindMismatch { expected: "checkbox", .. }));
        assert_eq!(cache.get("A1").await.unwrap().sba_1919.all_fields["agree"], FieldValue::Bool(true));
    }

    #[tokio::test]
    async fn test_text_field_rejects_bool() {
        let cache = FormStateCache::new(mixed_registry(), Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        let err = cache
            .update_field("A1", DocumentType::Sba413, "first", FieldValue::Bool(true))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "field_kind_mismatch");
        let state = cache.get("A1").await.unwrap();
        assert!(!state.dirty);
        assert_eq!(state.sba_413.all_fields["first"], FieldValue::from(""));
    }

    #[tokio::test]
    async fn test_atomic_batch_rejects_kind_mismatch_as_a_whole() {
        let cache = FormStateCache::new(mixed_registry(), Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        let batch = vec![
            (DocumentType::Sba1919, "agree".to_string(), FieldValue::Bool(true)),
            (DocumentType::Sba1919, "notes".to_string(), FieldValue::Bool(true)),
        ];
        let err = cache.update_fields_atomic("A1", &batch).await.unwrap_err();
        assert!(matches!(err, FormError::FieldKindMismatch { .. }));
        let state = cache.get("A1").await.unwrap();
        assert_eq!(state.sba_1919.all_fields["agree"], FieldValue::Bool(false));
        assert!(!state.dirty);
    }

    #[tokio::test]
    async fn test_next_field_wraps_and_reports_all_filled() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        let o = cache.update_field("A1", DocumentType::Sba1919, "notes", "n".into()).await.unwrap();
        assert_eq!(o.next_field.as_deref(), Some("first"));
        cache.update_field("A1", DocumentType::Sba1919, "first", "f".into()).await.unwrap();
        let o = cache.update_field("A1", DocumentType::Sba1919, "second", "s".into()).await.unwrap();
        assert_eq!(o.next_field, None);
        assert_eq!(o.message.as_deref(), Some("All fields filled"));
    }

    #[tokio::test]
    async fn test_skip_takes_first_empty_field() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "second", "s".into()).await.unwrap();

        // 空字段：first、notes；光标在 second，但跳过的仍是 empty_fields 的第一个
        let state = cache.get("A1").await.unwrap();
        assert_eq!(state.sba_1919.empty_fields, vec!["first", "notes"]);
        let s1 = cache.skip_field("A1", DocumentType::Sba1919).await.unwrap();
        assert_eq!(s1.skipped_field.as_deref(), Some("first"));
        assert!(s1.was_required);
        assert_eq!(s1.next_field.as_deref(), Some("notes"));
        assert!(s1.message.unwrap().contains("required"));
        assert_eq!(cache.get("A1").await.unwrap().sba_1919.cursor_index, 2);

        let mut visited = std::collections::HashSet::new();
        for _ in 0..10 {
            let s = cache.skip_field("A1", DocumentType::Sba1919).await.unwrap();
            let skipped = s.skipped_field.unwrap();
            assert_ne!(skipped, "second");
            visited.insert(skipped);
        }
        assert!(visited.len() <= 2);
        // 跳过不写值
        let state = cache.get("A1").await.unwrap();
        assert_eq!(state.sba_1919.filled_fields, vec!["second"]);
    }

    #[tokio::test]
    async fn test_skip_last_empty_field_reports_no_other() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba413, "first", "f".into()).await.unwrap();
        cache.update_field("A1", DocumentType::Sba413, "second", "s".into()).await.unwrap();

        let s = cache.skip_field("A1", DocumentType::Sba413).await.unwrap();
        assert_eq!(s.skipped_field.as_deref(), Some("notes"));
        assert!(!s.was_required);
        assert_eq!(s.next_field, None);
        assert_eq!(s.message.as_deref(), Some("No other empty fields"));
    }

    #[tokio::test]
    async fn test_skip_with_nothing_empty() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        for f in ["first", "second", "notes"] {
            cache.update_field("A1", DocumentType::Sba413, f, "v".into()).await.unwrap();
        }
        let s = cache.skip_field("A1", DocumentType::Sba413).await.unwrap();
        assert_eq!(s.skipped_field.as_deref(), Some("notes"));
        assert_eq!(s.next_field, None);
    }

    #[tokio::test]
    async fn test_save_twice_writes_once() {
        let store = Arc::new(MemoryFieldStore::new());
        let cache = cache_with(store.clone());
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "first", "x".into()).await.unwrap();

        assert!(cache.save("A1").await);
        let after_first = store.write_count();
        assert_eq!(after_first, 2);
        assert!(cache.save("A1").await);
        assert_eq!(store.write_count(), after_first);

        let state = cache.get("A1").await.unwrap();
        assert!(!state.dirty);
        assert!(state.last_saved.is_some());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_dirty_and_retries() {
        let store = Arc::new(MemoryFieldStore::new());
        let cache = cache_with(store.clone());
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "first", "x".into()).await.unwrap();

        store.set_fail_writes(true);
        assert!(!cache.save("A1").await);
        assert!(cache.get("A1").await.unwrap().dirty);

        store.set_fail_writes(false);
        assert!(cache.save("A1").await);
        assert!(!cache.get("A1").await.unwrap().dirty);
        assert_eq!(
            store.raw("A1", DocumentType::Sba1919).unwrap().get("first"),
            Some(&serde_json::json!("x"))
        );
    }

    #[tokio::test]
    async fn test_end_evicts_even_when_save_fails() {
        let store = Arc::new(MemoryFieldStore::new());
        let cache = cache_with(store.clone());
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "first", "x".into()).await.unwrap();
        store.set_fail_writes(true);

        assert!(!cache.end("A1").await);
        assert!(!cache.has("A1").await);
    }

    #[tokio::test]
    async fn test_restart_resets_cursor() {
        let store = Arc::new(MemoryFieldStore::new());
        let cache = cache_with(store.clone());
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "second", "s".into()).await.unwrap();
        assert_eq!(cache.get("A1").await.unwrap().sba_1919.cursor_index, 1);
        assert!(cache.end("A1").await);

        let rebuilt = cache.start("A1").await.unwrap();
        assert_eq!(rebuilt.sba_1919.cursor_index, 0);
        assert_eq!(rebuilt.sba_1919.filled_fields, vec!["second"]);
    }

    #[tokio::test]
    async fn test_progress_is_per_document() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "first", "x".into()).await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "second", "x".into()).await.unwrap();
        cache.update_field("A1", DocumentType::Sba413, "notes", "x".into()).await.unwrap();
        let p = cache.progress("A1").await.unwrap();
        assert_eq!(p.sba_1919, 67);
        assert_eq!(p.sba_413, 33);
        assert!(cache.progress("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_excludes_storage_bookkeeping() {
        let store = Arc::new(MemoryFieldStore::new());
        store.seed("A1", DocumentType::Sba1919, serde_json::json!({"_id": "doc-1", "first": "x"}));
        let cache = cache_with(store);
        cache.start("A1").await.unwrap();
        let snap = cache.complete_snapshot("A1").await.unwrap();
        assert!(!snap.sba_1919.fields.contains_key("_id"));
        assert_eq!(snap.sba_1919.fields.len(), 3);
        assert_eq!(snap.sba_1919.progress, 33);
        assert!(!snap.sba_1919.submittable);
    }

    #[tokio::test]
    async fn test_set_active_document() {
        let cache = cache_with(Arc::new(MemoryFieldStore::new()));
        assert!(!cache.set_active_document("A1", DocumentType::Sba413).await);
        cache.start("A1").await.unwrap();
        assert!(cache.set_active_document("A1", DocumentType::Sba413).await);
        assert_eq!(cache.get("A1").await.unwrap().active_document, Some(DocumentType::Sba413));
    }
}
