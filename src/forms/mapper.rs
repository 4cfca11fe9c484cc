//! 跨文档字段映射器
//!
//! 一个对话里的「统一字段」映射到 0~2 份文档的原生字段名；企业类型等互斥复选框组
//! 在两份文档中同步保持「组内只有一个为 true」。

use std::collections::HashSet;

use serde::Serialize;

use crate::core::FormError;
use crate::forms::cache::FormStateCache;
use crate::forms::definitions::{ENTITY_TYPE_OPTIONS, UNIFIED_FIELDS};
use crate::forms::state::UpdateOutcome;
use crate::forms::{DocumentType, FieldKind, FieldValue, SchemaRegistry};

/// 统一字段映射：至少一侧非空
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifiedFieldMapping {
    pub unified_name: &'static str,
    /// 向用户提问时使用的问句
    pub prompt: &'static str,
    pub sba_1919: Option<&'static str>,
    pub sba_413: Option<&'static str>,
}

impl UnifiedFieldMapping {
    pub fn field_for(&self, doc: DocumentType) -> Option<&'static str> {
        match doc {
            DocumentType::Sba1919 => self.sba_1919,
            DocumentType::Sba413 => self.sba_413,
        }
    }
}

/// 互斥组中的一个选项及其在两份文档中的复选框字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityOption {
    pub option_name: &'static str,
    pub sba_1919: &'static str,
    pub sba_413: &'static str,
}

/// 每侧的写入结果；该文档无映射字段时为 None
#[derive(Debug, Clone, PartialEq)]
pub struct MappedUpdate {
    pub sba_1919: Option<Result<UpdateOutcome, FormError>>,
    pub sba_413: Option<Result<UpdateOutcome, FormError>>,
}

impl MappedUpdate {
    pub fn side(&self, doc: DocumentType) -> Option<&Result<UpdateOutcome, FormError>> {
        match doc {
            DocumentType::Sba1919 => self.sba_1919.as_ref(),
            DocumentType::Sba413 => self.sba_413.as_ref(),
        }
    }

    /// 至少一侧写入成功
    pub fn any_success(&self) -> bool {
        DocumentType::ALL
            .iter()
            .any(|d| matches!(self.side(*d), Some(Ok(o)) if o.success))
    }

    /// 序列化为工具结果中的 data 字段
    pub fn to_json(&self) -> serde_json::Value {
        fn side_json(side: Option<&Result<UpdateOutcome, FormError>>) -> serde_json::Value {
            match side {
                None => serde_json::Value::Null,
                Some(Ok(outcome)) => serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null),
                Some(Err(e)) => serde_json::json!({ "success": false, "message": e.to_string() }),
            }
        }
        serde_json::json!({
            "sba_1919": side_json(self.sba_1919.as_ref()),
            "sba_413": side_json(self.sba_413.as_ref()),
        })
    }
}

/// 给上下文摘要用的统一字段问句
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedPrompt {
    pub field: &'static str,
    pub prompt: &'static str,
}

/// 映射器：持有统一字段表与互斥组，构造时按注册表校验
#[derive(Debug, Clone)]
pub struct FieldMapper {
    unified: Vec<UnifiedFieldMapping>,
    entity_options: Vec<EntityOption>,
}

impl FieldMapper {
    /// 生产映射表
    pub fn sba(registry: &SchemaRegistry) -> Result<Self, FormError> {
        Self::new(registry, UNIFIED_FIELDS.to_vec(), ENTITY_TYPE_OPTIONS.to_vec())
    }

    pub fn new(
        registry: &SchemaRegistry,
        unified: Vec<UnifiedFieldMapping>,
        entity_options: Vec<EntityOption>,
    ) -> Result<Self, FormError> {
        let mut seen = HashSet::new();
        for m in &unified {
            if m.sba_1919.is_none() && m.sba_413.is_none() {
                return Err(FormError::InvalidMapping(format!(
                    "'{}' maps to neither document",
                    m.unified_name
                )));
            }
            if !seen.insert(m.unified_name) {
                return Err(FormError::InvalidMapping(format!(
                    "duplicate unified field '{}'",
                    m.unified_name
                )));
            }
            for doc in DocumentType::ALL {
                if let Some(field) = m.field_for(doc) {
                    if !registry.contains(doc, field) {
                        return Err(FormError::InvalidMapping(format!(
                            "'{}' points at unknown {} field '{}'",
                            m.unified_name, doc, field
                        )));
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        for opt in &entity_options {
            if !seen.insert(opt.option_name) {
                return Err(FormError::InvalidMapping(format!(
                    "duplicate entity option '{}'",
                    opt.option_name
                )));
            }
            for (doc, field) in [(DocumentType::Sba1919, opt.sba_1919), (DocumentType::Sba413, opt.sba_413)] {
                match registry.field(doc, field) {
                    Some(def) if def.kind == FieldKind::Checkbox => {}
                    _ => {
                        return Err(FormError::InvalidMapping(format!(
                            "entity option '{}' needs a checkbox '{}' on {}",
                            opt.option_name, field, doc
                        )))
                    }
                }
            }
        }

        Ok(Self {
            unified,
            entity_options,
        })
    }

    pub fn mapping_of(&self, unified_name: &str) -> Option<&UnifiedFieldMapping> {
        self.unified.iter().find(|m| m.unified_name == unified_name)
    }

    pub fn entity_option(&self, option_name: &str) -> Option<&EntityOption> {
        self.entity_options.iter().find(|o| o.option_name == option_name)
    }

    pub fn entity_option_names(&self) -> Vec<&'static str> {
        self.entity_options.iter().map(|o| o.option_name).collect()
    }

    pub fn unified_prompts(&self) -> Vec<UnifiedPrompt> {
        self.unified
            .iter()
            .map(|m| UnifiedPrompt {
                field: m.unified_name,
                prompt: m.prompt,
            })
            .collect()
    }

    /// 同一个答案写入所有映射到的文档；两侧独立，一侧失败不影响另一侧
    pub async fn apply_unified(
        &self,
        cache: &FormStateCache,
        application_id: &str,
        unified_name: &str,
        value: FieldValue,
    ) -> Result<MappedUpdate, FormError> {
        let mapping = self
            .mapping_of(unified_name)
            .ok_or_else(|| FormError::UnknownMapping(unified_name.to_string()))?;

        let sba_1919 = match mapping.sba_1919 {
            Some(field) => Some(
                cache
                    .update_field(application_id, DocumentType::Sba1919, field, value.clone())
                    .await,
            ),
            None => None,
        };
        let sba_413 = match mapping.sba_413 {
            Some(field) => Some(
                cache
                    .update_field(application_id, DocumentType::Sba413, field, value)
                    .await,
            ),
            None => None,
        };

        Ok(MappedUpdate { sba_1919, sba_413 })
    }

    /// 选中一个互斥选项：先把两份文档里同组其它复选框置 false，再把选中项置 true。
    /// 整批在缓存的一次写锁内完成，不会被观察到「两个同时选中」。
    pub async fn apply_entity_group(
        &self,
        cache: &FormStateCache,
        application_id: &str,
        option_name: &str,
    ) -> Result<MappedUpdate, FormError> {
        let chosen = self
            .entity_option(option_name)
            .ok_or_else(|| FormError::UnknownMapping(option_name.to_string()))?;

        let mut batch = Vec::with_capacity(self.entity_options.len() * 2);
        for other in self.entity_options.iter().filter(|o| o.option_name != chosen.option_name) {
            batch.push((DocumentType::Sba1919, other.sba_1919.to_string(), FieldValue::Bool(false)));
            batch.push((DocumentType::Sba413, other.sba_413.to_string(), FieldValue::Bool(false)));
        }
        batch.push((DocumentType::Sba1919, chosen.sba_1919.to_string(), FieldValue::Bool(true)));
        batch.push((DocumentType::Sba413, chosen.sba_413.to_string(), FieldValue::Bool(true)));

        let mut outcomes = cache.update_fields_atomic(application_id, &batch).await?;
        Ok(MappedUpdate {
            sba_1919: outcomes.remove(&DocumentType::Sba1919).map(Ok),
            sba_413: outcomes.remove(&DocumentType::Sba413).map(Ok),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::forms::store::MemoryFieldStore;

    async fn setup() -> (FieldMapper, FormStateCache) {
        let registry = Arc::new(SchemaRegistry::sba());
        let mapper = FieldMapper::sba(&registry).unwrap();
        let cache = FormStateCache::new(registry, Arc::new(MemoryFieldStore::new()));
        cache.start("A1").await.unwrap();
        (mapper, cache)
    }

    #[test]
    fn test_production_tables_validate() {
        let registry = SchemaRegistry::sba();
        let mapper = FieldMapper::sba(&registry).unwrap();
        assert!(mapper.mapping_of("business_name").is_some());
        assert!(mapper.mapping_of("nope").is_none());
        assert_eq!(mapper.entity_option_names().len(), 5);
    }

    #[test]
    fn test_rejects_mapping_with_no_side() {
        let registry = SchemaRegistry::sba();
        let bad = UnifiedFieldMapping {
            unified_name: "orphan",
            prompt: "?",
            sba_1919: None,
            sba_413: None,
        };
        let err = FieldMapper::new(&registry, vec![bad], vec![]).unwrap_err();
        assert!(matches!(err, FormError::InvalidMapping(_)));
    }

    #[test]
    fn test_rejects_unknown_target_field() {
        let registry = SchemaRegistry::sba();
        let bad = UnifiedFieldMapping {
            unified_name: "typo",
            prompt: "?",
            sba_1919: Some("buisness_name"),
            sba_413: None,
        };
        assert!(FieldMapper::new(&registry, vec![bad], vec![]).is_err());
    }

    #[tokio::test]
    async fn test_unified_writes_both_documents() {
        let (mapper, cache) = setup().await;
        let result = mapper
            .apply_unified(&cache, "A1", "business_name", "Acme Bakery LLC".into())
            .await
            .unwrap();
        assert!(matches!(result.sba_1919, Some(Ok(_))));
        assert!(matches!(result.sba_413, Some(Ok(_))));

        let state = cache.get("A1").await.unwrap();
        assert_eq!(
            state.sba_1919.all_fields.get("business_name"),
            Some(&FieldValue::from("Acme Bakery LLC"))
        );
        assert_eq!(
            state.sba_413.all_fields.get("business_name_of_applicant"),
            Some(&FieldValue::from("Acme Bakery LLC"))
        );
    }

    #[tokio::test]
    async fn test_unified_single_side_leaves_other_untouched() {
        let (mapper, cache) = setup().await;
        let before = cache.get("A1").await.unwrap().sba_413;
        let result = mapper
            .apply_unified(&cache, "A1", "loan_amount", "250000".into())
            .await
            .unwrap();
        assert!(result.sba_413.is_none());
        assert!(result.any_success());
        assert_eq!(cache.get("A1").await.unwrap().sba_413, before);
    }

    #[tokio::test]
    async fn test_unified_without_session_reports_each_side() {
        let registry = Arc::new(SchemaRegistry::sba());
        let mapper = FieldMapper::sba(&registry).unwrap();
        let cache = FormStateCache::new(registry, Arc::new(MemoryFieldStore::new()));
        let result = mapper
            .apply_unified(&cache, "missing", "owner_name", "Ada".into())
            .await
            .unwrap();
        assert!(matches!(result.sba_1919, Some(Err(FormError::SessionNotFound(_)))));
        assert!(matches!(result.sba_413, Some(Err(FormError::SessionNotFound(_)))));
        assert!(!result.any_success());
    }

    #[tokio::test]
    async fn test_entity_group_leaves_exactly_one_selected() {
        let (mapper, cache) = setup().await;
        // 先人为制造多选
        cache.update_field("A1", DocumentType::Sba1919, "entity_llc", true.into()).await.unwrap();
        cache.update_field("A1", DocumentType::Sba1919, "entity_c_corp", true.into()).await.unwrap();
        cache.update_field("A1", DocumentType::Sba413, "business_type_partnership", true.into()).await.unwrap();

        mapper.apply_entity_group(&cache, "A1", "s_corporation").await.unwrap();

        let state = cache.get("A1").await.unwrap();
        for (doc, entry) in [(DocumentType::Sba1919, &state.sba_1919), (DocumentType::Sba413, &state.sba_413)] {
            let selected: Vec<_> = ENTITY_TYPE_OPTIONS
                .iter()
                .map(|o| if doc == DocumentType::Sba1919 { o.sba_1919 } else { o.sba_413 })
                .filter(|f| entry.all_fields.get(*f) == Some(&FieldValue::Bool(true)))
                .collect();
            assert_eq!(selected.len(), 1, "{doc}: {selected:?}");
        }
        assert_eq!(state.sba_1919.all_fields.get("entity_s_corp"), Some(&FieldValue::Bool(true)));
        assert_eq!(state.sba_413.all_fields.get("business_type_s_corp"), Some(&FieldValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_entity_group_unknown_option() {
        let (mapper, cache) = setup().await;
        let err = mapper.apply_entity_group(&cache, "A1", "nonprofit").await.unwrap_err();
        assert!(matches!(err, FormError::UnknownMapping(_)));
        assert!(!cache.get("A1").await.unwrap().dirty);
    }
}
