//! 单个申请的表单状态：两份文档条目 + 脏标记
//!
//! `DocumentStateEntry` 的 filled / empty / missing_required / is_submittable 完全由
//! `all_fields` 与 schema 推导，只能经由 `FormStateCache` 的修改接口变化。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::forms::schema::{DocumentType, FieldDefinition, SchemaRegistry};

/// 字段值：文本或复选框
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// 非空字符串或 true 视为已填写
    pub fn is_filled(&self) -> bool {
        match self {
            FieldValue::Text(s) => !s.is_empty(),
            FieldValue::Bool(b) => *b,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }

    /// 从存储中的 JSON 值还原；数字转为文本，其它类型不认
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => Some(FieldValue::Text(n.to_string())),
            serde_json::Value::Null => Some(FieldValue::Text(String::new())),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// 单份文档的状态条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStateEntry {
    pub all_fields: BTreeMap<String, FieldValue>,
    /// 以下三个列表均按 schema 顺序排列
    pub filled_fields: Vec<String>,
    pub empty_fields: Vec<String>,
    pub missing_required: Vec<String>,
    pub is_submittable: bool,
    /// 仅驻留内存，不持久化；重建后回到 0
    pub cursor_index: usize,
}

impl DocumentStateEntry {
    /// 以 schema 空值为底，叠加持久化的值；schema 之外的键一律丢弃
    pub fn from_persisted(
        registry: &SchemaRegistry,
        doc: DocumentType,
        persisted: Option<&BTreeMap<String, FieldValue>>,
    ) -> Self {
        let mut all_fields = registry.empty_defaults(doc);
        if let Some(values) = persisted {
            for (name, value) in values {
                if let Some(slot) = all_fields.get_mut(name) {
                    *slot = value.clone();
                }
            }
        }
        let mut entry = Self {
            all_fields,
            filled_fields: Vec::new(),
            empty_fields: Vec::new(),
            missing_required: Vec::new(),
            is_submittable: false,
            cursor_index: 0,
        };
        entry.recompute(registry.fields_of(doc));
        entry
    }

    pub fn recompute(&mut self, fields: &[FieldDefinition]) {
        self.filled_fields.clear();
        self.empty_fields.clear();
        self.missing_required.clear();
        for def in fields {
            let filled = self
                .all_fields
                .get(def.name)
                .map(FieldValue::is_filled)
                .unwrap_or(false);
            if filled {
                self.filled_fields.push(def.name.to_string());
            } else {
                self.empty_fields.push(def.name.to_string());
                if def.required {
                    self.missing_required.push(def.name.to_string());
                }
            }
        }
        self.is_submittable = self.missing_required.is_empty();
    }

    pub fn is_empty_field(&self, name: &str) -> bool {
        !self
            .all_fields
            .get(name)
            .map(FieldValue::is_filled)
            .unwrap_or(false)
    }

    /// 从 `start` 向后扫描到末尾、再从 0 回绕到 `start` 之前，返回第一个空字段的位置。
    /// `inclusive` 为 false 时跳过 `start` 本身。
    pub fn scan_empty(&self, fields: &[FieldDefinition], start: usize, inclusive: bool) -> Option<usize> {
        let n = fields.len();
        if n == 0 {
            return None;
        }
        let start = start.min(n - 1);
        let first = if inclusive { start } else { start + 1 };
        (first..n)
            .chain(0..start)
            .find(|&i| self.is_empty_field(fields[i].name))
    }

    /// 当前待填字段：光标处（含）起的第一个空字段
    pub fn current_field(&self, fields: &[FieldDefinition]) -> Option<usize> {
        self.scan_empty(fields, self.cursor_index, true)
    }

    pub fn progress(&self) -> u8 {
        let total = self.filled_fields.len() + self.empty_fields.len();
        if total == 0 {
            return 0;
        }
        ((self.filled_fields.len() as f64 * 100.0) / total as f64).round() as u8
    }

    /// 对外快照：只输出 schema 内的键
    pub fn snapshot(&self, fields: &[FieldDefinition]) -> DocumentSnapshot {
        let values = fields
            .iter()
            .filter_map(|def| {
                self.all_fields
                    .get(def.name)
                    .map(|v| (def.name.to_string(), v.clone()))
            })
            .collect();
        DocumentSnapshot {
            fields: values,
            progress: self.progress(),
            submittable: self.is_submittable,
        }
    }
}

/// 单个申请在内存中的完整表单状态
#[derive(Debug, Clone, Serialize)]
pub struct SessionFormState {
    pub application_id: String,
    pub active_document: Option<DocumentType>,
    pub sba_1919: DocumentStateEntry,
    pub sba_413: DocumentStateEntry,
    pub dirty: bool,
    pub last_saved: Option<DateTime<Utc>>,
    /// 每次修改递增；save 据此判断写盘期间是否有新修改
    #[serde(skip)]
    pub revision: u64,
}

impl SessionFormState {
    pub fn new(application_id: impl Into<String>, sba_1919: DocumentStateEntry, sba_413: DocumentStateEntry) -> Self {
        Self {
            application_id: application_id.into(),
            active_document: None,
            sba_1919,
            sba_413,
            dirty: false,
            last_saved: None,
            revision: 0,
        }
    }

    pub fn doc(&self, doc: DocumentType) -> &DocumentStateEntry {
        match doc {
            DocumentType::Sba1919 => &self.sba_1919,
            DocumentType::Sba413 => &self.sba_413,
        }
    }

    pub fn doc_mut(&mut self, doc: DocumentType) -> &mut DocumentStateEntry {
        match doc {
            DocumentType::Sba1919 => &mut self.sba_1919,
            DocumentType::Sba413 => &mut self.sba_413,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }
}

/// update_field 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub next_field: Option<String>,
    pub is_submittable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// skip_field 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkipOutcome {
    pub success: bool,
    pub skipped_field: Option<String>,
    pub next_field: Option<String>,
    pub was_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 两份文档各自的完成百分比（0..=100）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub sba_1919: u8,
    pub sba_413: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSnapshot {
    pub fields: BTreeMap<String, FieldValue>,
    pub progress: u8,
    pub submittable: bool,
}

/// 供外部消费者读取的只读投影
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteSnapshot {
    pub application_id: String,
    pub sba_1919: DocumentSnapshot,
    pub sba_413: DocumentSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::text("a", "A", true),
            FieldDefinition::text("b", "B", true),
            FieldDefinition::text("c", "C", false),
            FieldDefinition::checkbox("d", "D"),
        ]
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_definitions(fields(), fields())
    }

    #[test]
    fn test_overlay_ignores_unknown_keys() {
        let mut persisted = BTreeMap::new();
        persisted.insert("a".to_string(), FieldValue::from("x"));
        persisted.insert("_id".to_string(), FieldValue::from("internal"));
        let entry = DocumentStateEntry::from_persisted(&registry(), DocumentType::Sba1919, Some(&persisted));
        assert!(!entry.all_fields.contains_key("_id"));
        assert_eq!(entry.filled_fields, vec!["a"]);
        assert_eq!(entry.missing_required, vec!["b"]);
        assert!(!entry.is_submittable);
    }

    #[test]
    fn test_filled_and_empty_partition_schema() {
        let mut entry = DocumentStateEntry::from_persisted(&registry(), DocumentType::Sba1919, None);
        entry.all_fields.insert("d".into(), FieldValue::Bool(true));
        entry.all_fields.insert("c".into(), FieldValue::from(""));
        entry.recompute(&fields());
        assert_eq!(entry.filled_fields, vec!["d"]);
        assert_eq!(entry.empty_fields, vec!["a", "b", "c"]);
        assert_eq!(entry.filled_fields.len() + entry.empty_fields.len(), fields().len());
    }

    #[test]
    fn test_scan_wraps() {
        let mut entry = DocumentStateEntry::from_persisted(&registry(), DocumentType::Sba1919, None);
        entry.all_fields.insert("c".into(), FieldValue::from("x"));
        entry.all_fields.insert("d".into(), FieldValue::Bool(true));
        entry.recompute(&fields());
        // 从 b 之后扫描：c、d 已填，回绕到 a
        assert_eq!(entry.scan_empty(&fields(), 1, false), Some(0));
        assert_eq!(entry.scan_empty(&fields(), 1, true), Some(1));
        assert_eq!(entry.scan_empty(&fields(), 0, false), Some(1));
    }

    #[test]
    fn test_progress_rounding() {
        let mut entry = DocumentStateEntry::from_persisted(&registry(), DocumentType::Sba1919, None);
        entry.all_fields.insert("a".into(), FieldValue::from("x"));
        entry.recompute(&fields());
        assert_eq!(entry.progress(), 25);
        entry.all_fields.insert("b".into(), FieldValue::from("x"));
        entry.all_fields.insert("c".into(), FieldValue::from("x"));
        entry.recompute(&fields());
        assert_eq!(entry.progress(), 75);
    }

    #[test]
    fn test_field_value_untagged_json() {
        let v: FieldValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, FieldValue::Bool(true));
        let v: FieldValue = serde_json::from_str("\"Acme\"").unwrap();
        assert_eq!(v, FieldValue::Text("Acme".into()));
        assert_eq!(FieldValue::from_json(&serde_json::json!(42)), Some(FieldValue::from("42")));
    }
}
