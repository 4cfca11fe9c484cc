//! 字段 Schema 注册表
//!
//! 每种文档类型一份只读字段定义（名称、标签、是否必填、值类型），进程启动时构建一次，
//! 之后通过 `Arc<SchemaRegistry>` 在缓存、映射器与编排器之间共享，不提供任何修改接口。

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::forms::definitions::{SBA_1919_FIELDS, SBA_413_FIELDS};
use crate::forms::FieldValue;

/// 文档类型：两份结构独立、申请人数据部分重叠的输出文档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// SBA Form 1919：借款人信息表
    Sba1919,
    /// SBA Form 413：个人财务报表
    Sba413,
}

impl DocumentType {
    pub const ALL: [DocumentType; 2] = [DocumentType::Sba1919, DocumentType::Sba413];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Sba1919 => "sba_1919",
            DocumentType::Sba413 => "sba_413",
        }
    }

    /// 展示给用户 / LLM 的文档标题
    pub fn title(&self) -> &'static str {
        match self {
            DocumentType::Sba1919 => "SBA Form 1919 (Borrower Information)",
            DocumentType::Sba413 => "SBA Form 413 (Personal Financial Statement)",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sba_1919" | "1919" | "form_1919" => Some(DocumentType::Sba1919),
            "sba_413" | "413" | "form_413" => Some(DocumentType::Sba413),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 字段值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Checkbox,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Checkbox => "checkbox",
        }
    }
}

/// 单个字段定义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: &'static str,
    /// 表单上的显示标签；为空时回退到字段名
    pub label: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldDefinition {
    pub const fn text(name: &'static str, label: &'static str, required: bool) -> Self {
        Self {
            name,
            label,
            required,
            kind: FieldKind::Text,
        }
    }

    pub const fn checkbox(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            required: false,
            kind: FieldKind::Checkbox,
        }
    }

    /// 该类型的空值：文本为 ""，复选框为 false
    pub fn empty_value(&self) -> FieldValue {
        match self.kind {
            FieldKind::Text => FieldValue::Text(String::new()),
            FieldKind::Checkbox => FieldValue::Bool(false),
        }
    }

    /// 按字段类型接收写入值：复选框认 true/false/yes/no 文本，文本字段不收布尔值
    pub fn accept(&self, value: FieldValue) -> Option<FieldValue> {
        match (self.kind, value) {
            (FieldKind::Text, v @ FieldValue::Text(_)) => Some(v),
            (FieldKind::Text, FieldValue::Bool(_)) => None,
            (FieldKind::Checkbox, v @ FieldValue::Bool(_)) => Some(v),
            (FieldKind::Checkbox, FieldValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(FieldValue::Bool(true)),
                "false" | "no" | "" => Some(FieldValue::Bool(false)),
                _ => None,
            },
        }
    }
}

/// 只读字段注册表：两种文档各一份有序字段表
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    sba_1919: Vec<FieldDefinition>,
    sba_413: Vec<FieldDefinition>,
}

impl SchemaRegistry {
    /// 生产用字段表（SBA 1919 + SBA 413）
    pub fn sba() -> Self {
        Self::from_definitions(SBA_1919_FIELDS.to_vec(), SBA_413_FIELDS.to_vec())
    }

    pub fn from_definitions(sba_1919: Vec<FieldDefinition>, sba_413: Vec<FieldDefinition>) -> Self {
        Self { sba_1919, sba_413 }
    }

    /// 按 schema 顺序返回字段定义
    pub fn fields_of(&self, doc: DocumentType) -> &[FieldDefinition] {
        match doc {
            DocumentType::Sba1919 => &self.sba_1919,
            DocumentType::Sba413 => &self.sba_413,
        }
    }

    pub fn required_of(&self, doc: DocumentType) -> Vec<&'static str> {
        self.fields_of(doc)
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect()
    }

    /// 空值 map：每次调用都新分配，调用方可随意修改
    pub fn empty_defaults(&self, doc: DocumentType) -> BTreeMap<String, FieldValue> {
        self.fields_of(doc)
            .iter()
            .map(|f| (f.name.to_string(), f.empty_value()))
            .collect()
    }

    pub fn field(&self, doc: DocumentType, name: &str) -> Option<&FieldDefinition> {
        self.fields_of(doc).iter().find(|f| f.name == name)
    }

    /// 字段标签；未定义字段或空标签回退到字段名本身
    pub fn label_of<'a>(&self, doc: DocumentType, name: &'a str) -> &'a str {
        match self.field(doc, name) {
            Some(f) if !f.label.is_empty() => f.label,
            _ => name,
        }
    }

    pub fn is_required(&self, doc: DocumentType, name: &str) -> bool {
        self.field(doc, name).map(|f| f.required).unwrap_or(false)
    }

    pub fn position_of(&self, doc: DocumentType, name: &str) -> Option<usize> {
        self.fields_of(doc).iter().position(|f| f.name == name)
    }

    pub fn contains(&self, doc: DocumentType, name: &str) -> bool {
        self.position_of(doc, name).is_some()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::sba()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_defaults_are_fresh() {
        let registry = SchemaRegistry::sba();
        let mut a = registry.empty_defaults(DocumentType::Sba1919);
        a.insert("business_name".into(), FieldValue::Text("Acme".into()));
        let b = registry.empty_defaults(DocumentType::Sba1919);
        assert_eq!(b.get("business_name"), Some(&FieldValue::Text(String::new())));
    }

    #[test]
    fn test_checkbox_defaults_false() {
        let registry = SchemaRegistry::sba();
        let defaults = registry.empty_defaults(DocumentType::Sba1919);
        assert_eq!(defaults.get("entity_llc"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_label_falls_back_to_name() {
        let registry = SchemaRegistry::sba();
        assert_eq!(
            registry.label_of(DocumentType::Sba413, "cash_on_hand"),
            "Cash on Hand and in Banks"
        );
        assert_eq!(registry.label_of(DocumentType::Sba413, "no_such"), "no_such");
    }

    #[test]
    fn test_required_subset() {
        let registry = SchemaRegistry::sba();
        for doc in DocumentType::ALL {
            let required = registry.required_of(doc);
            assert!(!required.is_empty());
            for name in required {
                assert!(registry.is_required(doc, name));
                assert!(registry.contains(doc, name));
            }
        }
    }

    #[test]
    fn test_field_names_unique() {
        let registry = SchemaRegistry::sba();
        for doc in DocumentType::ALL {
            let mut names: Vec<_> = registry.fields_of(doc).iter().map(|f| f.name).collect();
            let len = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), len, "duplicate field in {doc}");
        }
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!(DocumentType::parse("SBA_1919"), Some(DocumentType::Sba1919));
        assert_eq!(DocumentType::parse("413"), Some(DocumentType::Sba413));
        assert_eq!(DocumentType::parse("w9"), None);
    }
}
