//! 工具调用：按工具名闭合的带标签联合体
//!
//! LLM 给出的 `{name, args}` 在边界处一次性校验为强类型 `ToolCall`；未知工具名与参数形状错误
//! 分别报 `ToolCallError::UnknownTool` / `MalformedArgs`，下游不再做零散的字段存在性检查。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forms::DocumentType;
use crate::llm::RawToolCall;

/// 无参数工具
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectDocumentArgs {
    /// 切换到的文档：sba_1919 或 sba_413
    pub document: DocumentType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateFieldArgs {
    pub document: DocumentType,
    /// 文档原生字段名
    pub field: String,
    /// 文本字段传字符串，复选框传 true/false
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SetAnswerArgs {
    /// 统一字段名，会同时写入所有映射到的文档
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectEntityTypeArgs {
    /// sole_proprietor / partnership / c_corporation / s_corporation / llc
    pub option: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkipFieldArgs {
    pub document: DocumentType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LookupApplicationArgs {
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreateApplicationArgs {
    pub business_name: String,
    pub owner_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreEligibilityArgs {
    /// 申请金额（美元）
    pub requested_amount: f64,
    #[serde(default)]
    pub years_in_business: Option<f64>,
    #[serde(default)]
    pub credit_score: Option<u32>,
    #[serde(default)]
    pub annual_revenue: Option<f64>,
}

/// 所有合法工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    /// 设置当前正在填写的文档
    SelectDocument(SelectDocumentArgs),
    /// 按文档原生字段名写入一个值
    UpdateField(UpdateFieldArgs),
    /// 按统一字段名写入，可能同时更新两份文档
    SetAnswer(SetAnswerArgs),
    /// 选择企业类型（两份文档中互斥复选框同步）
    SelectEntityType(SelectEntityTypeArgs),
    /// 跳过当前字段
    SkipField(SkipFieldArgs),
    /// 查询两份文档的完成进度
    GetProgress(NoArgs),
    /// 按申请号或邮箱查找已有申请，并关联到当前对话
    LookupApplication(LookupApplicationArgs),
    /// 新建申请并关联到当前对话
    CreateApplication(CreateApplicationArgs),
    /// 预审资格评分
    ScoreEligibility(ScoreEligibilityArgs),
    /// 两份文档都可提交时，生成最终文档
    FinalizeDocuments(NoArgs),
}

/// 工具名与给 LLM 的一行说明
pub const TOOL_CATALOG: &[(&str, &str)] = &[
    ("select_document", "Switch the document being filled. Args: {\"document\": \"sba_1919\"|\"sba_413\"}"),
    ("update_field", "Write one native field. Args: {\"document\", \"field\", \"value\"}"),
    ("set_answer", "Write a unified answer to every document that has it. Args: {\"field\", \"value\"}"),
    ("select_entity_type", "Pick the business entity type in both documents. Args: {\"option\"}"),
    ("skip_field", "Skip the current field of a document. Args: {\"document\"}"),
    ("get_progress", "Report completion percentages. Args: {}"),
    ("lookup_application", "Find an existing application. Args: {\"application_id\"?, \"email\"?}"),
    ("create_application", "Open a new application. Args: {\"business_name\", \"owner_name\", \"email\"}"),
    ("score_eligibility", "Pre-qualify the loan. Args: {\"requested_amount\", \"years_in_business\"?, \"credit_score\"?, \"annual_revenue\"?}"),
    ("finalize_documents", "Render final documents once both are submittable. Args: {}"),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Malformed arguments for {tool}: {reason}")]
    MalformedArgs { tool: String, reason: String },
}

impl ToolCall {
    /// 在边界处校验原始调用
    pub fn parse(raw: &RawToolCall) -> Result<Self, ToolCallError> {
        if !TOOL_CATALOG.iter().any(|(name, _)| *name == raw.name) {
            return Err(ToolCallError::UnknownTool(raw.name.clone()));
        }
        let args = if raw.args.is_null() {
            serde_json::json!({})
        } else {
            raw.args.clone()
        };
        serde_json::from_value(serde_json::json!({ "tool": raw.name, "args": args })).map_err(|e| {
            ToolCallError::MalformedArgs {
                tool: raw.name.clone(),
                reason: e.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SelectDocument(_) => "select_document",
            ToolCall::UpdateField(_) => "update_field",
            ToolCall::SetAnswer(_) => "set_answer",
            ToolCall::SelectEntityType(_) => "select_entity_type",
            ToolCall::SkipField(_) => "skip_field",
            ToolCall::GetProgress(_) => "get_progress",
            ToolCall::LookupApplication(_) => "lookup_application",
            ToolCall::CreateApplication(_) => "create_application",
            ToolCall::ScoreEligibility(_) => "score_eligibility",
            ToolCall::FinalizeDocuments(_) => "finalize_documents",
        }
    }

    /// 是否需要已关联的申请
    pub fn needs_application(&self) -> bool {
        !matches!(
            self,
            ToolCall::LookupApplication(_) | ToolCall::CreateApplication(_) | ToolCall::ScoreEligibility(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_args() {
        let raw = RawToolCall::new(
            "update_field",
            serde_json::json!({"document": "sba_413", "field": "cash_on_hand", "value": 12000}),
        );
        match ToolCall::parse(&raw).unwrap() {
            ToolCall::UpdateField(args) => {
                assert_eq!(args.document, DocumentType::Sba413);
                assert_eq!(args.field, "cash_on_hand");
                assert_eq!(args.value, serde_json::json!(12000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_no_args_tolerates_null_and_extras() {
        let raw = RawToolCall::new("get_progress", serde_json::Value::Null);
        assert_eq!(ToolCall::parse(&raw).unwrap(), ToolCall::GetProgress(NoArgs {}));
        let raw = RawToolCall::new("finalize_documents", serde_json::json!({"force": true}));
        assert!(matches!(ToolCall::parse(&raw), Ok(ToolCall::FinalizeDocuments(_))));
    }

    #[test]
    fn test_unknown_and_malformed_are_distinct() {
        let unknown = RawToolCall::new("delete_everything", serde_json::json!({}));
        assert_eq!(
            ToolCall::parse(&unknown).unwrap_err(),
            ToolCallError::UnknownTool("delete_everything".into())
        );

        let malformed = RawToolCall::new("select_document", serde_json::json!({"document": "w9"}));
        assert!(matches!(
            ToolCall::parse(&malformed).unwrap_err(),
            ToolCallError::MalformedArgs { .. }
        ));
    }

    #[test]
    fn test_catalog_matches_variant_names() {
        let samples = [
            ToolCall::GetProgress(NoArgs {}),
            ToolCall::FinalizeDocuments(NoArgs {}),
            ToolCall::SkipField(SkipFieldArgs {
                document: DocumentType::Sba1919,
            }),
        ];
        for call in samples {
            let json = serde_json::to_value(&call).unwrap();
            assert_eq!(json["tool"], call.name());
            assert!(TOOL_CATALOG.iter().any(|(n, _)| *n == call.name()));
        }
    }
}
