//! 工具执行器
//!
//! 持有表单缓存、字段映射与外部协作方；execute 先把原始调用校验为 `ToolCall`，再按类型执行。
//! 所有失败（未知工具、参数错误、业务失败、外部调用超时）都转成 `success=false` 的 ToolResult
//! 回灌给 LLM，不会越过回合边界；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use crate::forms::{DocumentType, FieldMapper, FieldValue, FormStateCache};
use crate::integrations::{ApplicationDraft, ApplicationQuery, ApplicationService, EligibilityInput};
use crate::llm::RawToolCall;
use crate::tools::call::*;

/// 单次工具调用结果：`{tool, success, message, data?}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(tool: &str, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn fail(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// 工具执行对会话的副作用，由编排器在工具阶段结束后统一落地
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    None,
    /// 改动了表单状态（字段、光标或当前文档）
    FormTouched,
    /// 对话关联到了申请（表单状态已 start）
    Linked(String),
    /// 写入会话 user_data
    Remember(String, serde_json::Value),
    /// 请求在回合之外渲染最终文档
    FinalizeRequested,
}

/// 执行上下文：当前会话与已关联的申请；同一回合内后续调用能看到前面调用建立的关联
#[derive(Debug, Clone)]
pub struct ToolScope {
    pub session_id: String,
    pub application_id: Option<String>,
}

pub struct ToolExecutor {
    forms: Arc<FormStateCache>,
    mapper: Arc<FieldMapper>,
    applications: Arc<dyn ApplicationService>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        forms: Arc<FormStateCache>,
        mapper: Arc<FieldMapper>,
        applications: Arc<dyn ApplicationService>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            forms,
            mapper,
            applications,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行一个原始工具调用；输出 JSON 审计日志
    pub async fn execute(&self, scope: &mut ToolScope, raw: &RawToolCall) -> (ToolResult, ToolEffect) {
        let start = Instant::now();
        let (result, effect) = match ToolCall::parse(raw) {
            Ok(call) => self.run(scope, call).await,
            Err(e) => (ToolResult::fail(&raw.name, e.to_string()), ToolEffect::None),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "session_id": scope.session_id,
            "application_id": scope.application_id,
            "tool": raw.name,
            "ok": result.success,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&raw.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        (result, effect)
    }

    async fn run(&self, scope: &mut ToolScope, call: ToolCall) -> (ToolResult, ToolEffect) {
        let tool = call.name();
        let app_id = match (&scope.application_id, call.needs_application()) {
            (Some(id), _) => id.clone(),
            (None, false) => String::new(),
            (None, true) => {
                return (
                    ToolResult::fail(
                        tool,
                        "No application is linked to this conversation yet; look up or create one first",
                    ),
                    ToolEffect::None,
                )
            }
        };

        match call {
            ToolCall::SelectDocument(args) => {
                if self.forms.set_active_document(&app_id, args.document).await {
                    let next = self.forms.current_field(&app_id, args.document).await;
                    (
                        ToolResult::ok(
                            tool,
                            format!("Now filling {}", args.document.title()),
                            Some(serde_json::json!({ "document": args.document, "next_field": next })),
                        ),
                        ToolEffect::FormTouched,
                    )
                } else {
                    (ToolResult::fail(tool, "Form session is not active"), ToolEffect::None)
                }
            }
            ToolCall::UpdateField(args) => {
                let Some(value) = FieldValue::from_json(&args.value) else {
                    return (
                        ToolResult::fail(tool, "value must be a string, number or boolean"),
                        ToolEffect::None,
                    );
                };
                match self.forms.update_field(&app_id, args.document, &args.field, value).await {
                    Ok(outcome) => {
                        let label = self.forms.registry().label_of(args.document, &args.field);
                        (
                            ToolResult::ok(
                                tool,
                                format!("Saved {label} on {}", args.document.title()),
                                serde_json::to_value(&outcome).ok(),
                            ),
                            ToolEffect::FormTouched,
                        )
                    }
                    Err(e) => (ToolResult::fail(tool, e.to_string()), ToolEffect::None),
                }
            }
            ToolCall::SetAnswer(args) => {
                let Some(value) = FieldValue::from_json(&args.value) else {
                    return (
                        ToolResult::fail(tool, "value must be a string, number or boolean"),
                        ToolEffect::None,
                    );
                };
                match self.mapper.apply_unified(&self.forms, &app_id, &args.field, value).await {
                    Ok(update) if update.any_success() => (
                        ToolResult::ok(tool, format!("Saved {}", args.field), Some(update.to_json())),
                        ToolEffect::FormTouched,
                    ),
                    Ok(update) => (
                        ToolResult {
                            tool: tool.to_string(),
                            success: false,
                            message: format!("Could not save {}", args.field),
                            data: Some(update.to_json()),
                        },
                        ToolEffect::None,
                    ),
                    Err(e) => (ToolResult::fail(tool, e.to_string()), ToolEffect::None),
                }
            }
            ToolCall::SelectEntityType(args) => {
                match self.mapper.apply_entity_group(&self.forms, &app_id, &args.option).await {
                    Ok(update) => (
                        ToolResult::ok(
                            tool,
                            format!("Entity type set to {}", args.option),
                            Some(update.to_json()),
                        ),
                        ToolEffect::FormTouched,
                    ),
                    Err(e) => (
                        ToolResult::fail(
                            tool,
                            format!("{e}; valid options: {}", self.mapper.entity_option_names().join(", ")),
                        ),
                        ToolEffect::None,
                    ),
                }
            }
            ToolCall::SkipField(args) => match self.forms.skip_field(&app_id, args.document).await {
                Ok(outcome) => {
                    let message = outcome
                        .message
                        .clone()
                        .unwrap_or_else(|| "Field skipped".to_string());
                    (
                        ToolResult {
                            tool: tool.to_string(),
                            success: outcome.success,
                            message,
                            data: serde_json::to_value(&outcome).ok(),
                        },
                        ToolEffect::FormTouched,
                    )
                }
                Err(e) => (ToolResult::fail(tool, e.to_string()), ToolEffect::None),
            },
            ToolCall::GetProgress(_) => match self.forms.progress(&app_id).await {
                Some(progress) => (
                    ToolResult::ok(
                        tool,
                        format!(
                            "{} is {}% complete, {} is {}% complete",
                            DocumentType::Sba1919.title(),
                            progress.sba_1919,
                            DocumentType::Sba413.title(),
                            progress.sba_413
                        ),
                        serde_json::to_value(progress).ok(),
                    ),
                    ToolEffect::None,
                ),
                None => (ToolResult::fail(tool, "Form session is not active"), ToolEffect::None),
            },
            ToolCall::LookupApplication(args) => self.lookup(scope, args).await,
            ToolCall::CreateApplication(args) => self.create(scope, args).await,
            ToolCall::ScoreEligibility(args) => {
                let input = EligibilityInput {
                    requested_amount: args.requested_amount,
                    years_in_business: args.years_in_business,
                    credit_score: args.credit_score,
                    annual_revenue: args.annual_revenue,
                };
                match timeout(self.timeout, self.applications.score_eligibility(&input)).await {
                    Ok(Ok(score)) => {
                        let data = serde_json::to_value(&score).unwrap_or_default();
                        let message = if score.eligible {
                            format!("Likely eligible (score {})", score.score)
                        } else {
                            format!("Not eligible yet (score {})", score.score)
                        };
                        (
                            ToolResult::ok(tool, message, Some(data.clone())),
                            ToolEffect::Remember("eligibility".to_string(), data),
                        )
                    }
                    Ok(Err(e)) => (ToolResult::fail(tool, e), ToolEffect::None),
                    Err(_) => (ToolResult::fail(tool, "Eligibility service timed out"), ToolEffect::None),
                }
            }
            ToolCall::FinalizeDocuments(_) => {
                let Some(snapshot) = self.forms.complete_snapshot(&app_id).await else {
                    return (ToolResult::fail(tool, "Form session is not active"), ToolEffect::None);
                };
                if snapshot.sba_1919.submittable && snapshot.sba_413.submittable {
                    (
                        ToolResult::ok(
                            tool,
                            "Both documents are complete; final documents are being generated",
                            None,
                        ),
                        ToolEffect::FinalizeRequested,
                    )
                } else {
                    let missing = self.missing_required(&app_id).await;
                    (
                        ToolResult {
                            tool: tool.to_string(),
                            success: false,
                            message: "Some required fields are still empty".to_string(),
                            data: Some(missing),
                        },
                        ToolEffect::None,
                    )
                }
            }
        }
    }

    async fn lookup(&self, scope: &mut ToolScope, args: LookupApplicationArgs) -> (ToolResult, ToolEffect) {
        let tool = "lookup_application";
        let query = ApplicationQuery {
            application_id: args.application_id,
            email: args.email,
        };
        let found = match timeout(self.timeout, self.applications.lookup(&query)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => return (ToolResult::fail(tool, e), ToolEffect::None),
            Err(_) => return (ToolResult::fail(tool, "Application service timed out"), ToolEffect::None),
        };
        let Some(summary) = found else {
            return (ToolResult::fail(tool, "No matching application found"), ToolEffect::None);
        };
        let data = serde_json::to_value(&summary).ok();

        match &scope.application_id {
            Some(linked) if *linked == summary.application_id => (
                ToolResult::ok(tool, "Application is already linked", data),
                ToolEffect::None,
            ),
            Some(linked) => (
                ToolResult {
                    tool: tool.to_string(),
                    success: false,
                    message: format!("This conversation is already linked to application {linked}"),
                    data,
                },
                ToolEffect::None,
            ),
            None => self.link(scope, tool, summary.application_id.clone(), data).await,
        }
    }

    async fn create(&self, scope: &mut ToolScope, args: CreateApplicationArgs) -> (ToolResult, ToolEffect) {
        let tool = "create_application";
        if let Some(linked) = &scope.application_id {
            return (
                ToolResult::fail(tool, format!("This conversation is already linked to application {linked}")),
                ToolEffect::None,
            );
        }
        let draft = ApplicationDraft {
            business_name: args.business_name,
            owner_name: args.owner_name,
            email: args.email,
        };
        match timeout(self.timeout, self.applications.create(&draft)).await {
            Ok(Ok(summary)) => {
                let data = serde_json::to_value(&summary).ok();
                self.link(scope, tool, summary.application_id, data).await
            }
            Ok(Err(e)) => (ToolResult::fail(tool, e), ToolEffect::None),
            Err(_) => (ToolResult::fail(tool, "Application service timed out"), ToolEffect::None),
        }
    }

    /// 关联申请并立即 start 表单状态，使同一回合后续的字段写入可用
    async fn link(
        &self,
        scope: &mut ToolScope,
        tool: &str,
        application_id: String,
        data: Option<serde_json::Value>,
    ) -> (ToolResult, ToolEffect) {
        if let Err(e) = self.forms.start(&application_id).await {
            return (ToolResult::fail(tool, e.to_string()), ToolEffect::None);
        }
        scope.application_id = Some(application_id.clone());
        (
            ToolResult::ok(tool, format!("Linked application {application_id}"), data),
            ToolEffect::Linked(application_id),
        )
    }

    async fn missing_required(&self, application_id: &str) -> serde_json::Value {
        let Some(state) = self.forms.get(application_id).await else {
            return serde_json::Value::Null;
        };
        serde_json::json!({
            "sba_1919": state.sba_1919.missing_required,
            "sba_413": state.sba_413.missing_required,
        })
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{MemoryFieldStore, SchemaRegistry};
    use crate::integrations::InMemoryApplicationService;

    fn executor() -> (ToolExecutor, Arc<FormStateCache>) {
        let registry = Arc::new(SchemaRegistry::sba());
        let mapper = Arc::new(FieldMapper::sba(&registry).unwrap());
        let forms = Arc::new(FormStateCache::new(registry, Arc::new(MemoryFieldStore::new())));
        let exec = ToolExecutor::new(forms.clone(), mapper, Arc::new(InMemoryApplicationService::new()), 5);
        (exec, forms)
    }

    fn scope() -> ToolScope {
        ToolScope {
            session_id: "s1".into(),
            application_id: None,
        }
    }

    #[tokio::test]
    async fn test_form_tools_need_a_linked_application() {
        let (exec, _) = executor();
        let mut scope = scope();
        let (result, effect) = exec
            .execute(&mut scope, &RawToolCall::new("get_progress", serde_json::json!({})))
            .await;
        assert!(!result.success);
        assert_eq!(effect, ToolEffect::None);
    }

    #[tokio::test]
    async fn test_create_links_and_later_calls_see_it() {
        let (exec, forms) = executor();
        let mut scope = scope();

        let (created, effect) = exec
            .execute(
                &mut scope,
                &RawToolCall::new(
                    "create_application",
                    serde_json::json!({"business_name": "Acme", "owner_name": "Ada", "email": "ada@acme.test"}),
                ),
            )
            .await;
        assert!(created.success);
        let app_id = scope.application_id.clone().unwrap();
        assert_eq!(effect, ToolEffect::Linked(app_id.clone()));
        assert!(forms.has(&app_id).await);

        let (saved, effect) = exec
            .execute(
                &mut scope,
                &RawToolCall::new("set_answer", serde_json::json!({"field": "business_name", "value": "Acme"})),
            )
            .await;
        assert!(saved.success);
        assert_eq!(effect, ToolEffect::FormTouched);
        let state = forms.get(&app_id).await.unwrap();
        assert!(state.dirty);
        assert_eq!(state.sba_1919.all_fields["business_name"], FieldValue::from("Acme"));
        assert_eq!(state.sba_413.all_fields["business_name_of_applicant"], FieldValue::from("Acme"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_field_are_failed_results() {
        let (exec, forms) = executor();
        forms.start("A1").await.unwrap();
        let mut scope = ToolScope {
            session_id: "s1".into(),
            application_id: Some("A1".into()),
        };

        let (unknown, _) = exec
            .execute(&mut scope, &RawToolCall::new("send_fax", serde_json::json!({})))
            .await;
        assert!(!unknown.success);
        assert!(unknown.message.contains("Unknown tool"));

        let (bad, effect) = exec
            .execute(
                &mut scope,
                &RawToolCall::new(
                    "update_field",
                    serde_json::json!({"document": "sba_1919", "field": "favorite_color", "value": "red"}),
                ),
            )
            .await;
        assert!(!bad.success);
        assert_eq!(effect, ToolEffect::None);
        assert!(!forms.get("A1").await.unwrap().dirty);
    }

    #[tokio::test]
    async fn test_checkbox_text_is_coerced_or_rejected() {
        let (exec, forms) = executor();
        forms.start("A1").await.unwrap();
        let mut scope = ToolScope {
            session_id: "s1".into(),
            application_id: Some("A1".into()),
        };

        let (unchecked, _) = exec
            .execute(
                &mut scope,
                &RawToolCall::new(
                    "update_field",
                    serde_json::json!({"document": "sba_1919", "field": "entity_llc", "value": "false"}),
                ),
            )
            .await;
        assert!(unchecked.success);
        let state = forms.get("A1").await.unwrap();
        assert_eq!(state.sba_1919.all_fields["entity_llc"], FieldValue::Bool(false));

        let (bad, effect) = exec
            .execute(
                &mut scope,
                &RawToolCall::new(
                    "update_field",
                    serde_json::json!({"document": "sba_1919", "field": "entity_llc", "value": "an LLC"}),
                ),
            )
            .await;
        assert!(!bad.success);
        assert!(bad.message.contains("checkbox"));
        assert_eq!(effect, ToolEffect::None);
    }

    #[tokio::test]
    async fn test_finalize_requires_both_documents_submittable() {
        let (exec, forms) = executor();
        forms.start("A1").await.unwrap();
        let mut scope = ToolScope {
            session_id: "s1".into(),
            application_id: Some("A1".into()),
        };
        let (result, effect) = exec
            .execute(&mut scope, &RawToolCall::new("finalize_documents", serde_json::Value::Null))
            .await;
        assert!(!result.success);
        assert_eq!(effect, ToolEffect::None);
        assert!(result.data.unwrap()["sba_1919"].as_array().is_some_and(|m| !m.is_empty()));
    }
}
