//! 对话回合编排（TurnOrchestrator）
//!
//! 一轮对话的协议：
//! 1. 获取会话回合锁，追加用户消息（失败的回合只留下这一条）
//! 2. 重新生成上下文摘要，第一次调用 LLM
//! 3. 没有工具调用：追加助手回复，结束
//! 4. 否则按顺序逐个执行工具；结果作为普通 `tool` 消息追加后第二次调用 LLM，要求非空文本
//! 5. 成功后一次性落盘本轮的助手 / 工具消息；改动过表单则保存并广播快照
//! 6. 已关联申请的会话重置不活跃定时器，到期后调用渲染服务生成预览
//!
//! LLM 调用带超时；超时或失败让回合失败，但不回滚已执行工具的副作用。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::broadcast::Broadcaster;
use super::message::FormEvent;
use super::session::{ChatSession, SessionId};
use super::session_store::ChatSessionStore;
use crate::core::{FormError, InactivityScheduler, SessionSupervisor};
use crate::forms::{CompleteSnapshot, DocumentType, FormStateCache, Progress};
use crate::integrations::{ArtifactRef, DocumentRenderer};
use crate::llm::{ModelClient, ModelReply};
use crate::memory::conversation::ToolCallRecord;
use crate::memory::Message;
use crate::tools::{ToolEffect, ToolExecutor, ToolResult, ToolScope};

/// Runtime 配置
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// 单次 LLM 调用超时
    pub model_timeout: Duration,
    /// 不活跃多久后触发预览渲染
    pub inactivity: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(60),
            inactivity: Duration::from_secs(300),
        }
    }
}

/// 回合状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingModelPass1,
    ExecutingTools,
    AwaitingModelPass2,
}

/// 一轮成功对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub tool_results: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<CompleteSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// 工具阶段累积的副作用
#[derive(Debug, Default)]
struct TurnEffects {
    form_touched: bool,
    finalize_requested: bool,
}

pub struct TurnOrchestrator {
    config: RuntimeConfig,
    model: Arc<dyn ModelClient>,
    sessions: Arc<dyn ChatSessionStore>,
    forms: Arc<FormStateCache>,
    tools: ToolExecutor,
    renderer: Arc<dyn DocumentRenderer>,
    broadcaster: Arc<dyn Broadcaster>,
    supervisor: SessionSupervisor,
    timers: InactivityScheduler,
    turn_states: Mutex<HashMap<SessionId, TurnState>>,
}

impl TurnOrchestrator {
    pub fn new(
        config: RuntimeConfig,
        model: Arc<dyn ModelClient>,
        sessions: Arc<dyn ChatSessionStore>,
        forms: Arc<FormStateCache>,
        tools: ToolExecutor,
        renderer: Arc<dyn DocumentRenderer>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            config,
            model,
            sessions,
            forms,
            tools,
            renderer,
            broadcaster,
            supervisor: SessionSupervisor::new(),
            timers: InactivityScheduler::new(),
            turn_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn forms(&self) -> &Arc<FormStateCache> {
        &self.forms
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    // ---------- 会话生命周期 ----------

    pub async fn create_session(&self, owner_ref: Option<String>) -> Result<ChatSession, FormError> {
        let session = self.sessions.create(owner_ref).await?;
        tracing::info!(session_id = %session.session_id, "session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ChatSession, FormError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| FormError::SessionNotFound(session_id.to_string()))
    }

    /// 按到达顺序追加，不重排不去重
    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<(), FormError> {
        self.sessions.append_messages(session_id, &[message]).await
    }

    /// 删除会话：先取消定时器、结束关联的表单状态，再删除
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, FormError> {
        let _turn = self.supervisor.acquire(session_id).await;
        self.timers.cancel(session_id);

        let Some(session) = self.sessions.get(session_id).await? else {
            return Ok(false);
        };
        if let Some(app_id) = &session.application_id {
            if self.forms.has(app_id).await && !self.forms.end(app_id).await {
                tracing::warn!(session_id, application_id = %app_id, "form state not saved before delete");
            }
        }

        let existed = self.sessions.delete(session_id).await?;
        self.set_turn_state(session_id, None);
        self.broadcaster.publish_to_session(
            session_id,
            &FormEvent::SessionDeleted {
                session_id: session_id.to_string(),
            },
        );
        tracing::info!(session_id, "session deleted");
        Ok(existed)
    }

    /// 结束表单会话（保存并移出内存），对话本身保留
    pub async fn end_form_session(&self, session_id: &str) -> Result<bool, FormError> {
        let _turn = self.supervisor.acquire(session_id).await;
        self.timers.cancel(session_id);
        let session = self.get_session(session_id).await?;
        match &session.application_id {
            Some(app_id) if self.forms.has(app_id).await => Ok(self.forms.end(app_id).await),
            _ => Ok(true),
        }
    }

    pub fn turn_state(&self, session_id: &str) -> TurnState {
        self.turn_states
            .lock()
            .ok()
            .and_then(|s| s.get(session_id).copied())
            .unwrap_or(TurnState::Idle)
    }

    pub fn has_pending_timer(&self, session_id: &str) -> bool {
        self.timers.is_pending(session_id)
    }

    fn set_turn_state(&self, session_id: &str, state: Option<TurnState>) {
        if let Ok(mut states) = self.turn_states.lock() {
            match state {
                Some(s) if s != TurnState::Idle => {
                    states.insert(session_id.to_string(), s);
                }
                _ => {
                    states.remove(session_id);
                }
            }
        }
        tracing::debug!(session_id, ?state, "turn state");
    }

    // ---------- 回合 ----------

    /// 处理一条用户消息
    pub async fn process_message(&self, session_id: &str, text: &str) -> Result<TurnOutcome, FormError> {
        let _turn = self.supervisor.acquire(session_id).await;
        let result = self.run_turn(session_id, text).await;
        self.set_turn_state(session_id, None);

        if let Err(e) = &result {
            tracing::warn!(session_id, error = %e, code = e.code(), "turn failed");
        }
        result
    }

    async fn run_turn(&self, session_id: &str, text: &str) -> Result<TurnOutcome, FormError> {
        let session = self.get_session(session_id).await?;

        let user = Message::user(text);
        self.sessions.append_messages(session_id, &[user.clone()]).await?;

        if let Some(app_id) = &session.application_id {
            self.forms.start(app_id).await?;
        }

        let mut history = session.messages.clone();
        history.push(user);
        let mut user_data = session.user_data.clone();
        let mut scope = ToolScope {
            session_id: session_id.to_string(),
            application_id: session.application_id.clone(),
        };

        self.set_turn_state(session_id, Some(TurnState::AwaitingModelPass1));
        let context = self.context_block(&scope, &user_data).await;
        let first = self.call_model(&history, &context, 1).await?;

        if first.tool_calls.is_empty() {
            if first.text.trim().is_empty() {
                return Err(FormError::ModelEmptyResponse);
            }
            let reply = first.text.trim().to_string();
            self.sessions
                .append_messages(session_id, &[Message::assistant(reply.clone())])
                .await?;
            if let Some(app_id) = &scope.application_id {
                self.arm_timer(session_id, app_id);
            }
            return Ok(TurnOutcome {
                reply,
                tool_results: Vec::new(),
                snapshot: None,
                progress: None,
            });
        }

        self.set_turn_state(session_id, Some(TurnState::ExecutingTools));
        let (results, effects) = self.execute_tools(session_id, &mut scope, &mut user_data, &first).await?;

        let request = Message::assistant_with_tools(
            first.text.trim(),
            first
                .tool_calls
                .iter()
                .map(|c| ToolCallRecord {
                    name: c.name.clone(),
                    args: c.args.clone(),
                })
                .collect(),
        );
        let observation = Message::tool(serde_json::to_string_pretty(&results).unwrap_or_default());
        history.push(request.clone());
        history.push(observation.clone());

        self.set_turn_state(session_id, Some(TurnState::AwaitingModelPass2));
        let context = self.context_block(&scope, &user_data).await;
        let second = self.call_model(&history, &context, 2).await?;
        if second.text.trim().is_empty() {
            return Err(FormError::ModelEmptyResponse);
        }
        let reply = second.text.trim().to_string();

        self.sessions
            .append_messages(session_id, &[request, observation, Message::assistant(reply.clone())])
            .await?;

        let mut outcome = TurnOutcome {
            reply,
            tool_results: results,
            snapshot: None,
            progress: None,
        };

        if let Some(app_id) = scope.application_id.clone() {
            if effects.form_touched {
                if !self.forms.save(&app_id).await {
                    tracing::warn!(session_id, application_id = %app_id, "save failed, state stays dirty");
                }
                outcome.progress = self.forms.progress(&app_id).await;
                outcome.snapshot = self.forms.complete_snapshot(&app_id).await;
                if let (Some(snapshot), Some(progress)) = (&outcome.snapshot, outcome.progress) {
                    self.broadcaster.publish_to_session(
                        session_id,
                        &FormEvent::FieldsUpdated {
                            session_id: session_id.to_string(),
                            snapshot: snapshot.clone(),
                            progress,
                        },
                    );
                }
            }
            self.arm_timer(session_id, &app_id);

            if effects.finalize_requested {
                self.spawn_render(session_id, &app_id);
            }
        }

        Ok(outcome)
    }

    /// 严格按顺序执行本轮全部工具调用，并把关联 / user_data 落到会话
    async fn execute_tools(
        &self,
        session_id: &str,
        scope: &mut ToolScope,
        user_data: &mut HashMap<String, serde_json::Value>,
        reply: &ModelReply,
    ) -> Result<(Vec<ToolResult>, TurnEffects), FormError> {
        let mut results = Vec::with_capacity(reply.tool_calls.len());
        let mut effects = TurnEffects::default();

        for call in &reply.tool_calls {
            let (result, effect) = self.tools.execute(scope, call).await;
            match effect {
                ToolEffect::None => {}
                ToolEffect::FormTouched => effects.form_touched = true,
                ToolEffect::Linked(app_id) => {
                    self.sessions.link_application(session_id, &app_id).await?;
                    tracing::info!(session_id, application_id = %app_id, "application linked");
                    effects.form_touched = true;
                }
                ToolEffect::Remember(key, value) => {
                    self.sessions.set_user_data(session_id, &key, value.clone()).await?;
                    user_data.insert(key, value);
                }
                ToolEffect::FinalizeRequested => effects.finalize_requested = true,
            }
            results.push(result);
        }
        Ok((results, effects))
    }

    async fn call_model(&self, messages: &[Message], context: &str, pass: u8) -> Result<ModelReply, FormError> {
        match timeout(self.config.model_timeout, self.model.complete(messages, context)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(FormError::ModelError(e)),
            Err(_) => Err(FormError::Timeout(format!(
                "model pass {pass} exceeded {}s",
                self.config.model_timeout.as_secs()
            ))),
        }
    }

    /// 本轮上下文摘要；每次调用都从缓存重新生成
    async fn context_block(&self, scope: &ToolScope, user_data: &HashMap<String, serde_json::Value>) -> String {
        let mut out = String::from("Flow: SBA 7(a) loan application intake\n");

        let Some(app_id) = &scope.application_id else {
            out.push_str(
                "Application: none linked yet. Once you know the business name, owner name and email, \
                 call lookup_application or create_application.\n",
            );
            append_user_data(&mut out, user_data);
            return out;
        };
        out.push_str(&format!("Application: {app_id}\n"));

        let Some(state) = self.forms.get(app_id).await else {
            out.push_str("Form session: not active\n");
            append_user_data(&mut out, user_data);
            return out;
        };
        let registry = self.forms.registry();

        out.push_str(&format!(
            "Active document: {}\n",
            state.active_document.map(|d| d.title()).unwrap_or("none selected")
        ));
        for doc in DocumentType::ALL {
            let entry = state.doc(doc);
            let fields = registry.fields_of(doc);
            let next = entry
                .current_field(fields)
                .map(|i| format!("{} ({})", fields[i].name, fields[i].label))
                .unwrap_or_else(|| "none, every field is filled".to_string());
            out.push_str(&format!(
                "{}: next field {}; {} required missing; submittable: {}; {}% complete\n",
                doc.title(),
                next,
                entry.missing_required.len(),
                if entry.is_submittable { "yes" } else { "no" },
                entry.progress(),
            ));
        }
        append_user_data(&mut out, user_data);
        out
    }

    // ---------- 渲染 ----------

    /// 显式生成最终文档（不在回合路径上）
    pub async fn finalize(&self, session_id: &str) -> Result<Vec<ArtifactRef>, FormError> {
        let session = self.get_session(session_id).await?;
        let app_id = session.application_id.ok_or_else(|| {
            FormError::ToolExecutionFailure("no application is linked to this session".to_string())
        })?;
        self.timers.cancel(session_id);
        render_documents(&self.forms, self.renderer.as_ref(), self.broadcaster.as_ref(), session_id, &app_id, None).await
    }

    /// 当前捕获的字段快照
    pub async fn snapshot(&self, session_id: &str) -> Result<Option<CompleteSnapshot>, FormError> {
        let session = self.get_session(session_id).await?;
        let Some(app_id) = session.application_id else {
            return Ok(None);
        };
        self.forms.start(&app_id).await?;
        Ok(self.forms.complete_snapshot(&app_id).await)
    }

    fn arm_timer(&self, session_id: &str, application_id: &str) {
        let forms = Arc::clone(&self.forms);
        let renderer = Arc::clone(&self.renderer);
        let broadcaster = Arc::clone(&self.broadcaster);
        let sid = session_id.to_string();
        let app_id = application_id.to_string();
        self.timers.schedule(session_id, self.config.inactivity, move |token| async move {
            let rendered =
                render_documents(&forms, renderer.as_ref(), broadcaster.as_ref(), &sid, &app_id, Some(&token)).await;
            if let Err(e) = rendered {
                tracing::warn!(session_id = %sid, application_id = %app_id, error = %e, "preview render failed");
            }
        });
    }

    fn spawn_render(&self, session_id: &str, application_id: &str) {
        let forms = Arc::clone(&self.forms);
        let renderer = Arc::clone(&self.renderer);
        let broadcaster = Arc::clone(&self.broadcaster);
        let sid = session_id.to_string();
        let app_id = application_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = render_documents(&forms, renderer.as_ref(), broadcaster.as_ref(), &sid, &app_id, None).await {
                tracing::warn!(session_id = %sid, application_id = %app_id, error = %e, "final render failed");
            }
        });
    }

    /// 关闭：取消全部定时器并刷写所有脏状态；返回保存失败数
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.timers.cancel_all();
        let failed = self.forms.save_all().await;
        tracing::info!(cancelled_timers = cancelled, failed_saves = failed, "orchestrator shut down");
        failed
    }
}

fn append_user_data(out: &mut String, user_data: &HashMap<String, serde_json::Value>) {
    if user_data.is_empty() {
        return;
    }
    let mut keys: Vec<_> = user_data.keys().collect();
    keys.sort();
    out.push_str("Known facts:\n");
    for key in keys {
        out.push_str(&format!("- {key}: {}\n", user_data[key]));
    }
}

/// 先保存再渲染，成功后广播；`cancel` 已触发（会话被删除 / 结束）时不渲染也不广播
async fn render_documents(
    forms: &FormStateCache,
    renderer: &dyn DocumentRenderer,
    broadcaster: &dyn Broadcaster,
    session_id: &str,
    application_id: &str,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<ArtifactRef>, FormError> {
    let cancelled = || cancel.is_some_and(CancellationToken::is_cancelled);
    if cancelled() {
        return Ok(Vec::new());
    }
    if forms.has(application_id).await && !forms.save(application_id).await {
        tracing::warn!(application_id, "rendering from a store that is missing unsaved edits");
    }
    let artifacts = renderer
        .regenerate(application_id)
        .await
        .map_err(FormError::ToolExecutionFailure)?;
    tracing::info!(application_id, count = artifacts.len(), "documents rendered");
    if cancelled() {
        tracing::info!(session_id, application_id, "session closed during render, not broadcasting");
        return Ok(artifacts);
    }
    broadcaster.publish_to_session(
        session_id,
        &FormEvent::DocumentsRendered {
            session_id: session_id.to_string(),
            application_id: application_id.to_string(),
            artifacts: artifacts.clone(),
        },
    );
    Ok(artifacts)
}
