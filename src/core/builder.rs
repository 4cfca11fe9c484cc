//! 编排器构建：统一的初始化逻辑
//!
//! 终端 demo 与 HTTP 服务共用同一套组装；各协作方都可用 `with_*` 替换（测试注入脚本化 LLM、写计数存储等）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::FormError;
use crate::forms::{FieldMapper, FieldStore, FormStateCache, MemoryFieldStore, SchemaRegistry};
use crate::gateway::{
    Broadcaster, ChatSessionStore, MemoryChatSessionStore, NoopBroadcaster, RuntimeConfig, TurnOrchestrator,
};
use crate::integrations::{ApplicationService, DocumentRenderer, HttpRenderer, InMemoryApplicationService, LoggingRenderer};
use crate::llm::{create_deepseek_client, ModelClient, OpenAiModelClient, ScriptedModelClient};
use crate::tools::{reply_protocol_prompt, ToolExecutor};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly loan officer assistant helping a small business owner \
complete SBA Form 1919 (Borrower Information) and SBA Form 413 (Personal Financial Statement). \
Ask for one piece of information at a time, prefer set_answer so shared answers fill both forms, \
and never invent values the user did not give you.";

/// 完整 system prompt：基础说明 + 统一字段清单 + 企业类型选项 + 回复协议
pub fn build_system_prompt(base: &str, mapper: &FieldMapper) -> String {
    let mut out = String::from(base.trim());
    out.push_str("\n\n## Unified fields (use with set_answer)\n");
    for p in mapper.unified_prompts() {
        out.push_str(&format!("- {}: {}\n", p.field, p.prompt));
    }
    out.push_str("\n## Entity types (use with select_entity_type)\n");
    out.push_str(&mapper.entity_option_names().join(", "));
    out.push_str("\n\n");
    out.push_str(&reply_protocol_prompt());
    out
}

/// 按配置选择 LLM 后端：有 DeepSeek Key 走 DeepSeek，有 OpenAI Key 且 provider 不是 deepseek 走 OpenAI，
/// 都没有（或 provider = mock）时用回显的脚本化客户端
pub fn create_model_from_config(cfg: &AppConfig, system_prompt: &str) -> Arc<dyn ModelClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using scripted mock LLM");
        return Arc::new(ScriptedModelClient::new(Vec::new()));
    }

    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(create_deepseek_client(Some(&cfg.llm.model), system_prompt))
    } else if use_openai {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiModelClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
            system_prompt,
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using scripted mock LLM");
        Arc::new(ScriptedModelClient::new(Vec::new()))
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    system_prompt: String,
    model: Option<Arc<dyn ModelClient>>,
    sessions: Option<Arc<dyn ChatSessionStore>>,
    field_store: Option<Arc<dyn FieldStore>>,
    applications: Option<Arc<dyn ApplicationService>>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            sessions: None,
            field_store: None,
            applications: None,
            renderer: None,
            broadcaster: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 从 `[app].system_prompt_path` 或 config/prompts/system.md 加载，找不到时保留内置 prompt
    pub fn with_system_prompt_from_file(mut self) -> Self {
        let mut candidates: Vec<PathBuf> = self.config.app.system_prompt_path.clone().into_iter().collect();
        candidates.push(PathBuf::from("config/prompts/system.md"));
        candidates.push(PathBuf::from("../config/prompts/system.md"));
        let found = candidates.into_iter().find_map(|p| std::fs::read_to_string(p).ok());
        if let Some(prompt) = found {
            self.system_prompt = prompt;
        }
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn ChatSessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_field_store(mut self, store: Arc<dyn FieldStore>) -> Self {
        self.field_store = Some(store);
        self
    }

    pub fn with_applications(mut self, applications: Arc<dyn ApplicationService>) -> Self {
        self.applications = Some(applications);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// 未注入的存储按 `[store]` 创建：配置了 database_path 且启用 async-sqlite 时用 SQLite，否则用内存
    async fn build_stores(&self) -> Result<(Arc<dyn FieldStore>, Arc<dyn ChatSessionStore>), FormError> {
        #[cfg(feature = "async-sqlite")]
        {
            if let Some(path) = &self.config.store.database_path {
                let field_store: Arc<dyn FieldStore> = match &self.field_store {
                    Some(s) => Arc::clone(s),
                    None => Arc::new(
                        crate::forms::SqliteFieldStore::new(path)
                            .await
                            .map_err(|e| FormError::PersistenceFailure(e.to_string()))?,
                    ),
                };
                let sessions: Arc<dyn ChatSessionStore> = match &self.sessions {
                    Some(s) => Arc::clone(s),
                    None => Arc::new(
                        crate::gateway::SqliteChatSessionStore::new(path)
                            .await
                            .map_err(|e| FormError::PersistenceFailure(e.to_string()))?,
                    ),
                };
                tracing::info!(path = %path.display(), "using SQLite stores");
                return Ok((field_store, sessions));
            }
        }

        #[cfg(not(feature = "async-sqlite"))]
        {
            if self.config.store.database_path.is_some() {
                tracing::warn!("store.database_path is set but the async-sqlite feature is disabled; using memory stores");
            }
        }

        let field_store = self
            .field_store
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryFieldStore::new()) as Arc<dyn FieldStore>);
        let sessions = self
            .sessions
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryChatSessionStore::new()) as Arc<dyn ChatSessionStore>);
        Ok((field_store, sessions))
    }

    pub async fn build(self) -> Result<TurnOrchestrator, FormError> {
        let registry = Arc::new(SchemaRegistry::sba());
        let mapper = Arc::new(FieldMapper::sba(&registry)?);
        let system_prompt = build_system_prompt(&self.system_prompt, &mapper);

        let (field_store, sessions) = self.build_stores().await?;
        let forms = Arc::new(FormStateCache::new(registry, field_store));

        let model = self
            .model
            .clone()
            .unwrap_or_else(|| create_model_from_config(&self.config, &system_prompt));
        let applications = self
            .applications
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryApplicationService::new()) as Arc<dyn ApplicationService>);
        let renderer: Arc<dyn DocumentRenderer> = match (&self.renderer, &self.config.render.endpoint) {
            (Some(r), _) => Arc::clone(r),
            (None, Some(endpoint)) => Arc::new(HttpRenderer::new(endpoint.clone())),
            (None, None) => Arc::new(LoggingRenderer::new()),
        };
        let broadcaster = self
            .broadcaster
            .clone()
            .unwrap_or_else(|| Arc::new(NoopBroadcaster) as Arc<dyn Broadcaster>);

        let tools = ToolExecutor::new(
            Arc::clone(&forms),
            mapper,
            applications,
            self.config.session.tool_timeout_secs,
        );
        let runtime = RuntimeConfig {
            model_timeout: Duration::from_secs(self.config.llm.timeouts.request),
            inactivity: Duration::from_secs(self.config.session.inactivity_secs),
        };

        Ok(TurnOrchestrator::new(
            runtime,
            model,
            sessions,
            forms,
            tools,
            renderer,
            broadcaster,
        ))
    }
}
