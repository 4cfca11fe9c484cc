//! formsync HTTP 服务
//!
//! 启动: cargo run --bin formsync-server --features server
//!
//! - POST   /api/sessions                 新建会话
//! - GET    /api/sessions/:id             读取会话
//! - DELETE /api/sessions/:id             删除会话（取消定时器、结束表单状态）
//! - POST   /api/sessions/:id/messages    发送一条消息并返回本轮结果
//! - GET    /api/sessions/:id/fields      当前捕获的字段快照
//! - POST   /api/sessions/:id/finalize    生成最终文档
//! - POST   /api/sessions/:id/end         结束表单会话（保留对话）
//! - GET    /api/events?room=global       SSE 事件流（房间：global / session:<id>）

#![cfg(feature = "server")]

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde::Deserialize;
use tokio::sync::broadcast;

use formsync::config::load_config;
use formsync::core::{FormError, FormStateFlush, OrchestratorBuilder, ShutdownCoordinator, ShutdownManager};
use formsync::gateway::{ChannelBroadcaster, TurnOrchestrator, GLOBAL_ROOM};

struct AppState {
    orchestrator: Arc<TurnOrchestrator>,
    events: Arc<ChannelBroadcaster>,
}

/// FormError → HTTP 响应
struct ApiError(FormError);

impl From<FormError> for ApiError {
    fn from(e: FormError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FormError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            FormError::UnknownField { .. }
            | FormError::FieldKindMismatch { .. }
            | FormError::UnknownMapping(_)
            | FormError::InvalidMapping(_)
            | FormError::InvalidToolCall(_) => StatusCode::BAD_REQUEST,
            FormError::ToolExecutionFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FormError::ModelEmptyResponse | FormError::ModelError(_) => StatusCode::BAD_GATEWAY,
            FormError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FormError::PersistenceFailure(_) | FormError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.code(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct CreateSessionBody {
    owner_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageBody {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    room: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    formsync::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {}", e);
        Default::default()
    });
    let bind_addr = cfg.server.bind_addr.clone();

    let events = Arc::new(ChannelBroadcaster::default());
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg)
            .with_system_prompt_from_file()
            .with_broadcaster(events.clone())
            .build()
            .await?,
    );

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        events,
    });

    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/messages", post(post_message))
        .route("/api/sessions/:id/fields", get(get_fields))
        .route("/api/sessions/:id/finalize", post(finalize))
        .route("/api/sessions/:id/end", post(end_form_session))
        .route("/api/events", get(events_sse))
        .with_state(state);

    let manager = Arc::new(ShutdownManager::new());
    manager.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new().with_timeout(10);
    coordinator.register(FormStateFlush::new(orchestrator));

    tracing::info!("formsync server: http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let wait = manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait.wait_for_shutdown().await })
        .await?;

    let failed = coordinator.run_cleanup().await;
    if failed > 0 {
        tracing::warn!(failed, "shutdown finished with failed cleanup steps");
    }
    Ok(())
}

/// POST /api/sessions
async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionBody>>,
) -> ApiResult<impl IntoResponse> {
    let owner_ref = body.and_then(|Json(b)| b.owner_ref);
    let session = state.orchestrator.create_session(owner_ref).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/sessions/:id
async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let session = state.orchestrator.get_session(&id).await?;
    let turn_state = state.orchestrator.turn_state(&id);
    Ok(Json(serde_json::json!({ "session": session, "turn_state": turn_state })))
}

/// DELETE /api/sessions/:id
async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.orchestrator.delete_session(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(FormError::SessionNotFound(id).into())
    }
}

/// POST /api/sessions/:id/messages
async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PostMessageBody>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.orchestrator.process_message(&id, &body.content).await?;
    Ok(Json(outcome))
}

/// GET /api/sessions/:id/fields
async fn get_fields(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.orchestrator.snapshot(&id).await?;
    Ok(Json(snapshot))
}

/// POST /api/sessions/:id/finalize
async fn finalize(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let artifacts = state.orchestrator.finalize(&id).await?;
    Ok(Json(serde_json::json!({ "artifacts": artifacts })))
}

/// POST /api/sessions/:id/end
async fn end_form_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let saved = state.orchestrator.end_form_session(&id).await?;
    Ok(Json(serde_json::json!({ "saved": saved })))
}

/// GET /api/events?room=...：按房间过滤的 SSE；慢消费者丢事件
async fn events_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let room = query.room.unwrap_or_else(|| GLOBAL_ROOM.to_string());
    let rx = state.events.subscribe();
    let event_stream = stream::unfold((rx, room), |(mut rx, room)| async move {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.in_room(&room) => {
                    let event = Event::default().event(ev.event.clone()).data(ev.payload.to_string());
                    return Some((Ok(event), (rx, room)));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}
