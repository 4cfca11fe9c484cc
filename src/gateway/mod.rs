//! 网关层：对话会话、回合编排、广播
//!
//! - **session / session_store**: 对话会话及其存储（内存 / SQLite）
//! - **runtime**: TurnOrchestrator，两段式 LLM / 工具回合协议与不活跃定时器
//! - **broadcast / message**: 即发即忘的事件广播（`global` 与 `session:<id>` 房间）

mod broadcast;
mod message;
mod runtime;
mod session;
mod session_store;

pub use broadcast::{BroadcastEvent, Broadcaster, ChannelBroadcaster, NoopBroadcaster};
pub use message::{session_room, FormEvent, GLOBAL_ROOM};
pub use runtime::{RuntimeConfig, TurnOrchestrator, TurnOutcome, TurnState};
pub use session::{ChatSession, SessionId};
#[cfg(feature = "async-sqlite")]
pub use session_store::SqliteChatSessionStore;
pub use session_store::{ChatSessionStore, MemoryChatSessionStore};
