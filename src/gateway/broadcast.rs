//! 广播协作方
//!
//! `publish` 即发即忘：至多一次、无确认；没有订阅者时事件直接丢弃。

use serde::Serialize;
use tokio::sync::broadcast;

use super::message::{session_room, FormEvent, GLOBAL_ROOM};

/// 已发布的事件
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    pub event: String,
    pub rooms: Vec<String>,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.iter().any(|r| r == room)
    }
}

pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: &str, payload: serde_json::Value, rooms: &[String]);

    /// 向全局房间与会话房间发布
    fn publish_to_session(&self, session_id: &str, event: &FormEvent) {
        let rooms = [GLOBAL_ROOM.to_string(), session_room(session_id)];
        self.publish(event.name(), event.payload(), &rooms);
    }
}

/// 基于 tokio broadcast channel 的实现；慢订阅者会丢事件（Lagged）
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: &str, payload: serde_json::Value, rooms: &[String]) {
        let delivered = self
            .tx
            .send(BroadcastEvent {
                event: event.to_string(),
                rooms: rooms.to_vec(),
                payload,
            })
            .unwrap_or(0);
        tracing::debug!(event, ?rooms, delivered, "broadcast");
    }
}

/// 不发布任何事件
#[derive(Debug, Default)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn publish(&self, _event: &str, _payload: serde_json::Value, _rooms: &[String]) {}
}
