//! 任务调度：会话不活跃定时器
//!
//! 每个会话至多一个待触发定时器；再次 schedule 会取消并替换旧的。到期后任务带着自己的 token 执行，
//! 执行完才从表中清除；cancel 无条件生效，执行中的任务（包括已被新定时器替换的）也能从 token 看到取消。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct PendingTimer {
    generation: u64,
    token: CancellationToken,
    /// 已到期、任务执行中
    running: bool,
    /// 被替换时仍在执行的旧任务
    inflight: Option<CancellationToken>,
}

impl PendingTimer {
    fn cancel(&self) {
        self.token.cancel();
        if let Some(inflight) = &self.inflight {
            inflight.cancel();
        }
    }
}

type TimerTable = Arc<Mutex<HashMap<String, PendingTimer>>>;

fn lock(table: &TimerTable) -> std::sync::MutexGuard<'_, HashMap<String, PendingTimer>> {
    match table.lock() {
        Ok(t) => t,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 不活跃定时器
#[derive(Debug, Default)]
pub struct InactivityScheduler {
    timers: TimerTable,
    generation: AtomicU64,
}

impl InactivityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安排（或重置）会话的定时器；`delay` 内没有新的 schedule / cancel 则执行 `job`。
    /// 已在执行的旧任务不会被新的 schedule 打断。
    pub fn schedule<F, Fut>(&self, session_id: &str, delay: Duration, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let mut table = lock(&self.timers);
        let inflight = match table.remove(session_id) {
            Some(old) if old.running => Some(old.token),
            Some(old) => {
                old.token.cancel();
                old.inflight
            }
            None => None,
        };
        table.insert(
            session_id.to_string(),
            PendingTimer {
                generation,
                token: token.clone(),
                running: false,
                inflight,
            },
        );
        drop(table);

        let timers = Arc::clone(&self.timers);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let current = match lock(&timers).get_mut(&session_id) {
                        Some(t) if t.generation == generation && !token.is_cancelled() => {
                            t.running = true;
                            true
                        }
                        _ => false,
                    };
                    if current {
                        tracing::debug!(session_id = %session_id, "inactivity timer fired");
                        job(token.clone()).await;
                        let mut table = lock(&timers);
                        if table.get(&session_id).is_some_and(|t| t.generation == generation) {
                            table.remove(&session_id);
                        }
                    }
                }
            }
        });
    }

    /// 取消会话的待触发定时器；返回是否存在
    pub fn cancel(&self, session_id: &str) -> bool {
        match lock(&self.timers).remove(session_id) {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    /// 是否有尚未到期的定时器（执行中的不算）
    pub fn is_pending(&self, session_id: &str) -> bool {
        lock(&self.timers).get(session_id).is_some_and(|t| !t.running)
    }

    /// 关闭时取消全部
    pub fn cancel_all(&self) -> usize {
        let mut table = lock(&self.timers);
        let n = table.len();
        for (_, timer) in table.drain() {
            timer.cancel();
        }
        n
    }
}
