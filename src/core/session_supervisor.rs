//! 会话监管：每个会话一把回合锁
//!
//! 同一会话的回合从 start 到 save 全程串行；不同会话互不阻塞。
//! 锁表只保留正被持有或等待的会话：最后一个 guard 释放时条目随之移除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

type TurnLock = Arc<tokio::sync::Mutex<()>>;
type LockTable = Arc<Mutex<HashMap<String, TurnLock>>>;

fn table(locks: &LockTable) -> MutexGuard<'_, HashMap<String, TurnLock>> {
    match locks.lock() {
        Ok(l) => l,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 会话级回合锁表
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    locks: LockTable,
}

/// 回合锁 guard；drop 时若没有其它持有者或等待者，清除锁表条目
pub struct TurnGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: TurnLock,
    session_id: String,
    locks: LockTable,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = table(&self.locks);
        // 表里一份 + 自己一份；等待者在表锁内克隆，所以计数为 2 时没有人在等
        let idle = locks
            .get(&self.session_id)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if idle {
            locks.remove(&self.session_id);
        }
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取会话回合锁；guard 释放前同一会话的其它回合等待
    pub async fn acquire(&self, session_id: &str) -> TurnGuard {
        let lock = Arc::clone(
            table(&self.locks)
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        let guard = Arc::clone(&lock).lock_owned().await;
        TurnGuard {
            guard: Some(guard),
            lock,
            session_id: session_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// 当前锁表中的会话数
    pub fn tracked(&self) -> usize {
        table(&self.locks).len()
    }
}
