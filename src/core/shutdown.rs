//! 退出流程：收到 Ctrl+C / SIGTERM 后停止接收请求，再把仍为 dirty 的表单状态写回存储

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::gateway::TurnOrchestrator;

/// 退出信号
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记退出；`source` 只用于日志
    pub fn trigger(&self, source: &str) {
        if !self.token.is_cancelled() {
            tracing::info!(source, "shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与（unix 下）SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.trigger("ctrl_c");
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        manager.trigger("sigterm");
                    }
                    Err(e) => tracing::warn!(error = %e, "SIGTERM handler not installed"),
                }
            });
        }
    }
}

/// 退出时执行的一步清理
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理步骤，每步单独限时
pub struct ShutdownCoordinator {
    steps: Vec<Box<dyn ShutdownCleanup>>,
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            step_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.step_timeout = Duration::from_secs(secs);
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, step: T) {
        self.steps.push(Box::new(step));
    }

    /// 执行全部步骤；返回失败（含超时）的步数。某步失败不影响后续步骤
    pub async fn run_cleanup(&self) -> usize {
        let mut failed = 0;
        for step in &self.steps {
            let name = step.name();
            match tokio::time::timeout(self.step_timeout, step.cleanup()).await {
                Ok(Ok(())) => tracing::info!(step = name, "cleanup done"),
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(step = name, error = %e, "cleanup failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::warn!(step = name, timeout_secs = self.step_timeout.as_secs(), "cleanup timed out");
                }
            }
        }
        failed
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 取消全部不活跃定时器，把仍然 dirty 的表单状态写回存储
pub struct FormStateFlush {
    orchestrator: Arc<TurnOrchestrator>,
}

impl FormStateFlush {
    pub fn new(orchestrator: Arc<TurnOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for FormStateFlush {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let unsaved = self.orchestrator.shutdown().await;
        if unsaved > 0 {
            anyhow::bail!("{} form states could not be saved", unsaved);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "form_state_flush"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_trigger_is_idempotent() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_triggered());
        manager.trigger("test");
        manager.trigger("test");
        assert!(manager.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let manager = Arc::new(ShutdownManager::new());
        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_for_shutdown().await })
        };
        manager.trigger("test");
        waiter.await.unwrap();
    }

    enum Outcome {
        Ok,
        Fail,
        Hang,
    }

    struct Step {
        outcome: Outcome,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for Step {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Ok => Ok(()),
                Outcome::Fail => anyhow::bail!("disk full"),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }

        fn name(&self) -> &'static str {
            "step"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_hung_steps_do_not_stop_later_ones() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut coordinator = ShutdownCoordinator::new().with_timeout(2);
        for outcome in [Outcome::Fail, Outcome::Hang, Outcome::Ok] {
            coordinator.register(Step {
                outcome,
                runs: runs.clone(),
            });
        }

        assert_eq!(coordinator.run_cleanup().await, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_form_state_flush_saves_dirty_state() {
        use crate::config::AppConfig;
        use crate::core::OrchestratorBuilder;
        use crate::forms::{DocumentType, FieldValue, MemoryFieldStore};

        let store = Arc::new(MemoryFieldStore::new());
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        let orchestrator = Arc::new(
            OrchestratorBuilder::new(config)
                .with_field_store(store.clone())
                .build()
                .await
                .unwrap(),
        );
        let forms = orchestrator.forms();
        forms.start("A1").await.unwrap();
        forms
            .update_field("A1", DocumentType::Sba1919, "business_name", FieldValue::from("Acme"))
            .await
            .unwrap();

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(FormStateFlush::new(orchestrator.clone()));
        assert_eq!(coordinator.run_cleanup().await, 0);
        assert!(!forms.get("A1").await.unwrap().dirty);
        assert_eq!(store.write_count(), 2);
    }
}
