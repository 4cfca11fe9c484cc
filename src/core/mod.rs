//! 核心层：错误、会话监管、不活跃定时器、构建与优雅关闭

pub mod builder;
pub mod error;
pub mod session_supervisor;
pub mod shutdown;
pub mod task_scheduler;

pub use builder::{build_system_prompt, OrchestratorBuilder};
pub use error::FormError;
pub use session_supervisor::{SessionSupervisor, TurnGuard};
pub use shutdown::{FormStateFlush, ShutdownCleanup, ShutdownCoordinator, ShutdownManager};
pub use task_scheduler::InactivityScheduler;
