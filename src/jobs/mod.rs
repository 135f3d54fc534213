// ==========================================
// 受助人登记系统 - 任务层
// ==========================================
// 职责: 传输任务状态机、后台执行、过期清理
// ==========================================

pub mod cleanup;
pub mod error;
pub mod job_runner;
pub mod progress_tracker;

// 重导出核心类型
pub use cleanup::{cleanup_old_files, CleanupReport};
pub use error::{JobError, JobResult};
pub use job_runner::JobRunner;
pub use progress_tracker::{CancelFlag, JobProgressTracker, NoopProgress, ProgressSink};
