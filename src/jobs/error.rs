// ==========================================
// 受助人登记系统 - 任务层错误类型
// ==========================================

use crate::exporter::ExportError;
use crate::importer::ImportError;
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("导入失败: {0}")]
    Import(#[from] ImportError),

    #[error("导出失败: {0}")]
    Export(#[from] ExportError),

    #[error("任务状态写入失败: {0}")]
    Repository(#[from] RepositoryError),

    #[error("任务超时 ({0} 秒)")]
    TimedOut(u64),

    #[error("任务执行中断: {0}")]
    Aborted(String),

    #[error("文件清理失败: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// 记录到任务上的本地化消息
    pub fn user_message(&self) -> String {
        match self {
            JobError::Import(e) => e.user_message(),
            JobError::Export(e) => e.user_message(),
            JobError::TimedOut(seconds) => {
                crate::i18n::t_with_args("job.timed_out", &[("seconds", &seconds.to_string())])
            }
            JobError::Repository(e) => {
                crate::i18n::t_with_args("common.database_error", &[("reason", &e.to_string())])
            }
            JobError::Aborted(reason) => {
                crate::i18n::t_with_args("job.aborted", &[("reason", reason)])
            }
            JobError::Io(e) => {
                crate::i18n::t_with_args("job.aborted", &[("reason", &e.to_string())])
            }
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
