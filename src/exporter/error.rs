// ==========================================
// 受助人登记系统 - 导出模块错误类型
// ==========================================
// 注意: 方向标记修补失败不属于导出错误（降级处理,仅记录告警）
// ==========================================

use crate::i18n;
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("表格写出失败: {0}")]
    Writer(#[from] rust_xlsxwriter::XlsxError),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("数据读取失败: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("导出已取消")]
    Cancelled,
}

impl ExportError {
    /// 面向用户的本地化消息
    pub fn user_message(&self) -> String {
        match self {
            ExportError::Cancelled => i18n::t("job.cancelled"),
            other => i18n::t_with_args("export.failed", &[("reason", &other.to_string())]),
        }
    }
}

pub type ExportResult<T> = Result<T, ExportError>;
