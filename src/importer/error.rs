// ==========================================
// 受助人登记系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类:
// - 行级错误（RowDataError）累计进错误列表,不中断导入
// - 运行级错误（其余变体）中断导入并原样上报
// ==========================================

use crate::i18n;
use crate::repository::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.csv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("表格容器解析失败: {0}")]
    ContainerFormatError(String),

    // ===== 表头错误 =====
    #[error("表头匹配失败: 缺少 {missing:?}, 表头 {headers:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        headers: Vec<String>,
    },

    // ===== 行级错误 =====
    #[error("行数据缺失 (行 {row}): {missing:?}")]
    RowDataError { row: usize, missing: Vec<String> },

    // ===== 持久化错误 =====
    #[error("唯一约束冲突: {0}")]
    PersistenceConflict(String),

    #[error("持久化失败: {0}")]
    PersistenceFailure(String),

    // ===== 任务控制 =====
    #[error("导入已取消")]
    Cancelled,

    #[error("导入超时 ({0} 秒)")]
    TimedOut(u64),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 面向用户的本地化消息
    pub fn user_message(&self) -> String {
        match self {
            ImportError::FileNotFound(path) => {
                i18n::t_with_args("import.file_not_found", &[("path", path)])
            }
            ImportError::UnsupportedFormat(format) => {
                i18n::t_with_args("import.unsupported_format", &[("format", format)])
            }
            ImportError::FileReadError(reason) | ImportError::ContainerFormatError(reason) => {
                i18n::t_with_args("import.unreadable_file", &[("reason", reason)])
            }
            ImportError::SchemaMismatch { missing, headers } => {
                let missing_labels: Vec<String> =
                    missing.iter().map(|key| field_label(key)).collect();
                i18n::t_with_args(
                    "import.schema_mismatch",
                    &[
                        ("missing", &missing_labels.join("، ")),
                        ("headers", &headers.join("، ")),
                    ],
                )
            }
            ImportError::RowDataError { row, missing } => {
                let labels: Vec<String> = missing.iter().map(|key| field_label(key)).collect();
                i18n::t_with_args(
                    "import.row_missing_fields",
                    &[("row", &row.to_string()), ("fields", &labels.join("، "))],
                )
            }
            ImportError::PersistenceConflict(reason) | ImportError::PersistenceFailure(reason) => {
                i18n::t_with_args("import.persistence_failure", &[("reason", reason)])
            }
            ImportError::Cancelled => i18n::t("job.cancelled"),
            ImportError::TimedOut(seconds) => {
                i18n::t_with_args("job.timed_out", &[("seconds", &seconds.to_string())])
            }
            ImportError::InternalError(reason) => {
                i18n::t_with_args("import.persistence_failure", &[("reason", reason)])
            }
            ImportError::Other(err) => {
                i18n::t_with_args("import.persistence_failure", &[("reason", &err.to_string())])
            }
        }
    }
}

/// 必需字段的本地化名称
fn field_label(key: &str) -> String {
    match key {
        crate::domain::field_catalog::NATIONAL_ID => i18n::t("import.field_national_id"),
        crate::domain::field_catalog::FULL_NAME => i18n::t("import.field_full_name"),
        other => other.to_string(),
    }
}

// 实现 From<RepositoryError>
// 唯一约束冲突单独归类,供批量插入回退逻辑识别
impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UniqueConstraintViolation(msg) => ImportError::PersistenceConflict(msg),
            other => ImportError::PersistenceFailure(other.to_string()),
        }
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::from(RepositoryError::from(err))
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::ContainerFormatError(err.to_string())
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::ContainerFormatError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_message_in_arabic() {
        let err = ImportError::RowDataError {
            row: 7,
            missing: vec!["national_id".to_string(), "full_name".to_string()],
        };
        assert_eq!(
            err.user_message(),
            "السطر 7: بيانات ناقصة (رقم الهوية، الاسم الرباعي)"
        );
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err: ImportError =
            RepositoryError::UniqueConstraintViolation("UNIQUE constraint failed".into()).into();
        assert!(matches!(err, ImportError::PersistenceConflict(_)));

        let err: ImportError = RepositoryError::LockError("poisoned".into()).into();
        assert!(matches!(err, ImportError::PersistenceFailure(_)));
    }
}
