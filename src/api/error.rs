// ==========================================
// 受助人登记系统 - API 层错误类型
// ==========================================
// 职责: 将下层错误转换为面向调用方的错误
// 约定: 字符串载荷为已本地化的用户消息
// ==========================================

use crate::exporter::ExportError;
use crate::i18n;
use crate::importer::ImportError;
use crate::jobs::JobError;
use crate::repository::RepositoryError;
use serde::Serialize;
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ===== 输入错误 =====
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ===== 传输错误 =====
    /// 表头不可用（尚未处理任何数据行）
    #[error("表头匹配失败: {message}")]
    SchemaMismatch {
        message: String,
        missing: Vec<String>,
        headers: Vec<String>,
    },

    #[error("导入失败: {0}")]
    ImportFailed(String),

    #[error("导出失败: {0}")]
    ExportFailed(String),

    // ===== 数据访问错误 =====
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 错误载荷（同步调用的错误响应体）
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            ApiError::ImportFailed(_) => "IMPORT_FAILED",
            ApiError::ExportFailed(_) => "EXPORT_FAILED",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        let (message, missing, headers) = match self {
            ApiError::SchemaMismatch {
                message,
                missing,
                headers,
            } => (message.clone(), missing.clone(), headers.clone()),
            ApiError::InvalidInput(msg)
            | ApiError::NotFound(msg)
            | ApiError::ImportFailed(msg)
            | ApiError::ExportFailed(msg)
            | ApiError::DatabaseError(msg)
            | ApiError::InternalError(msg) => (msg.clone(), Vec::new(), Vec::new()),
            ApiError::Other(err) => (err.to_string(), Vec::new(), Vec::new()),
        };
        ErrorPayload {
            code: self.code(),
            message,
            missing,
            headers,
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } => ApiError::NotFound(i18n::t("job.not_found")),
            RepositoryError::Other(err) => ApiError::Other(err),
            other => ApiError::DatabaseError(i18n::t_with_args(
                "common.database_error",
                &[("reason", &other.to_string())],
            )),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let message = err.user_message();
        match err {
            ImportError::SchemaMismatch { missing, headers } => ApiError::SchemaMismatch {
                message,
                missing,
                headers,
            },
            ImportError::FileNotFound(_) | ImportError::UnsupportedFormat(_) => {
                ApiError::InvalidInput(message)
            }
            _ => ApiError::ImportFailed(message),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        ApiError::ExportFailed(err.user_message())
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Import(e) => e.into(),
            JobError::Export(e) => e.into(),
            JobError::Repository(e) => e.into(),
            other => ApiError::InternalError(other.user_message()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_payload_keeps_headers() {
        let err: ApiError = ImportError::SchemaMismatch {
            missing: vec!["national_id".into()],
            headers: vec!["المنطقة".into()],
        }
        .into();
        let payload = err.payload();
        assert_eq!(payload.code, "SCHEMA_MISMATCH");
        assert!(payload.message.starts_with("فشل في مطابقة أعمدة الملف"));
        assert_eq!(payload.headers, vec!["المنطقة"]);
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let err: ApiError = ImportError::FileNotFound("/tmp/x.xlsx".into()).into();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
