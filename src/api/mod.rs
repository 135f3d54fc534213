// ==========================================
// 受助人登记系统 - API 层
// ==========================================
// 职责: 对外边界,负责同步/异步分流与错误转换
// ==========================================

pub mod error;
pub mod transfer_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ErrorPayload};
pub use transfer_api::{
    ExportParams, ExportResponse, ImportResponse, JobStatusResponse, TransferApi,
};
