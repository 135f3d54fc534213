// ==========================================
// 受助人登记系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod identity_repo;
pub mod transfer_job_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use identity_repo::{
    ExportCursor, ExportFilter, IdentityDraft, IdentityRepository, IdentityStore,
    SqliteIdentityStore,
};
pub use transfer_job_repo::TransferJobRepository;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;

/// 时间戳存储格式（定宽,字典序即时间序）
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// 编码时间戳为存储文本
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// 解码存储文本为时间戳
///
/// # 参数
/// - idx: 列索引（用于错误定位）
/// - raw: 存储文本
pub(crate) fn decode_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_codec_is_sortable() {
        let a = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.1Z").unwrap().with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.12Z").unwrap().with_timezone(&Utc);
        let (ea, eb) = (encode_timestamp(&a), encode_timestamp(&b));
        assert_eq!(ea, "2026-01-02 03:04:05.100000");
        assert!(ea < eb);
        assert_eq!(decode_timestamp(0, &ea).unwrap(), a);
    }
}
