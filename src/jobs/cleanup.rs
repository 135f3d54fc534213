// ==========================================
// 受助人登记系统 - 过期文件与任务清理
// ==========================================
// 清理对象:
// - imports/ 与 exports/ 下修改时间早于截止时间的文件
// - 创建时间早于截止时间的终态任务记录
// 单个文件删除失败只记录告警,不中断清理
// ==========================================

use crate::config::TransferConfig;
use crate::jobs::error::JobResult;
use crate::repository::TransferJobRepository;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub jobs_deleted: usize,
}

/// 清理超过保留天数的文件与终态任务
///
/// # 参数
/// - retention_days: 保留天数（负数按 0 处理）
/// - now: 当前时间（测试可注入）
pub fn cleanup_old_files(
    config: &TransferConfig,
    jobs: &TransferJobRepository,
    retention_days: i64,
    now: DateTime<Utc>,
) -> JobResult<CleanupReport> {
    let cutoff = now - Duration::days(retention_days.max(0));
    let mut report = CleanupReport::default();

    for dir in [&config.imports_dir, &config.exports_dir] {
        sweep_dir(dir, cutoff, &mut report)?;
    }
    report.jobs_deleted = jobs.delete_terminal_before(cutoff)?;

    info!(
        files = report.files_deleted,
        bytes = report.bytes_freed,
        jobs = report.jobs_deleted,
        retention_days,
        "过期数据清理完成"
    );
    Ok(report)
}

fn sweep_dir(dir: &Path, cutoff: DateTime<Utc>, report: &mut CleanupReport) -> JobResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "读取文件信息失败");
                continue;
            }
        };

        let modified: DateTime<Utc> = match metadata.modified() {
            Ok(t) => t.into(),
            Err(_) => continue,
        };
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                report.files_deleted += 1;
                report.bytes_freed += metadata.len();
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "删除过期文件失败"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transfer_job::{JobKind, TransferJob};
    use crate::domain::types::Direction;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_sweeps_files_and_terminal_jobs() {
        let root = tempfile::tempdir().unwrap();
        let config = TransferConfig::with_storage_root(root.path());
        fs::create_dir_all(&config.exports_dir).unwrap();
        fs::write(config.exports_dir.join("a.xlsx"), b"12345").unwrap();

        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let jobs = TransferJobRepository::new(Arc::new(Mutex::new(conn)));
        let job = TransferJob::new(JobKind::Export, vec![], Direction::Rtl);
        jobs.insert(&job).unwrap();
        jobs.mark_failed(&job.job_id, "x", Utc::now()).unwrap();

        // 保留期内: 不删除
        let report = cleanup_old_files(&config, &jobs, 30, Utc::now()).unwrap();
        assert_eq!(report, CleanupReport::default());

        // 截止时间推到未来: 全部过期（imports/ 不存在也不报错）
        let later = Utc::now() + Duration::days(31);
        let report = cleanup_old_files(&config, &jobs, 30, later).unwrap();
        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.bytes_freed, 5);
        assert_eq!(report.jobs_deleted, 1);
        assert!(jobs.find(&job.job_id).unwrap().is_none());
    }
}
