// ==========================================
// 受助人登记系统 - 传输任务 Repository
// ==========================================
// 职责: transfer_jobs 表读写
// 约束: 状态写入均带前置状态条件,终态记录对轮询方只读
// ==========================================

use crate::domain::transfer_job::{JobKind, JobStatus, TransferCounters, TransferJob};
use crate::domain::types::{Direction, ReviewFilter};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{decode_timestamp, encode_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const JOB_COLUMNS: &str = r#"
    job_id, kind, status, total_rows, processed_rows,
    imported, created, updated, errors_count, error_list,
    error_message, result_message, file_path, file_name,
    selected_fields, direction, search, status_filter,
    created_at, started_at, completed_at
"#;

pub struct TransferJobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TransferJobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建任务记录
    pub fn insert(&self, job: &TransferJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO transfer_jobs (
                job_id, kind, status, total_rows, processed_rows,
                imported, created, updated, errors_count, error_list,
                error_message, result_message, file_path, file_name,
                selected_fields, direction, search, status_filter,
                created_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            "#,
            params![
                job.job_id,
                job.kind.as_str(),
                job.status.as_str(),
                job.total_rows,
                job.processed_rows,
                job.counters.imported,
                job.counters.created,
                job.counters.updated,
                job.counters.errors_count,
                serde_json::to_string(&job.error_list)?,
                job.error_message,
                job.result_message,
                job.file_path,
                job.file_name,
                serde_json::to_string(&job.selected_fields)?,
                job.direction.as_str(),
                job.search,
                job.status_filter.map(|f| f.as_str()),
                encode_timestamp(&job.created_at),
                job.started_at.as_ref().map(encode_timestamp),
                job.completed_at.as_ref().map(encode_timestamp),
            ],
        )?;
        Ok(())
    }

    /// 按 job_id 查询
    pub fn find(&self, job_id: &str) -> RepositoryResult<Option<TransferJob>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM transfer_jobs WHERE job_id = ?1", JOB_COLUMNS);
        let job = conn.query_row(&sql, params![job_id], map_job_row).optional()?;
        Ok(job)
    }

    /// 查询任务当前状态（不存在时返回 NotFound）
    fn current_status(conn: &Connection, job_id: &str) -> RepositoryResult<JobStatus> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM transfer_jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;

        let raw = raw.ok_or_else(|| RepositoryError::NotFound {
            entity: "TransferJob".to_string(),
            id: job_id.to_string(),
        })?;
        JobStatus::from_str(&raw).ok_or_else(|| RepositoryError::FieldValueError {
            field: "status".to_string(),
            message: raw,
        })
    }

    fn transition_error(conn: &Connection, job_id: &str, to: JobStatus) -> RepositoryError {
        match Self::current_status(conn, job_id) {
            Ok(from) => RepositoryError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            },
            Err(e) => e,
        }
    }

    /// pending → processing,记录 started_at 与总行数
    pub fn mark_processing(
        &self,
        job_id: &str,
        total_rows: i64,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE transfer_jobs
            SET status = 'processing', total_rows = ?2, started_at = ?3
            WHERE job_id = ?1 AND status = 'pending'
            "#,
            params![job_id, total_rows, encode_timestamp(&started_at)],
        )?;
        if affected == 0 {
            return Err(Self::transition_error(&conn, job_id, JobStatus::Processing));
        }
        Ok(())
    }

    /// 修正总行数（processing 状态内）
    pub fn set_total_rows(&self, job_id: &str, total_rows: i64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE transfer_jobs SET total_rows = ?2 WHERE job_id = ?1 AND status = 'processing'",
            params![job_id, total_rows],
        )?;
        Ok(())
    }

    /// 进度快照（不改变状态；processed_rows 只增不减）
    pub fn snapshot(
        &self,
        job_id: &str,
        processed_rows: i64,
        counters: &TransferCounters,
        error_list: &[String],
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE transfer_jobs
            SET processed_rows = ?2, imported = ?3, created = ?4, updated = ?5,
                errors_count = ?6, error_list = ?7
            WHERE job_id = ?1 AND status = 'processing' AND processed_rows <= ?2
            "#,
            params![
                job_id,
                processed_rows,
                counters.imported,
                counters.created,
                counters.updated,
                counters.errors_count,
                serde_json::to_string(error_list)?,
            ],
        )?;
        Ok(affected > 0)
    }

    /// processing → completed
    #[allow(clippy::too_many_arguments)]
    pub fn mark_completed(
        &self,
        job_id: &str,
        processed_rows: i64,
        counters: &TransferCounters,
        error_list: &[String],
        result_message: &str,
        file_path: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE transfer_jobs
            SET status = 'completed', processed_rows = MAX(processed_rows, ?2),
                imported = ?3, created = ?4, updated = ?5, errors_count = ?6,
                error_list = ?7, result_message = ?8,
                file_path = COALESCE(?9, file_path), completed_at = ?10
            WHERE job_id = ?1 AND status = 'processing'
            "#,
            params![
                job_id,
                processed_rows,
                counters.imported,
                counters.created,
                counters.updated,
                counters.errors_count,
                serde_json::to_string(error_list)?,
                result_message,
                file_path,
                encode_timestamp(&completed_at),
            ],
        )?;
        if affected == 0 {
            return Err(Self::transition_error(&conn, job_id, JobStatus::Completed));
        }
        Ok(())
    }

    /// processing → failed；已是终态时不覆盖
    ///
    /// 尚未启动的任务先补记 pending → processing（started_at 取失败时刻）,
    /// 两步在同一事务内完成。
    ///
    /// # 返回
    /// - true: 本次写入了 failed
    /// - false: 任务已处于终态
    pub fn mark_failed(
        &self,
        job_id: &str,
        error_message: &str,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let at = encode_timestamp(&completed_at);
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"
            UPDATE transfer_jobs
            SET status = 'processing', started_at = ?2
            WHERE job_id = ?1 AND status = 'pending'
            "#,
            params![job_id, at],
        )?;
        let affected = tx.execute(
            r#"
            UPDATE transfer_jobs
            SET status = 'failed', error_message = ?2, completed_at = ?3
            WHERE job_id = ?1 AND status = 'processing'
            "#,
            params![job_id, error_message, at],
        )?;
        tx.commit()?;
        if affected == 0 {
            // 区分"不存在"与"已终态"
            Self::current_status(&conn, job_id)?;
        }
        Ok(affected > 0)
    }

    /// 删除早于 cutoff 创建的终态任务
    pub fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM transfer_jobs WHERE status IN ('completed', 'failed') AND created_at < ?1",
            params![encode_timestamp(&cutoff)],
        )?;
        Ok(affected)
    }
}

fn map_job_row(row: &Row) -> rusqlite::Result<TransferJob> {
    let kind_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let error_list_raw: String = row.get(9)?;
    let selected_raw: String = row.get(14)?;
    let direction_raw: String = row.get(15)?;
    let status_filter_raw: Option<String> = row.get(17)?;
    let created_at: String = row.get(18)?;
    let started_at: Option<String> = row.get(19)?;
    let completed_at: Option<String> = row.get(20)?;

    let kind = JobKind::from_str(&kind_raw).ok_or_else(|| invalid_text(1, &kind_raw))?;
    let status = JobStatus::from_str(&status_raw).ok_or_else(|| invalid_text(2, &status_raw))?;

    Ok(TransferJob {
        job_id: row.get(0)?,
        kind,
        status,
        total_rows: row.get(3)?,
        processed_rows: row.get(4)?,
        counters: TransferCounters {
            imported: row.get(5)?,
            created: row.get(6)?,
            updated: row.get(7)?,
            errors_count: row.get(8)?,
        },
        error_list: decode_json(9, &error_list_raw)?,
        error_message: row.get(10)?,
        result_message: row.get(11)?,
        file_path: row.get(12)?,
        file_name: row.get(13)?,
        selected_fields: decode_json(14, &selected_raw)?,
        direction: Direction::parse(&direction_raw),
        search: row.get(16)?,
        status_filter: status_filter_raw.as_deref().and_then(ReviewFilter::parse),
        created_at: decode_timestamp(18, &created_at)?,
        started_at: started_at.map(|raw| decode_timestamp(19, &raw)).transpose()?,
        completed_at: completed_at
            .map(|raw| decode_timestamp(20, &raw))
            .transpose()?,
    })
}

fn decode_json(idx: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn invalid_text(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("无法识别的取值: {}", raw).into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> TransferJobRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        TransferJobRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn pending_job() -> TransferJob {
        TransferJob::new(
            JobKind::Import,
            vec!["national_id".to_string()],
            Direction::Ltr,
        )
    }

    #[test]
    fn test_insert_and_find_round_trip() {
        let repo = repo();
        let job = pending_job();
        repo.insert(&job).unwrap();

        let loaded = repo.find(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.direction, Direction::Ltr);
        assert_eq!(loaded.selected_fields, vec!["national_id".to_string()]);
        assert!(repo.find("missing").unwrap().is_none());
    }

    #[test]
    fn test_completed_requires_processing() {
        let repo = repo();
        let job = pending_job();
        repo.insert(&job).unwrap();

        let err = repo
            .mark_completed(&job.job_id, 0, &TransferCounters::default(), &[], "ok", None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));

        repo.mark_processing(&job.job_id, 10, Utc::now()).unwrap();
        repo.mark_completed(&job.job_id, 10, &TransferCounters::default(), &[], "ok", None, Utc::now())
            .unwrap();

        // 终态后失败标记不生效
        assert!(!repo.mark_failed(&job.job_id, "late", Utc::now()).unwrap());
        let loaded = repo.find(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.result_message.as_deref(), Some("ok"));
    }

    #[test]
    fn test_snapshot_is_monotonic() {
        let repo = repo();
        let job = pending_job();
        repo.insert(&job).unwrap();
        repo.mark_processing(&job.job_id, 100, Utc::now()).unwrap();

        let counters = TransferCounters::default();
        assert!(repo.snapshot(&job.job_id, 50, &counters, &[]).unwrap());
        assert!(!repo.snapshot(&job.job_id, 40, &counters, &[]).unwrap());
        assert_eq!(repo.find(&job.job_id).unwrap().unwrap().processed_rows, 50);
    }

    #[test]
    fn test_failure_before_start_passes_through_processing() {
        let repo = repo();
        let job = pending_job();
        repo.insert(&job).unwrap();

        assert!(repo.mark_failed(&job.job_id, "staged file missing", Utc::now()).unwrap());
        let loaded = repo.find(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.error_message.as_deref(), Some("staged file missing"));

        assert!(matches!(
            repo.mark_failed("missing", "x", Utc::now()),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
