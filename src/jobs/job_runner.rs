// ==========================================
// 受助人登记系统 - 异步任务执行器
// ==========================================
// 执行模型: 每个任务一个阻塞工作线程（spawn_blocking）,任务内部无并行
// 时间预算: tokio::time::timeout 包裹；超时后触发取消标记并将任务记为 failed
//          工作线程在下一个批次/分页边界观察到取消后退出
// 暂存上传文件: 无论成功失败,工作线程结束时删除
// ==========================================

use crate::config::TransferConfig;
use crate::domain::field_catalog::FieldCatalog;
use crate::domain::transfer_job::TransferCounters;
use crate::exporter::{ExportPipeline, ExportRequest};
use crate::importer::ImportPipeline;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::progress_tracker::{CancelFlag, JobProgressTracker};
use crate::repository::TransferJobRepository;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

pub struct JobRunner {
    conn: Arc<Mutex<Connection>>,
    catalog: Arc<FieldCatalog>,
    config: TransferConfig,
}

impl JobRunner {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        catalog: Arc<FieldCatalog>,
        config: TransferConfig,
    ) -> Self {
        Self {
            conn,
            catalog,
            config,
        }
    }

    /// 在后台执行导入任务
    ///
    /// # 参数
    /// - job_id: 已创建的 pending 任务
    /// - staged_file: 暂存的上传文件（任务结束时删除）
    /// - estimated_total: 提交时的预估行数
    ///
    /// # 返回
    /// 任务句柄；失败时任务记录已写入 failed,错误仍经句柄返回
    pub fn spawn_import(
        &self,
        job_id: String,
        staged_file: PathBuf,
        selected_fields: Vec<String>,
        estimated_total: i64,
    ) -> JoinHandle<JobResult<()>> {
        let conn = self.conn.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let worker_job_id = job_id.clone();

        self.supervise(job_id, self.config.import_timeout(), move |cancel| {
            let pipeline = ImportPipeline::new(conn.clone(), catalog, config);
            let mut tracker =
                JobProgressTracker::new(TransferJobRepository::new(conn), worker_job_id);

            let result = run_import(
                &mut tracker,
                &pipeline,
                &staged_file,
                &selected_fields,
                estimated_total,
                cancel,
            );

            if let Err(e) = fs::remove_file(&staged_file) {
                warn!(path = %staged_file.display(), error = %e, "暂存文件删除失败");
            }
            result
        })
    }

    /// 在后台执行导出任务
    pub fn spawn_export(
        &self,
        job_id: String,
        request: ExportRequest,
        destination: PathBuf,
    ) -> JoinHandle<JobResult<()>> {
        let conn = self.conn.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let worker_job_id = job_id.clone();

        self.supervise(job_id, self.config.export_timeout(), move |cancel| {
            let pipeline = ExportPipeline::new(conn.clone(), catalog, config);
            let mut tracker =
                JobProgressTracker::new(TransferJobRepository::new(conn), worker_job_id);
            run_export(&mut tracker, &pipeline, &request, &destination, cancel)
        })
    }

    /// 在时间预算内执行阻塞任务；超时或崩溃时补写 failed
    fn supervise<F>(&self, job_id: String, budget: Duration, work: F) -> JoinHandle<JobResult<()>>
    where
        F: FnOnce(&CancelFlag) -> JobResult<()> + Send + 'static,
    {
        let jobs = TransferJobRepository::new(self.conn.clone());
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();

        // 工作线程与监督方共用同一 span,日志均带 job_id
        let span = info_span!("transfer_job", job_id = %job_id);
        let worker_span = span.clone();

        tokio::spawn(async move {
            let worker =
                tokio::task::spawn_blocking(move || worker_span.in_scope(|| work(&worker_cancel)));

            let outcome = match tokio::time::timeout(budget, worker).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(JobError::Aborted(join_err.to_string())),
                Err(_) => {
                    cancel.cancel();
                    Err(JobError::TimedOut(budget.as_secs()))
                }
            };

            if let Err(e) = &outcome {
                error!(job_id = %job_id, error = %e, "后台任务失败");
                let message = e.user_message();
                let tracker = JobProgressTracker::new(jobs, job_id.clone());
                let written = tokio::task::spawn_blocking(move || tracker.fail(&message)).await;
                match written {
                    Ok(Ok(_)) => {}
                    Ok(Err(write_err)) => {
                        error!(job_id = %job_id, error = %write_err, "失败状态写入失败")
                    }
                    Err(join_err) => {
                        error!(job_id = %job_id, error = %join_err, "失败状态写入中断")
                    }
                }
            }
            outcome
        }
        .instrument(span))
    }
}

/// 导入任务主体: start → run → complete|fail
fn run_import(
    tracker: &mut JobProgressTracker,
    pipeline: &ImportPipeline,
    path: &Path,
    selected_fields: &[String],
    estimated_total: i64,
    cancel: &CancelFlag,
) -> JobResult<()> {
    tracker.start(estimated_total)?;

    match pipeline.run(path, selected_fields, tracker, cancel) {
        Ok(summary) => {
            tracker.complete(
                summary.processed_rows,
                &summary.counters(),
                &summary.errors,
                &summary.message,
                None,
            )?;
            info!(job_id = %tracker.job_id(), imported = summary.imported, "导入任务完成");
            Ok(())
        }
        Err(e) => {
            let err = JobError::from(e);
            record_failure(tracker, &err);
            Err(err)
        }
    }
}

/// 导出任务主体: start → run → complete|fail
fn run_export(
    tracker: &mut JobProgressTracker,
    pipeline: &ExportPipeline,
    request: &ExportRequest,
    destination: &Path,
    cancel: &CancelFlag,
) -> JobResult<()> {
    tracker.start(0)?;

    match pipeline.run(request, destination, tracker, cancel) {
        Ok(outcome) => {
            let counters = TransferCounters {
                imported: outcome.rows_exported,
                ..TransferCounters::default()
            };
            let file_path = outcome.file_path.to_string_lossy();
            tracker.complete(
                outcome.rows_exported,
                &counters,
                &[],
                &outcome.message,
                Some(file_path.as_ref()),
            )?;
            info!(job_id = %tracker.job_id(), rows = outcome.rows_exported, "导出任务完成");
            Ok(())
        }
        Err(e) => {
            if destination.exists() {
                let _ = fs::remove_file(destination);
            }
            let err = JobError::from(e);
            record_failure(tracker, &err);
            Err(err)
        }
    }
}

fn record_failure(tracker: &JobProgressTracker, err: &JobError) {
    if let Err(write_err) = tracker.fail(&err.user_message()) {
        error!(job_id = %tracker.job_id(), error = %write_err, "失败状态写入失败");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transfer_job::{JobKind, JobStatus, TransferJob};
    use crate::domain::types::Direction;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn runner() -> (Arc<Mutex<Connection>>, JobRunner) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        let config = TransferConfig::with_storage_root(Path::new("/tmp/relief-registry-test"));
        let runner = JobRunner::new(shared.clone(), Arc::new(FieldCatalog::standard()), config);
        (shared, runner)
    }

    fn pending_job(conn: &Arc<Mutex<Connection>>) -> String {
        let job = TransferJob::new(JobKind::Import, vec![], Direction::Rtl);
        TransferJobRepository::new(conn.clone()).insert(&job).unwrap();
        job.job_id
    }

    #[tokio::test]
    async fn test_timeout_marks_job_failed_and_trips_cancel() {
        let (conn, runner) = runner();
        let job_id = pending_job(&conn);
        let observed = Arc::new(AtomicBool::new(false));
        let worker_observed = observed.clone();

        let handle = runner.supervise(job_id.clone(), Duration::from_millis(50), move |cancel| {
            for _ in 0..200 {
                if cancel.is_cancelled() {
                    worker_observed.store(true, Ordering::SeqCst);
                    return Err(JobError::Aborted("cancelled".into()));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        });

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(JobError::TimedOut(_))));

        let job = TransferJobRepository::new(conn).find(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());

        for _ in 0..100 {
            if observed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_worker_error_is_returned_and_recorded() {
        let (conn, runner) = runner();
        let job_id = pending_job(&conn);

        let handle = runner.supervise(job_id.clone(), Duration::from_secs(5), |_| {
            Err(JobError::Aborted("boom".into()))
        });
        assert!(matches!(handle.await.unwrap(), Err(JobError::Aborted(_))));

        let job = TransferJobRepository::new(conn).find(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("boom"));
    }
}
