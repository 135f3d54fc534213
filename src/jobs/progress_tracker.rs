// ==========================================
// 受助人登记系统 - 任务进度跟踪
// ==========================================
// 状态机: pending → processing → {completed, failed}（终态）
// - start:    pending → processing,记录 started_at 与预估总行数
// - snapshot: processing 内更新 processed_rows 与计数（单调不减）
// - complete: processing → completed,写入最终计数与结果消息
// - fail:     processing → failed（未启动的任务先补记 processing）,写入错误消息；已终态时忽略
// ==========================================

use crate::domain::transfer_job::TransferCounters;
use crate::repository::{RepositoryResult, TransferJobRepository};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ==========================================
// ProgressSink - 流水线进度上报接口
// ==========================================
pub trait ProgressSink {
    /// 是否需要准确的总行数（决定导入是否做计数扫描）
    fn wants_total(&self) -> bool {
        false
    }

    fn set_total(&mut self, total_rows: i64) -> RepositoryResult<()>;

    fn snapshot(
        &mut self,
        processed_rows: i64,
        counters: &TransferCounters,
        errors: &[String],
    ) -> RepositoryResult<()>;
}

/// 同步调用使用的空接收方
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn set_total(&mut self, _total_rows: i64) -> RepositoryResult<()> {
        Ok(())
    }

    fn snapshot(
        &mut self,
        _processed_rows: i64,
        _counters: &TransferCounters,
        _errors: &[String],
    ) -> RepositoryResult<()> {
        Ok(())
    }
}

// ==========================================
// CancelFlag - 协作式取消标记
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ==========================================
// JobProgressTracker
// ==========================================
pub struct JobProgressTracker {
    jobs: TransferJobRepository,
    job_id: String,
}

impl JobProgressTracker {
    pub fn new(jobs: TransferJobRepository, job_id: impl Into<String>) -> Self {
        Self {
            jobs,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// pending → processing
    ///
    /// # 参数
    /// - estimated_total: 预估总行数（导入在计数扫描后修正）
    pub fn start(&self, estimated_total: i64) -> RepositoryResult<()> {
        self.jobs
            .mark_processing(&self.job_id, estimated_total.max(0), Utc::now())?;
        info!(job_id = %self.job_id, estimated_total, "任务开始执行");
        Ok(())
    }

    /// processing → completed
    pub fn complete(
        &self,
        processed_rows: i64,
        counters: &TransferCounters,
        errors: &[String],
        message: &str,
        file_path: Option<&str>,
    ) -> RepositoryResult<()> {
        self.jobs.mark_completed(
            &self.job_id,
            processed_rows,
            counters,
            errors,
            message,
            file_path,
            Utc::now(),
        )?;
        info!(
            job_id = %self.job_id,
            processed_rows,
            created = counters.created,
            updated = counters.updated,
            "任务完成"
        );
        Ok(())
    }

    /// → failed（已终态时返回 false）
    pub fn fail(&self, message: &str) -> RepositoryResult<bool> {
        let written = self.jobs.mark_failed(&self.job_id, message, Utc::now())?;
        if written {
            warn!(job_id = %self.job_id, error = %message, "任务失败");
        } else {
            debug!(job_id = %self.job_id, "任务已处于终态，忽略失败标记");
        }
        Ok(written)
    }
}

impl ProgressSink for JobProgressTracker {
    fn wants_total(&self) -> bool {
        true
    }

    fn set_total(&mut self, total_rows: i64) -> RepositoryResult<()> {
        debug!(job_id = %self.job_id, total_rows, "修正总行数");
        self.jobs.set_total_rows(&self.job_id, total_rows)
    }

    fn snapshot(
        &mut self,
        processed_rows: i64,
        counters: &TransferCounters,
        errors: &[String],
    ) -> RepositoryResult<()> {
        if !self.jobs.snapshot(&self.job_id, processed_rows, counters, errors)? {
            debug!(job_id = %self.job_id, processed_rows, "进度快照未写入");
        }
        Ok(())
    }
}
