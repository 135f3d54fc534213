// ==========================================
// 受助人登记系统 - 传输任务领域模型
// ==========================================
// 状态机: pending → processing → {completed, failed}
// 进度百分比与 ETA 为派生值,不落库
// ==========================================

use crate::domain::types::{Direction, ReviewFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误明细最多保留条数
pub const ERROR_LIST_CAP: usize = 50;

// ==========================================
// JobKind - 任务类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Import,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "import" => Some(JobKind::Import),
            "export" => Some(JobKind::Export),
            _ => None,
        }
    }
}

// ==========================================
// JobStatus - 任务状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// 合法转换：pending→processing, processing→completed|failed
    ///
    /// 启动前即失败的任务（如超时、暂存文件丢失）同样先进入 processing
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// TransferCounters - 结果计数
// ==========================================
// 不变量: imported = created + updated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounters {
    pub imported: i64,
    pub created: i64,
    pub updated: i64,
    pub errors_count: i64,
}

impl TransferCounters {
    pub fn absorb(&mut self, other: &TransferCounters) {
        self.imported += other.imported;
        self.created += other.created;
        self.updated += other.updated;
        self.errors_count += other.errors_count;
    }
}

// ==========================================
// TransferJob - 导入/导出任务记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    // ===== 主键 =====
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,

    // ===== 进度 =====
    pub total_rows: i64,
    pub processed_rows: i64,
    pub counters: TransferCounters,
    pub error_list: Vec<String>,
    pub error_message: Option<String>,
    pub result_message: Option<String>,

    // ===== 文件 =====
    pub file_path: Option<String>, // 导入: 暂存上传文件; 导出: 生成文件
    pub file_name: Option<String>,

    // ===== 参数 =====
    pub selected_fields: Vec<String>,
    pub direction: Direction,
    pub search: Option<String>,
    pub status_filter: Option<ReviewFilter>,

    // ===== 时间 =====
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferJob {
    /// 新建 pending 任务
    pub fn new(kind: JobKind, selected_fields: Vec<String>, direction: Direction) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Pending,
            total_rows: 0,
            processed_rows: 0,
            counters: TransferCounters::default(),
            error_list: Vec::new(),
            error_message: None,
            result_message: None,
            file_path: None,
            file_name: None,
            selected_fields,
            direction,
            search: None,
            status_filter: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 进度百分比（0-100,保留两位小数）
    pub fn progress_percentage(&self) -> f64 {
        if self.total_rows <= 0 {
            return 0.0;
        }
        let pct = self.processed_rows as f64 / self.total_rows as f64 * 100.0;
        (pct.min(100.0) * 100.0).round() / 100.0
    }

    /// 预计剩余秒数
    ///
    /// 仅 processing 状态、已处理行数 > 0 且已耗时 > 0 时可计算
    pub fn estimated_time_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status != JobStatus::Processing || self.processed_rows <= 0 {
            return None;
        }
        let started_at = self.started_at?;
        let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }

        let rate = self.processed_rows as f64 / elapsed;
        let remaining = (self.total_rows - self.processed_rows).max(0) as f64;
        Some((remaining / rate).round() as i64)
    }
}
