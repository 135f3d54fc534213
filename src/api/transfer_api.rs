// ==========================================
// 受助人登记系统 - 导入/导出 API
// ==========================================
// 职责: 同步/异步分流、任务提交、状态查询、过期清理
// 分流规则:
// - 导入: TransferConfig::should_run_async(文件大小)
// - 导出: 待导出行数 > async_estimated_rows_threshold
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{TransferConfig, TransferConfigReader};
use crate::domain::field_catalog::{self, FieldCatalog};
use crate::domain::transfer_job::{JobKind, JobStatus, TransferCounters, TransferJob};
use crate::domain::types::{Direction, ReviewFilter};
use crate::exporter::{export_file_name, ExportOutcome, ExportPipeline, ExportRequest};
use crate::i18n;
use crate::importer::{ImportPipeline, ImportSummary, SpreadsheetStreamReader};
use crate::jobs::{cleanup_old_files, CancelFlag, CleanupReport, JobRunner, NoopProgress};
use crate::repository::{ExportFilter, IdentityRepository, TransferJobRepository};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};

// ==========================================
// 请求 / 响应类型
// ==========================================

/// 导入响应
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ImportResponse {
    /// 同步完成
    Completed(ImportSummary),
    /// 已转入后台任务
    Queued {
        job_id: String,
        estimated_rows: i64,
        message: String,
    },
}

/// 导出请求参数（原始文本,由 API 解析）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub selected_fields: Vec<String>,
    /// "rtl" | "ltr",默认 rtl
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    /// "pending" | "verified"
    #[serde(default)]
    pub status: Option<String>,
}

/// 导出响应
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExportResponse {
    Completed(ExportOutcome),
    Queued {
        job_id: String,
        total_rows: i64,
        message: String,
    },
}

/// 任务状态查询响应
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub progress_percentage: f64,
    pub estimated_time_remaining_seconds: Option<i64>,
    pub result_counters: TransferCounters,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl JobStatusResponse {
    fn from_job(job: TransferJob) -> Self {
        let progress_percentage = job.progress_percentage();
        let estimated_time_remaining_seconds = job.estimated_time_remaining(Utc::now());
        Self {
            job_id: job.job_id,
            kind: job.kind,
            status: job.status,
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            progress_percentage,
            estimated_time_remaining_seconds,
            result_counters: job.counters,
            errors: job.error_list,
            error_message: job.error_message,
            result_message: job.result_message,
            file_name: job.file_name,
            file_path: job.file_path,
        }
    }
}

// ==========================================
// TransferApi
// ==========================================
pub struct TransferApi {
    conn: Arc<Mutex<Connection>>,
    catalog: Arc<FieldCatalog>,
    config: TransferConfig,
    jobs: TransferJobRepository,
    runner: JobRunner,
}

impl TransferApi {
    pub fn new(conn: Arc<Mutex<Connection>>, config: TransferConfig) -> Self {
        let catalog = field_catalog::shared();
        Self {
            jobs: TransferJobRepository::new(conn.clone()),
            runner: JobRunner::new(conn.clone(), catalog.clone(), config.clone()),
            conn,
            catalog,
            config,
        }
    }

    /// 从配置读取器构建（config_kv 覆写生效）
    pub fn from_reader(
        conn: Arc<Mutex<Connection>>,
        reader: &dyn TransferConfigReader,
    ) -> ApiResult<Self> {
        let config = reader
            .load_transfer_config()
            .map_err(|e| ApiError::InternalError(format!("配置加载失败: {}", e)))?;
        Ok(Self::new(conn, config))
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// 导入表格文件
    ///
    /// # 参数
    /// - file_path: 上传文件（.xlsx / .csv）
    /// - selected_fields: 导入字段选择（空表示全部字段）
    ///
    /// # 返回
    /// - Completed: 小文件同步导入的结果
    /// - Queued: 大文件已暂存并提交后台任务
    #[instrument(skip(self, selected_fields), fields(file = %file_path.display()))]
    pub async fn import_file(
        &self,
        file_path: &Path,
        selected_fields: Vec<String>,
    ) -> ApiResult<ImportResponse> {
        // 提前校验存在性与格式
        SpreadsheetStreamReader::open(file_path)?;
        let file_size = fs::metadata(file_path)
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?
            .len();

        if self.config.should_run_async(file_size) {
            return self.queue_import(file_path, file_size, selected_fields);
        }

        let conn = self.conn.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let path = file_path.to_path_buf();

        let summary = tokio::task::spawn_blocking(move || {
            ImportPipeline::new(conn, catalog, config).run(
                &path,
                &selected_fields,
                &mut NoopProgress,
                &CancelFlag::new(),
            )
        })
        .await
        .map_err(|e| ApiError::InternalError(format!("任务执行失败: {}", e)))??;

        Ok(ImportResponse::Completed(summary))
    }

    /// 暂存上传文件并创建 pending 导入任务
    fn queue_import(
        &self,
        file_path: &Path,
        file_size: u64,
        selected_fields: Vec<String>,
    ) -> ApiResult<ImportResponse> {
        let mut job = TransferJob::new(JobKind::Import, selected_fields.clone(), Direction::default());
        let original_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        fs::create_dir_all(&self.config.imports_dir)
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        let staged = self
            .config
            .imports_dir
            .join(format!("{}_{}", job.job_id, original_name));
        fs::copy(file_path, &staged).map_err(|e| ApiError::InternalError(e.to_string()))?;

        let estimated_rows = (self.config.estimate_rows(file_size) as i64 - 1).max(0);
        job.total_rows = estimated_rows;
        job.file_path = Some(staged.to_string_lossy().into_owned());
        job.file_name = Some(original_name);
        self.jobs.insert(&job)?;

        self.runner
            .spawn_import(job.job_id.clone(), staged, selected_fields, estimated_rows);

        info!(job_id = %job.job_id, file_size, estimated_rows, "导入已转入后台任务");
        Ok(ImportResponse::Queued {
            message: i18n::t_with_args(
                "import.started_async",
                &[("rows", &estimated_rows.to_string())],
            ),
            job_id: job.job_id,
            estimated_rows,
        })
    }

    /// 导出档案
    #[instrument(skip(self, params))]
    pub async fn export_records(&self, params: ExportParams) -> ApiResult<ExportResponse> {
        let request = self.export_request(params)?;
        let total_rows = IdentityRepository::new(self.conn.clone()).count_for_export(&request.filter)?;

        let now = Utc::now();
        let file_name = export_file_name(now);
        let destination = self.config.exports_dir.join(&file_name);

        if total_rows as u64 > self.config.async_estimated_rows_threshold {
            return self.queue_export(request, destination, file_name, total_rows);
        }

        let conn = self.conn.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            ExportPipeline::new(conn, catalog, config).run(
                &request,
                &destination,
                &mut NoopProgress,
                &CancelFlag::new(),
            )
        })
        .await
        .map_err(|e| ApiError::InternalError(format!("任务执行失败: {}", e)))??;

        Ok(ExportResponse::Completed(outcome))
    }

    fn queue_export(
        &self,
        request: ExportRequest,
        destination: PathBuf,
        file_name: String,
        total_rows: i64,
    ) -> ApiResult<ExportResponse> {
        let mut job = TransferJob::new(
            JobKind::Export,
            request.selected_fields.clone(),
            request.direction,
        );
        job.total_rows = total_rows;
        job.file_name = Some(file_name);
        job.search = request.filter.search.clone();
        job.status_filter = request.filter.status;
        self.jobs.insert(&job)?;

        self.runner.spawn_export(job.job_id.clone(), request, destination);

        info!(job_id = %job.job_id, total_rows, "导出已转入后台任务");
        Ok(ExportResponse::Queued {
            job_id: job.job_id,
            total_rows,
            message: i18n::t("export.started_async"),
        })
    }

    fn export_request(&self, params: ExportParams) -> ApiResult<ExportRequest> {
        let status = match params.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(ReviewFilter::parse(raw).ok_or_else(|| {
                ApiError::InvalidInput(i18n::t_with_args(
                    "common.invalid_input",
                    &[("reason", &format!("status={}", raw))],
                ))
            })?),
        };
        let search = params
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(ExportRequest {
            selected_fields: params.selected_fields,
            direction: params
                .direction
                .as_deref()
                .map(Direction::parse)
                .unwrap_or_default(),
            filter: ExportFilter { search, status },
        })
    }

    /// 查询任务状态
    pub fn job_status(&self, job_id: &str) -> ApiResult<JobStatusResponse> {
        let job = self
            .jobs
            .find(job_id)?
            .ok_or_else(|| ApiError::NotFound(i18n::t("job.not_found")))?;
        Ok(JobStatusResponse::from_job(job))
    }

    /// 清理过期文件与终态任务
    ///
    /// # 参数
    /// - retention_days: 保留天数（None 使用配置值）
    pub fn cleanup(&self, retention_days: Option<i64>) -> ApiResult<CleanupReport> {
        let days = retention_days.unwrap_or(self.config.retention_days);
        Ok(cleanup_old_files(&self.config, &self.jobs, days, Utc::now())?)
    }
}
