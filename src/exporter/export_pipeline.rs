// ==========================================
// 受助人登记系统 - 导出流水线
// ==========================================
// 流程: 字段选择（目录排序）→ 计数 → 按游标分页读取 → 逐行流式写出
//       → 保存 → rtl 时修补方向标记（失败降级,仅告警）
// 取消检查点: 每页读取之前
// ==========================================

use crate::config::TransferConfig;
use crate::domain::field_catalog::FieldCatalog;
use crate::domain::transfer_job::TransferCounters;
use crate::domain::types::Direction;
use crate::exporter::direction_patcher::DirectionMetadataPatcher;
use crate::exporter::error::{ExportError, ExportResult};
use crate::exporter::row_renderer::RowRenderer;
use crate::exporter::sheet_writer::SpreadsheetStreamWriter;
use crate::i18n;
use crate::jobs::{CancelFlag, ProgressSink};
use crate::repository::{ExportCursor, ExportFilter, IdentityRepository};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// 导出请求
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// 导出字段（空表示全部字段）
    pub selected_fields: Vec<String>,
    pub direction: Direction,
    pub filter: ExportFilter,
}

/// 导出结果
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub file_path: PathBuf,
    pub file_name: String,
    pub rows_exported: i64,
    pub total_rows: i64,
    pub direction: Direction,
    /// rtl 标记是否写入成功（ltr 恒为 true）
    pub direction_applied: bool,
    pub message: String,
}

/// 导出文件名: beneficiaries_YYYYmmdd_HHMMSS.xlsx
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("beneficiaries_{}.xlsx", now.format("%Y%m%d_%H%M%S"))
}

pub struct ExportPipeline {
    identities: IdentityRepository,
    catalog: Arc<FieldCatalog>,
    config: TransferConfig,
}

impl ExportPipeline {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        catalog: Arc<FieldCatalog>,
        config: TransferConfig,
    ) -> Self {
        Self {
            identities: IdentityRepository::new(conn),
            catalog,
            config,
        }
    }

    /// 执行导出
    ///
    /// # 参数
    /// - request: 字段选择、方向与过滤条件
    /// - destination: 输出文件路径（父目录不存在时创建）
    /// - sink: 进度接收方
    /// - cancel: 取消标记,每页读取之前检查
    #[instrument(skip(self, request, sink, cancel), fields(destination = %destination.display()))]
    pub fn run(
        &self,
        request: &ExportRequest,
        destination: &Path,
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ExportResult<ExportOutcome> {
        let renderer = RowRenderer::new(&self.catalog, &request.selected_fields);
        let total_rows = self.identities.count_for_export(&request.filter)?;
        sink.set_total(total_rows)?;
        debug!(
            columns = renderer.keys().len(),
            with_household = renderer.needs_household(),
            total_rows,
            "导出列已确定"
        );

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = SpreadsheetStreamWriter::create(destination, renderer.header_labels())?;
        let chunk_size = self.config.export_chunk_size.max(1);
        let progress_every = self.config.export_progress_every_rows.max(1) as i64;
        let mut cursor: Option<ExportCursor> = None;
        let mut exported: i64 = 0;

        loop {
            if cancel.is_cancelled() {
                warn!(exported, "导出已取消");
                return Err(ExportError::Cancelled);
            }

            let page = self
                .identities
                .export_page(
                &request.filter,
                cursor.as_ref(),
                chunk_size,
                renderer.needs_household(),
            )?;
            let page_len = page.len();

            for (record, members) in &page {
                exported += 1;
                writer.write_row(&renderer.render(exported as usize, record, members))?;
                if exported % progress_every == 0 {
                    sink.snapshot(exported, &export_counters(exported), &[])?;
                }
            }

            cursor = page.last().map(|(record, _)| ExportCursor {
                updated_at: record.updated_at,
                id: record.id,
            });
            if page_len < chunk_size {
                break;
            }
        }

        let file_path = writer.finish()?;
        sink.snapshot(exported, &export_counters(exported), &[])?;

        let direction_applied = match request.direction {
            Direction::Ltr => true,
            Direction::Rtl => match DirectionMetadataPatcher::set_right_to_left(&file_path, true) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "方向标记写入失败，按默认方向输出");
                    false
                }
            },
        };

        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let message = i18n::t_with_args("export.summary", &[("count", &exported.to_string())]);

        info!(exported, direction = %request.direction, "导出完成");
        Ok(ExportOutcome {
            file_path,
            file_name,
            rows_exported: exported,
            total_rows,
            direction: request.direction,
            direction_applied,
            message,
        })
    }
}

fn export_counters(exported: i64) -> TransferCounters {
    TransferCounters {
        imported: exported,
        ..TransferCounters::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::NoopProgress;
    use crate::repository::{IdentityDraft, IdentityStore, SqliteIdentityStore};
    use std::ops::ControlFlow;

    fn seeded(count: usize) -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        for i in 0..count {
            let draft = IdentityDraft {
                national_id: format!("{}", 100000 + i),
                full_name: format!("مستفيد {}", i),
                ..Default::default()
            };
            SqliteIdentityStore.create(&conn, &draft).unwrap();
        }
        Arc::new(Mutex::new(conn))
    }

    fn pipeline(conn: Arc<Mutex<Connection>>, chunk: usize) -> ExportPipeline {
        let mut config = TransferConfig::with_storage_root(Path::new("/tmp/relief-registry-test"));
        config.export_chunk_size = chunk;
        ExportPipeline::new(conn, Arc::new(FieldCatalog::standard()), config)
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        crate::importer::SpreadsheetStreamReader::open(path)
            .unwrap()
            .for_each_row(|row| {
                rows.push(row.cells);
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        rows
    }

    #[test]
    fn test_paged_export_writes_every_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested").join("out.xlsx");
        let request = ExportRequest {
            selected_fields: vec!["national_id".into(), "row_number".into()],
            direction: Direction::Ltr,
            ..Default::default()
        };

        let outcome = pipeline(seeded(5), 2)
            .run(&request, &destination, &mut NoopProgress, &CancelFlag::new())
            .unwrap();
        assert_eq!(outcome.rows_exported, 5);
        assert_eq!(outcome.message, "تم تصدير 5 سجل بنجاح.");

        let rows = read_rows(&destination);
        assert_eq!(rows[0], vec!["رقم", "رقم الهوية"]);
        assert_eq!(rows.len(), 6);
        let mut ids: Vec<&str> = rows[1..].iter().map(|r| r[1].as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert_eq!(rows[5][0], "5");
        assert!(!DirectionMetadataPatcher::is_right_to_left(&destination).unwrap());
    }

    #[test]
    fn test_rtl_export_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("rtl.xlsx");

        let outcome = pipeline(seeded(1), 100)
            .run(&ExportRequest::default(), &destination, &mut NoopProgress, &CancelFlag::new())
            .unwrap();
        assert!(outcome.direction_applied);
        assert!(DirectionMetadataPatcher::is_right_to_left(&destination).unwrap());
        // 修补不影响数据读取
        assert_eq!(read_rows(&destination).len(), 2);
    }

    #[test]
    fn test_cancelled_export() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = pipeline(seeded(1), 100)
            .run(&ExportRequest::default(), &dir.path().join("x.xlsx"), &mut NoopProgress, &cancel)
            .unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
    }
}
