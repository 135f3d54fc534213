// ==========================================
// 受助人登记系统 - 导入流水线
// ==========================================
// 两遍扫描:
// - 第 1 遍: 缓冲前 N 行识别表头 → 构建列映射 → 必需字段校验（快速失败）
//            需要总行数时继续扫描,统计表头之后的数据行数
// - 第 2 遍: 跳过表头及其之前的行 → 对齐列宽 → 分类 → 校验 → 按批 upsert
// 行级错误累计（上限 error_cap）,不中断导入；运行级错误中断并上抛
// 取消检查点: 每批写入之前
// ==========================================

use crate::config::TransferConfig;
use crate::domain::field_catalog::{ColumnMap, FieldCatalog};
use crate::domain::transfer_job::TransferCounters;
use crate::domain::types::Direction;
use crate::exporter::DirectionMetadataPatcher;
use crate::i18n;
use crate::importer::batch_upsert::BatchUpsertEngine;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::header_resolver::{HeaderResolution, HeaderResolver};
use crate::importer::parsed_row::ParsedRow;
use crate::importer::row_classifier::{RowClass, RowClassifier};
use crate::importer::sheet_reader::{SheetFormat, SheetRow, SpreadsheetStreamReader};
use crate::jobs::{CancelFlag, ProgressSink};
use crate::repository::{IdentityStore, SqliteIdentityStore};
use rusqlite::Connection;
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// 行级错误写入日志的条数上限
const LOGGED_ROW_ERRORS: usize = 10;

// ==========================================
// ImportSummary - 导入结果
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub imported: i64,
    pub created: i64,
    pub updated: i64,
    /// 前 error_cap 条行级错误
    pub errors: Vec<String>,
    pub errors_count: i64,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub message: String,
    /// 上传文件的显示方向（仅 xlsx 可读取）
    pub direction: Option<Direction>,
    pub header_row_number: usize,
    pub column_map: ColumnMap,
}

impl ImportSummary {
    pub fn counters(&self) -> TransferCounters {
        TransferCounters {
            imported: self.imported,
            created: self.created,
            updated: self.updated,
            errors_count: self.errors_count,
        }
    }
}

/// 汇总消息: 处理条数 + 可选的 新建/更新/错误 子句
pub fn summary_message(counters: &TransferCounters) -> String {
    let mut message = i18n::t_with_args(
        "import.summary_processed",
        &[("count", &counters.imported.to_string())],
    );
    let clauses = [
        ("import.summary_created", counters.created),
        ("import.summary_updated", counters.updated),
        ("import.summary_errors", counters.errors_count),
    ];
    for (key, count) in clauses {
        if count > 0 {
            message.push_str(&i18n::t_with_args(key, &[("count", &count.to_string())]));
        }
    }
    message
}

// ==========================================
// 列映射结果（两遍共享）
// ==========================================
struct ResolvedLayout {
    resolution: HeaderResolution,
    columns: Arc<ColumnMap>,
}

// ==========================================
// 第 2 遍运行状态
// ==========================================
struct RunState {
    batch: Vec<ParsedRow>,
    counters: TransferCounters,
    errors: Vec<String>,
    processed_rows: i64,
}

impl RunState {
    fn new(batch_size: usize) -> Self {
        Self {
            batch: Vec::with_capacity(batch_size),
            counters: TransferCounters::default(),
            errors: Vec::new(),
            processed_rows: 0,
        }
    }

    /// 记录行级错误（列表截断,计数不截断）
    fn record_error(&mut self, row: usize, message: String, cap: usize) {
        self.counters.errors_count += 1;
        if self.counters.errors_count as usize <= LOGGED_ROW_ERRORS {
            warn!(row, error = %message, "行数据错误");
        }
        if self.errors.len() < cap {
            self.errors.push(message);
        }
    }
}

// ==========================================
// ImportPipeline
// ==========================================
pub struct ImportPipeline<S = SqliteIdentityStore>
where
    S: IdentityStore,
{
    engine: BatchUpsertEngine<S>,
    catalog: Arc<FieldCatalog>,
    config: TransferConfig,
}

impl ImportPipeline<SqliteIdentityStore> {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        catalog: Arc<FieldCatalog>,
        config: TransferConfig,
    ) -> Self {
        Self::with_engine(BatchUpsertEngine::new(conn, catalog), config)
    }
}

impl<S> ImportPipeline<S>
where
    S: IdentityStore,
{
    pub fn with_engine(engine: BatchUpsertEngine<S>, config: TransferConfig) -> Self {
        let catalog = engine.catalog().clone();
        Self {
            engine,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// 执行导入
    ///
    /// # 参数
    /// - path: 待导入文件（.xlsx / .csv）
    /// - selected_fields: 导入字段选择集（空表示全部字段）
    /// - sink: 进度接收方（异步任务为 JobProgressTracker）
    /// - cancel: 取消标记,每批写入之前检查
    ///
    /// # 返回
    /// - Ok(ImportSummary): 导入结果
    /// - Err(SchemaMismatch): 表头不可用,尚未读取任何数据行
    /// - Err(其他): 运行级错误,已提交的批次保留
    #[instrument(skip(self, selected_fields, sink, cancel), fields(path = %path.display()))]
    pub fn run(
        &self,
        path: &Path,
        selected_fields: &[String],
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ImportResult<ImportSummary> {
        let reader = SpreadsheetStreamReader::open(path)?;
        let classifier = RowClassifier::new(self.catalog.clone());

        // ===== 第 1 遍: 表头识别 + 可选计数 =====
        let (layout, counted) = self.scan_layout(&reader, &classifier, sink.wants_total())?;
        info!(
            header_row = layout.resolution.header_row_number,
            column_count = layout.resolution.column_count,
            mapped_fields = layout.columns.len(),
            "表头识别完成"
        );

        if let Some(total) = counted {
            sink.set_total(total)?;
        }

        // ===== 第 2 遍: 数据行 =====
        let state = self.process_rows(&reader, &classifier, &layout, selected_fields, sink, cancel)?;

        let total_rows = counted.unwrap_or(state.processed_rows);
        let direction = self.detect_direction(&reader);
        let message = summary_message(&state.counters);

        info!(
            created = state.counters.created,
            updated = state.counters.updated,
            errors = state.counters.errors_count,
            processed = state.processed_rows,
            "导入完成"
        );

        Ok(ImportSummary {
            imported: state.counters.imported,
            created: state.counters.created,
            updated: state.counters.updated,
            errors: state.errors,
            errors_count: state.counters.errors_count,
            total_rows,
            processed_rows: state.processed_rows,
            message,
            direction,
            header_row_number: layout.resolution.header_row_number,
            column_map: (*layout.columns).clone(),
        })
    }

    /// 第 1 遍
    ///
    /// # 返回
    /// - (列映射, 数据行数)；count_rows=false 时读满扫描窗口即停止,数据行数为 None
    fn scan_layout(
        &self,
        reader: &SpreadsheetStreamReader,
        classifier: &RowClassifier,
        count_rows: bool,
    ) -> ImportResult<(ResolvedLayout, Option<i64>)> {
        let window = self.config.header_scan_rows.max(1);
        let mut head: Vec<SheetRow> = Vec::with_capacity(window);
        let mut layout: Option<ResolvedLayout> = None;
        let mut tail_rows: i64 = 0;

        // 扫描窗口按物理行号计算（xlsx 读取不产出空行）
        reader.for_each_row(|mut row| {
            if layout.is_none() {
                if row.number <= window {
                    let window_full = row.number == window;
                    head.push(row);
                    if !window_full {
                        return Ok(ControlFlow::Continue(()));
                    }
                    // 扫描窗口已满: 立即校验表头,不可用时不再读取后续数据
                    layout = Some(self.resolve_layout(&head)?);
                    return Ok(if count_rows {
                        ControlFlow::Continue(())
                    } else {
                        ControlFlow::Break(())
                    });
                }

                // 窗口末尾为空行: 以窗口之后的首行结束扫描
                layout = Some(self.resolve_layout(&head)?);
                if !count_rows {
                    return Ok(ControlFlow::Break(()));
                }
            }

            if let Some(resolved) = &layout {
                row.align_to(resolved.resolution.column_count);
                if classifier.classify(&row.cells) == RowClass::Data {
                    tail_rows += 1;
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let layout = match layout {
            Some(layout) => layout,
            None => self.resolve_layout(&head)?,
        };

        let counted = if count_rows {
            let head_rows = head
                .into_iter()
                .filter(|row| row.number > layout.resolution.header_row_number)
                .filter(|row| {
                    let mut row = row.clone();
                    row.align_to(layout.resolution.column_count);
                    classifier.classify(&row.cells) == RowClass::Data
                })
                .count() as i64;
            debug!(rows = head_rows + tail_rows, "数据行计数完成");
            Some(head_rows + tail_rows)
        } else {
            None
        };

        Ok((layout, counted))
    }

    fn resolve_layout(&self, head: &[SheetRow]) -> ImportResult<ResolvedLayout> {
        let resolver = HeaderResolver::new(self.catalog.clone(), self.config.header_scan_rows);
        let resolution = resolver.resolve(head);
        let columns = resolver.build_column_map(&resolution.header_row);
        resolver.require_mandatory(&columns, &resolution)?;
        Ok(ResolvedLayout {
            resolution,
            columns: Arc::new(columns),
        })
    }

    /// 第 2 遍
    fn process_rows(
        &self,
        reader: &SpreadsheetStreamReader,
        classifier: &RowClassifier,
        layout: &ResolvedLayout,
        selected_fields: &[String],
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ImportResult<RunState> {
        let batch_size = self.config.batch_size.max(1);
        let header_row_number = layout.resolution.header_row_number;
        let column_count = layout.resolution.column_count;
        let mut state = RunState::new(batch_size);

        reader.for_each_row(|mut row| {
            if row.number <= header_row_number {
                return Ok(ControlFlow::Continue(()));
            }

            row.align_to(column_count);
            match classifier.classify(&row.cells) {
                RowClass::Empty => return Ok(ControlFlow::Continue(())),
                RowClass::HeaderLike => {
                    debug!(row = row.number, "跳过重复表头行");
                    return Ok(ControlFlow::Continue(()));
                }
                RowClass::Data => {}
            }

            state.processed_rows += 1;
            let parsed = ParsedRow::new(row.number, row.cells, layout.columns.clone());
            match parsed.validate() {
                Ok(()) => state.batch.push(parsed),
                Err(e) => state.record_error(row.number, e.user_message(), self.config.error_cap),
            }

            if state.batch.len() >= batch_size {
                self.flush(&mut state, selected_fields, sink, cancel)?;
            }
            Ok(ControlFlow::Continue(()))
        })?;

        self.flush(&mut state, selected_fields, sink, cancel)?;
        Ok(state)
    }

    /// 写入当前批次并上报进度
    fn flush(
        &self,
        state: &mut RunState,
        selected_fields: &[String],
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ImportResult<()> {
        if cancel.is_cancelled() {
            warn!(processed = state.processed_rows, "导入已取消");
            return Err(ImportError::Cancelled);
        }

        if !state.batch.is_empty() {
            let batch = std::mem::take(&mut state.batch);
            let outcome = self.engine.apply_batch(&batch, selected_fields)?;

            state.counters.absorb(&TransferCounters {
                imported: outcome.imported,
                created: outcome.created,
                updated: outcome.updated,
                errors_count: 0,
            });
            for message in outcome.errors {
                let row = state.processed_rows as usize;
                state.record_error(row, message, self.config.error_cap);
            }
            state.batch.reserve(self.config.batch_size);
        }

        sink.snapshot(state.processed_rows, &state.counters, &state.errors)?;
        Ok(())
    }

    /// 读取上传文件的方向标记,失败时不影响导入结果
    fn detect_direction(&self, reader: &SpreadsheetStreamReader) -> Option<Direction> {
        if reader.format() != SheetFormat::Xlsx {
            return None;
        }
        match DirectionMetadataPatcher::is_right_to_left(reader.path()) {
            Ok(true) => Some(Direction::Rtl),
            Ok(false) => Some(Direction::Ltr),
            Err(e) => {
                debug!(error = %e, "读取方向标记失败");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::NoopProgress;
    use crate::repository::IdentityRepository;
    use std::io::Write;

    fn pipeline(batch_size: usize) -> (Arc<Mutex<Connection>>, ImportPipeline) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        let mut config = TransferConfig::with_storage_root(Path::new("/tmp/relief-registry-test"));
        config.batch_size = batch_size;
        let pipeline = ImportPipeline::new(shared.clone(), Arc::new(FieldCatalog::standard()), config);
        (shared, pipeline)
    }

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// 记录所有回调的测试接收方
    #[derive(Default)]
    struct RecordingSink {
        total: Option<i64>,
        snapshots: Vec<i64>,
    }

    impl ProgressSink for RecordingSink {
        fn wants_total(&self) -> bool {
            true
        }

        fn set_total(&mut self, total_rows: i64) -> crate::repository::RepositoryResult<()> {
            self.total = Some(total_rows);
            Ok(())
        }

        fn snapshot(
            &mut self,
            processed_rows: i64,
            _counters: &TransferCounters,
            _errors: &[String],
        ) -> crate::repository::RepositoryResult<()> {
            self.snapshots.push(processed_rows);
            Ok(())
        }
    }

    #[test]
    fn test_scenario_import() {
        let (_, pipeline) = pipeline(500);
        let file = csv_file("رقم الهوية,الاسم الرباعي,رقم الجوال\n123456789,أحمد علي,0591234567\n");

        let summary = pipeline
            .run(file.path(), &[], &mut NoopProgress, &CancelFlag::new())
            .unwrap();

        assert_eq!(summary.column_map.get("national_id"), Some(0));
        assert_eq!(summary.column_map.get("full_name"), Some(1));
        assert_eq!(summary.column_map.get("phone"), Some(2));
        assert_eq!((summary.created, summary.imported, summary.errors_count), (1, 1, 0));
        assert_eq!(summary.direction, None);
        assert_eq!(summary.message, "تم معالجة 1 سجل بنجاح. تم إنشاء 1 سجل جديد.");
    }

    #[test]
    fn test_blank_key_row_is_skipped_with_error() {
        let (shared, pipeline) = pipeline(500);
        let file = csv_file(
            "رقم الهوية,الاسم الرباعي,رقم الجوال\n\
             ,سالم,0590000000\n\
             123456789,أحمد علي,0591234567\n",
        );

        let summary = pipeline
            .run(file.path(), &[], &mut NoopProgress, &CancelFlag::new())
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors_count, 1);
        assert!(summary.errors[0].contains("رقم الهوية"));
        assert!(summary.errors[0].starts_with("السطر 2"));
        assert_eq!(IdentityRepository::new(shared).count_active().unwrap(), 1);
    }

    #[test]
    fn test_preamble_repeated_header_and_counting() {
        let (_, pipeline) = pipeline(2);
        let file = csv_file(
            "كشف المستفيدين,,\n\
             رقم الهوية,الاسم الرباعي,رقم الجوال,المنطقة\n\
             111111,أ,1,\n\
             ,,,\n\
             رقم الهوية,الاسم الرباعي,رقم الجوال,المنطقة\n\
             222222,ب,2,غزة,زائد\n\
             333333,ج,3,\n",
        );

        let mut sink = RecordingSink::default();
        let summary = pipeline
            .run(file.path(), &[], &mut sink, &CancelFlag::new())
            .unwrap();

        assert_eq!(summary.header_row_number, 2);
        assert_eq!(sink.total, Some(3));
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.processed_rows, 3);
        assert_eq!(summary.created, 3);
        // 快照单调不减
        assert!(sink.snapshots.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(sink.snapshots.last(), Some(&3));
    }

    #[test]
    fn test_schema_mismatch_fails_before_data() {
        let (shared, pipeline) = pipeline(500);
        let file = csv_file("المنطقة,المسجد\nغزة,الرحمة\n");

        let err = pipeline
            .run(file.path(), &[], &mut NoopProgress, &CancelFlag::new())
            .unwrap_err();
        match err {
            ImportError::SchemaMismatch { headers, .. } => {
                assert_eq!(headers, vec!["المنطقة", "المسجد"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(IdentityRepository::new(shared).count_active().unwrap(), 0);
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let (shared, pipeline) = pipeline(500);
        let file = csv_file("رقم الهوية,الاسم الرباعي\n123456789,أحمد\n");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = pipeline
            .run(file.path(), &[], &mut NoopProgress, &cancel)
            .unwrap_err();
        assert!(matches!(err, ImportError::Cancelled));
        assert_eq!(IdentityRepository::new(shared).count_active().unwrap(), 0);
    }

    #[test]
    fn test_summary_message_clauses() {
        let counters = TransferCounters {
            imported: 3,
            created: 1,
            updated: 2,
            errors_count: 1,
        };
        assert_eq!(
            summary_message(&counters),
            "تم معالجة 3 سجل بنجاح. تم إنشاء 1 سجل جديد. تم تحديث 2 سجل موجود. حدثت أخطاء في 1 سطر."
        );
    }
}
