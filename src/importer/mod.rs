// ==========================================
// 受助人登记系统 - 导入层
// ==========================================
// 职责: 表格文件 → 档案记录（批量 upsert）
// 支持: Excel (.xlsx), CSV
// 流程: 流式读取 → 表头识别 → 行分类 → 行校验 → 批量写入
// ==========================================

// 模块声明
pub mod batch_upsert;
pub mod error;
pub mod header_resolver;
pub mod household;
pub mod import_pipeline;
pub mod parsed_row;
pub mod row_classifier;
pub mod sheet_reader;

// 重导出核心类型
pub use batch_upsert::{BatchOutcome, BatchUpsertEngine};
pub use error::{ImportError, ImportResult};
pub use header_resolver::{HeaderResolution, HeaderResolver};
pub use import_pipeline::{ImportPipeline, ImportSummary};
pub use parsed_row::ParsedRow;
pub use row_classifier::{RowClass, RowClassifier};
pub use sheet_reader::{SheetFormat, SheetRow, SpreadsheetStreamReader};
