// ==========================================
// 受助人登记系统 - 导出层
// ==========================================
// 职责: 档案记录 → 表格文件（流式写出）
// 流程: 字段选择 → 分页读取 → 行渲染 → 流式写出 → 方向标记修补
// ==========================================

pub mod direction_patcher;
pub mod error;
pub mod export_pipeline;
pub mod row_renderer;
pub mod sheet_writer;

// 重导出核心类型
pub use direction_patcher::{DirectionMetadataPatcher, PatchError};
pub use error::{ExportError, ExportResult};
pub use export_pipeline::{export_file_name, ExportOutcome, ExportPipeline, ExportRequest};
pub use row_renderer::RowRenderer;
pub use sheet_writer::SpreadsheetStreamWriter;
