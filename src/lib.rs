// ==========================================
// 受助人登记系统 - 核心库
// ==========================================
// 系统定位: 救助机构受助人档案登记（身份 + 家庭成员）
// 核心: 表格批量导入/导出引擎
// 技术栈: Rust + SQLite + XLSX 流式读写
// ==========================================

// 初始化国际化系统（用户可见消息默认阿拉伯语）
rust_i18n::i18n!("locales", fallback = "ar");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 字段目录、档案实体、传输任务
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 表头识别、行分类、批量 upsert
pub mod importer;

// 导出层 - 流式写出、方向元数据修补
pub mod exporter;

// 任务层 - 进度状态机、异步执行器、过期清理
pub mod jobs;

// 配置层 - 传输参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/建表统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 对外边界
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    ColumnMap, FieldCatalog, FieldDefinition, HouseholdMember, IdentityRecord, JobKind,
    JobStatus, Relation, TransferJob,
};

pub use importer::{
    BatchUpsertEngine, HeaderResolver, ImportError, ImportPipeline, ImportSummary, ParsedRow,
    RowClass, RowClassifier, SpreadsheetStreamReader,
};

pub use exporter::{DirectionMetadataPatcher, ExportError, ExportPipeline, SpreadsheetStreamWriter};

pub use jobs::{JobProgressTracker, JobRunner};

pub use api::TransferApi;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "سجل المستفيدين";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
