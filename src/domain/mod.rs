// ==========================================
// 受助人登记系统 - 领域模型层
// ==========================================
// 职责: 定义字段目录、档案实体、传输任务与通用类型
// 红线: 不含数据访问逻辑,不含导入/导出流程逻辑
// ==========================================

pub mod field_catalog;
pub mod identity;
pub mod transfer_job;
pub mod types;

// 重导出核心类型
pub use field_catalog::{ColumnMap, FieldCatalog, FieldDefinition};
pub use identity::{HouseholdMember, IdentityFields, IdentityRecord, Relation};
pub use transfer_job::{JobKind, JobStatus, TransferCounters, TransferJob};
pub use types::{Direction, ReviewFilter};
