// ==========================================
// 受助人登记系统 - 配置层
// ==========================================
// 职责: 导入/导出传输参数,支持 config_kv 覆写
// 存储: config_kv 表（scope_id = 'global'）
// ==========================================

pub mod config_manager;
pub mod transfer_config;
pub mod transfer_config_trait;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use transfer_config::{default_storage_root, TransferConfig};
pub use transfer_config_trait::TransferConfigReader;
