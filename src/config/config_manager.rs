// ==========================================
// 受助人登记系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::transfer_config::{default_storage_root, TransferConfig};
use crate::config::transfer_config_trait::TransferConfigReader;
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
    storage_root: PathBuf,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            storage_root: default_storage_root(),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self {
            conn,
            storage_root: default_storage_root(),
        })
    }

    /// 覆盖存储根目录（imports/exports 默认位于其下）
    pub fn with_storage_root(mut self, root: PathBuf) -> Self {
        self.storage_root = root;
        self
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取全部 global 配置
    pub fn get_all_global(&self) -> ConfigResult<HashMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// 读取数值配置,缺失或格式错误时使用默认值
    fn parsed_or<T: FromStr + Copy>(&self, key: &str, default: T) -> ConfigResult<T> {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }
}

// ==========================================
// TransferConfigReader Trait 实现
// ==========================================
impl TransferConfigReader for ConfigManager {
    fn load_transfer_config(&self) -> ConfigResult<TransferConfig> {
        let d = TransferConfig::with_storage_root(&self.storage_root);

        let imports_dir = self
            .get_config_value(config_keys::IMPORTS_DIR)?
            .map(PathBuf::from)
            .unwrap_or(d.imports_dir);
        let exports_dir = self
            .get_config_value(config_keys::EXPORTS_DIR)?
            .map(PathBuf::from)
            .unwrap_or(d.exports_dir);

        Ok(TransferConfig {
            batch_size: self.parsed_or(config_keys::BATCH_SIZE, d.batch_size)?.max(1),
            header_scan_rows: self
                .parsed_or(config_keys::HEADER_SCAN_ROWS, d.header_scan_rows)?
                .max(1),
            error_cap: self.parsed_or(config_keys::ERROR_CAP, d.error_cap)?,
            progress_every_rows: self
                .parsed_or(config_keys::PROGRESS_EVERY_ROWS, d.progress_every_rows)?
                .max(1),
            export_chunk_size: self
                .parsed_or(config_keys::EXPORT_CHUNK_SIZE, d.export_chunk_size)?
                .max(1),
            export_progress_every_rows: self
                .parsed_or(config_keys::EXPORT_PROGRESS_EVERY_ROWS, d.export_progress_every_rows)?
                .max(1),
            async_file_size_threshold: self
                .parsed_or(config_keys::ASYNC_FILE_SIZE_THRESHOLD, d.async_file_size_threshold)?,
            async_estimated_rows_threshold: self.parsed_or(
                config_keys::ASYNC_ESTIMATED_ROWS_THRESHOLD,
                d.async_estimated_rows_threshold,
            )?,
            bytes_per_row_estimate: self
                .parsed_or(config_keys::BYTES_PER_ROW_ESTIMATE, d.bytes_per_row_estimate)?
                .max(1),
            import_timeout_secs: self
                .parsed_or(config_keys::IMPORT_TIMEOUT_SECS, d.import_timeout_secs)?,
            export_timeout_secs: self
                .parsed_or(config_keys::EXPORT_TIMEOUT_SECS, d.export_timeout_secs)?,
            retention_days: self.parsed_or(config_keys::RETENTION_DAYS, d.retention_days)?,
            imports_dir,
            exports_dir,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 导入
    pub const BATCH_SIZE: &str = "transfer.batch_size";
    pub const HEADER_SCAN_ROWS: &str = "transfer.header_scan_rows";
    pub const ERROR_CAP: &str = "transfer.error_cap";
    pub const PROGRESS_EVERY_ROWS: &str = "transfer.progress_every_rows";

    // 导出
    pub const EXPORT_CHUNK_SIZE: &str = "transfer.export_chunk_size";
    pub const EXPORT_PROGRESS_EVERY_ROWS: &str = "transfer.export_progress_every_rows";

    // 同步/异步判定
    pub const ASYNC_FILE_SIZE_THRESHOLD: &str = "transfer.async_file_size_threshold";
    pub const ASYNC_ESTIMATED_ROWS_THRESHOLD: &str = "transfer.async_estimated_rows_threshold";
    pub const BYTES_PER_ROW_ESTIMATE: &str = "transfer.bytes_per_row_estimate";

    // 任务预算
    pub const IMPORT_TIMEOUT_SECS: &str = "transfer.import_timeout_secs";
    pub const EXPORT_TIMEOUT_SECS: &str = "transfer.export_timeout_secs";

    // 文件存储
    pub const RETENTION_DAYS: &str = "transfer.retention_days";
    pub const IMPORTS_DIR: &str = "transfer.imports_dir";
    pub const EXPORTS_DIR: &str = "transfer.exports_dir";
}
