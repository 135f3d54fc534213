// ==========================================
// 受助人登记系统 - 传输参数
// ==========================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 存储根目录名
const STORAGE_DIR_NAME: &str = "relief-registry";

// ==========================================
// TransferConfig - 导入/导出参数
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    // ===== 导入 =====
    pub batch_size: usize,
    pub header_scan_rows: usize,
    pub error_cap: usize,
    pub progress_every_rows: usize,

    // ===== 导出 =====
    pub export_chunk_size: usize,
    pub export_progress_every_rows: usize,

    // ===== 同步/异步判定 =====
    pub async_file_size_threshold: u64,
    pub async_estimated_rows_threshold: u64,
    pub bytes_per_row_estimate: u64,

    // ===== 任务预算（秒）=====
    pub import_timeout_secs: u64,
    pub export_timeout_secs: u64,

    // ===== 文件存储 =====
    pub retention_days: i64,
    pub imports_dir: PathBuf,
    pub exports_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::with_storage_root(&default_storage_root())
    }
}

impl TransferConfig {
    /// 以指定根目录构建默认配置（imports/ 与 exports/ 位于其下）
    pub fn with_storage_root(root: &Path) -> Self {
        Self {
            batch_size: 500,
            header_scan_rows: 20,
            error_cap: 50,
            progress_every_rows: 500,
            export_chunk_size: 2000,
            export_progress_every_rows: 5000,
            async_file_size_threshold: 10 * 1024 * 1024,
            async_estimated_rows_threshold: 20_000,
            bytes_per_row_estimate: 500,
            import_timeout_secs: 1800,
            export_timeout_secs: 600,
            retention_days: 30,
            imports_dir: root.join("imports"),
            exports_dir: root.join("exports"),
        }
    }

    /// 按文件大小判断是否走异步任务
    ///
    /// 文件超过大小阈值,且估算行数（大小 / 单行字节估算）超过行数阈值
    pub fn should_run_async(&self, file_size: u64) -> bool {
        let per_row = self.bytes_per_row_estimate.max(1);
        file_size > self.async_file_size_threshold
            && file_size / per_row > self.async_estimated_rows_threshold
    }

    /// 按文件大小估算行数
    pub fn estimate_rows(&self, file_size: u64) -> u64 {
        file_size / self.bytes_per_row_estimate.max(1)
    }

    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.import_timeout_secs)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }
}

/// 平台数据目录下的默认存储根（无法获取时回退到当前目录）
pub fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORAGE_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TransferConfig::with_storage_root(Path::new("/data"));
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.error_cap, 50);
        assert_eq!(cfg.imports_dir, PathBuf::from("/data/imports"));
        assert_eq!(cfg.import_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_should_run_async_requires_both_thresholds() {
        let cfg = TransferConfig::with_storage_root(Path::new("/data"));
        // 5 MiB: 不超过大小阈值
        assert!(!cfg.should_run_async(5 * 1024 * 1024));
        // 11 MiB: 约 23068 行 > 20000
        assert!(cfg.should_run_async(11 * 1024 * 1024));

        let sparse = TransferConfig {
            bytes_per_row_estimate: 1000,
            ..cfg
        };
        // 11 MiB / 1000 ≈ 11534 行,不超过行数阈值
        assert!(!sparse.should_run_async(11 * 1024 * 1024));
    }
}
