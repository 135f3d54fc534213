// ==========================================
// 受助人登记系统 - 传输配置读取 Trait
// ==========================================
// 职责: 定义导入/导出流程所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::transfer_config::TransferConfig;
use std::error::Error;

// ==========================================
// TransferConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）、TransferConfig（固定值,测试注入）
pub trait TransferConfigReader: Send + Sync {
    /// 读取完整传输配置
    ///
    /// # 返回
    /// - 覆写值优先,缺失或格式错误的键回退为默认值
    fn load_transfer_config(&self) -> Result<TransferConfig, Box<dyn Error + Send + Sync>>;
}

impl TransferConfigReader for TransferConfig {
    fn load_transfer_config(&self) -> Result<TransferConfig, Box<dyn Error + Send + Sync>> {
        Ok(self.clone())
    }
}
