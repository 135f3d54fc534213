// ==========================================
// 受助人登记系统 - 日志初始化
// ==========================================
// 输出: 终端文本（默认）或 JSON（RELIEF_REGISTRY_LOG_JSON 非空）
// 过滤: RUST_LOG 优先；未设置时本 crate 为 info,依赖库仅 warn
// 后台任务在 job_id span 内记录,JSON 输出附带当前 span
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 选择 JSON 输出的环境变量
pub const LOG_JSON_ENV: &str = "RELIEF_REGISTRY_LOG_JSON";

/// 未设置 RUST_LOG 时的过滤规则
const DEFAULT_DIRECTIVES: &str = "warn,relief_registry=info";

/// 测试使用的过滤规则（导入/导出流水线的批次与分页细节）
const TEST_DIRECTIVES: &str = "warn,relief_registry=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// 由 RELIEF_REGISTRY_LOG_JSON 决定输出格式
    pub fn from_env() -> Self {
        match std::env::var_os(LOG_JSON_ENV) {
            Some(v) if !v.is_empty() => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// 初始化日志
///
/// # 环境变量
/// - RUST_LOG: 覆盖默认过滤规则
///   例如: RUST_LOG=relief_registry::importer=trace
///
/// # 示例
/// ```no_run
/// use relief_registry::logging::{self, LogFormat};
/// logging::init(LogFormat::from_env());
/// ```
pub fn init(format: LogFormat) {
    match format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .with_line_number(true)
            .init(),
        LogFormat::Json => fmt()
            .with_env_filter(env_filter())
            .json()
            .with_current_span(true)
            .init(),
    }
}

/// 测试日志,重复调用安全
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new(TEST_DIRECTIVES))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
        assert!(EnvFilter::try_new(TEST_DIRECTIVES).is_ok());
    }
}
