// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库
// 支持阿拉伯语（默认）和英文
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

use std::sync::RwLock;

/// 默认语言
pub const DEFAULT_LOCALE: &str = "ar";

/// 当前消息语言（空串表示默认语言）
static MESSAGE_LOCALE: RwLock<String> = RwLock::new(String::new());

/// 获取当前语言
pub fn current_locale() -> String {
    match MESSAGE_LOCALE.read() {
        Ok(guard) if !guard.is_empty() => guard.clone(),
        _ => DEFAULT_LOCALE.to_string(),
    }
}

/// 设置语言
///
/// # 参数
/// - locale: 语言代码（"ar" 或 "en"）
pub fn set_locale(locale: &str) {
    if let Ok(mut guard) = MESSAGE_LOCALE.write() {
        *guard = locale.to_string();
    }
    rust_i18n::set_locale(locale);
}

/// 翻译消息（无参数）
///
/// # 示例
/// ```no_run
/// use relief_registry::i18n::t;
/// let msg = t("job.not_found");
/// ```
pub fn t(key: &str) -> String {
    t_in(&current_locale(), key, &[])
}

/// 翻译消息（带参数）
///
/// # 示例
/// ```no_run
/// use relief_registry::i18n::t_with_args;
/// let msg = t_with_args("import.file_not_found", &[("path", "/tmp/test.xlsx")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    t_in(&current_locale(), key, args)
}

/// 按指定语言翻译消息
pub fn t_in(locale: &str, key: &str, args: &[(&str, &str)]) -> String {
    let mut result = rust_i18n::t!(key, locale = locale).to_string();
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        result = result.replace(&placeholder, v);
    }
    result
}
