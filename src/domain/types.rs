// ==========================================
// 受助人登记系统 - 通用领域类型
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// Direction - 表格显示方向
// ==========================================
// 仅为显示元数据,与数据列顺序无关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Rtl,
    Ltr,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Rtl => "rtl",
            Direction::Ltr => "ltr",
        }
    }

    /// 解析方向参数；无法识别时回退为默认值 rtl
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "ltr" => Direction::Ltr,
            _ => Direction::Rtl,
        }
    }

    pub fn is_rtl(&self) -> bool {
        matches!(self, Direction::Rtl)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// ReviewFilter - 导出审核状态过滤
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFilter {
    /// needs_review = true
    Pending,
    /// needs_review = false
    Verified,
}

impl ReviewFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFilter::Pending => "pending",
            ReviewFilter::Verified => "verified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(ReviewFilter::Pending),
            "verified" => Some(ReviewFilter::Verified),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse_defaults_to_rtl() {
        assert_eq!(Direction::parse("ltr"), Direction::Ltr);
        assert_eq!(Direction::parse(" LTR "), Direction::Ltr);
        assert_eq!(Direction::parse("rtl"), Direction::Rtl);
        assert_eq!(Direction::parse(""), Direction::Rtl);
        assert_eq!(Direction::default(), Direction::Rtl);
    }

    #[test]
    fn test_review_filter_parse() {
        assert_eq!(ReviewFilter::parse("pending"), Some(ReviewFilter::Pending));
        assert_eq!(ReviewFilter::parse("verified"), Some(ReviewFilter::Verified));
        assert_eq!(ReviewFilter::parse("all"), None);
    }
}
