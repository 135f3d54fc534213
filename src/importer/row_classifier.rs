// ==========================================
// 受助人登记系统 - 数据行分类
// ==========================================
// 规则（按顺序）:
// 1. 全部单元格为空/空白 → Empty
// 2. 命中标签/别名的单元格数 > 3 → HeaderLike（文件中部重复的表头）
// 3. 其他 → Data
// ==========================================

use crate::domain::field_catalog::FieldCatalog;
use std::sync::Arc;

/// 重复表头判定阈值：命中数需严格大于该值
pub const HEADER_LIKE_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    Empty,
    HeaderLike,
    Data,
}

#[derive(Debug, Clone)]
pub struct RowClassifier {
    catalog: Arc<FieldCatalog>,
}

impl RowClassifier {
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self { catalog }
    }

    pub fn classify<S: AsRef<str>>(&self, row: &[S]) -> RowClass {
        if row.iter().all(|c| c.as_ref().trim().is_empty()) {
            return RowClass::Empty;
        }
        if self.catalog.count_header_matches(row) > HEADER_LIKE_THRESHOLD {
            return RowClass::HeaderLike;
        }
        RowClass::Data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RowClassifier {
        RowClassifier::new(Arc::new(FieldCatalog::standard()))
    }

    #[test]
    fn test_empty_rows() {
        let c = classifier();
        assert_eq!(c.classify(&["", "  ", "\t"]), RowClass::Empty);
        let none: [&str; 0] = [];
        assert_eq!(c.classify(&none), RowClass::Empty);
    }

    #[test]
    fn test_repeated_header_needs_more_than_three_matches() {
        let c = classifier();
        assert_eq!(
            c.classify(&["رقم الهوية", "الاسم الرباعي", "رقم الجوال", "المنطقة"]),
            RowClass::HeaderLike
        );
        // 3 个命中仍视为数据行
        assert_eq!(
            c.classify(&["رقم الهوية", "الاسم الرباعي", "رقم الجوال", "0591234567"]),
            RowClass::Data
        );
    }

    #[test]
    fn test_data_row() {
        assert_eq!(
            classifier().classify(&["123456789", "أحمد علي", "0591234567"]),
            RowClass::Data
        );
    }
}
