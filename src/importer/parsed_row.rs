// ==========================================
// 受助人登记系统 - 解析后的数据行
// ==========================================
// 不可变值对象: 原始单元格 + 共享列映射,按字段键取值
// ==========================================

use crate::domain::field_catalog::{ColumnMap, FULL_NAME, NATIONAL_ID};
use crate::domain::identity::normalize_national_id;
use crate::importer::error::ImportError;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ParsedRow {
    /// 物理行号（1 起）
    pub row_index: usize,
    /// 已规范化（仅数字）的自然键
    pub natural_key: String,
    pub raw_values: Vec<String>,
    columns: Arc<ColumnMap>,
}

impl ParsedRow {
    pub fn new(row_index: usize, raw_values: Vec<String>, columns: Arc<ColumnMap>) -> Self {
        let natural_key = columns
            .get(NATIONAL_ID)
            .and_then(|col| raw_values.get(col))
            .map(|raw| normalize_national_id(raw))
            .unwrap_or_default();

        Self {
            row_index,
            natural_key,
            raw_values,
            columns,
        }
    }

    /// 按字段键取值（已 trim；列未映射或越界时为空串）
    pub fn value(&self, field_key: &str) -> &str {
        if field_key == NATIONAL_ID {
            return &self.natural_key;
        }
        self.columns
            .get(field_key)
            .and_then(|col| self.raw_values.get(col))
            .map(|v| v.trim())
            .unwrap_or("")
    }

    /// 字段是否有对应列
    pub fn has_column(&self, field_key: &str) -> bool {
        self.columns.contains(field_key)
    }

    pub fn full_name(&self) -> &str {
        self.value(FULL_NAME)
    }

    /// 必需字段校验
    ///
    /// # 返回
    /// - Err(RowDataError): 自然键或姓名为空
    pub fn validate(&self) -> Result<(), ImportError> {
        let mut missing = Vec::new();
        if self.natural_key.is_empty() {
            missing.push(NATIONAL_ID.to_string());
        }
        if self.full_name().is_empty() {
            missing.push(FULL_NAME.to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::RowDataError {
                row: self.row_index,
                missing,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Arc<ColumnMap> {
        let mut map = ColumnMap::new();
        map.insert(NATIONAL_ID, 0);
        map.insert(FULL_NAME, 1);
        map.insert("phone", 2);
        Arc::new(map)
    }

    #[test]
    fn test_value_lookup() {
        let row = ParsedRow::new(
            3,
            vec!["12-34 56789".into(), " أحمد علي ".into(), "0591234567".into()],
            columns(),
        );
        assert_eq!(row.natural_key, "123456789");
        assert_eq!(row.value(NATIONAL_ID), "123456789");
        assert_eq!(row.full_name(), "أحمد علي");
        assert_eq!(row.value("phone"), "0591234567");
        assert_eq!(row.value("region"), "");
        assert!(row.validate().is_ok());
    }

    #[test]
    fn test_blank_natural_key_is_row_error() {
        let row = ParsedRow::new(5, vec!["  ".into(), "أحمد".into()], columns());
        match row.validate() {
            Err(ImportError::RowDataError { row, missing }) => {
                assert_eq!(row, 5);
                assert_eq!(missing, vec![NATIONAL_ID.to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
