// ==========================================
// 受助人登记系统 - 表头识别与列映射
// ==========================================
// 流程: 前 N 行逐行打分 → 首个命中数 > 2 的行即表头（短路）
//       → 未命中时回退物理第 1 行 → 构建 ColumnMap
// 匹配: 去除首尾空白后精确匹配标签/别名,区分大小写,无模糊匹配
// ==========================================

use crate::domain::field_catalog::{
    ColumnMap, FieldCatalog, BACKUP_PHONE_HEADER, PHONE, PRIMARY_PHONE_HEADER,
};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::sheet_reader::SheetRow;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// 表头行判定阈值：命中数需严格大于该值
pub const HEADER_MATCH_THRESHOLD: usize = 2;

/// 默认扫描行数
pub const DEFAULT_MAX_ROWS_TO_SCAN: usize = 20;

// ==========================================
// HeaderResolution - 表头识别结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderResolution {
    /// 已去除尾部空单元格的表头
    pub header_row: Vec<String>,
    /// 表头物理行号（1 起）
    pub header_row_number: usize,
    pub column_count: usize,
    /// 是否为未命中阈值时的第 1 行回退
    pub fallback: bool,
}

impl HeaderResolution {
    fn from_row(row: &SheetRow, fallback: bool) -> Self {
        let header_row = trim_trailing_empty(&row.cells);
        let column_count = header_row.len();
        Self {
            header_row,
            header_row_number: row.number,
            column_count,
            fallback,
        }
    }

    fn empty() -> Self {
        Self {
            header_row: Vec::new(),
            header_row_number: 1,
            column_count: 0,
            fallback: true,
        }
    }

    /// 非空表头文本（错误提示用）
    pub fn raw_headers(&self) -> Vec<String> {
        self.header_row
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

// ==========================================
// HeaderResolver
// ==========================================
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    catalog: Arc<FieldCatalog>,
    max_rows_to_scan: usize,
}

impl HeaderResolver {
    pub fn new(catalog: Arc<FieldCatalog>, max_rows_to_scan: usize) -> Self {
        Self {
            catalog,
            max_rows_to_scan: max_rows_to_scan.max(1),
        }
    }

    pub fn max_rows_to_scan(&self) -> usize {
        self.max_rows_to_scan
    }

    /// 单行命中数（尾部空单元格不计入）
    pub fn score(&self, cells: &[String]) -> usize {
        self.catalog.count_header_matches(&trim_trailing_empty(cells))
    }

    /// 识别表头行
    ///
    /// # 说明
    /// - 只扫描物理行号 1..=max_rows_to_scan 的行,命中后立即停止
    /// - 永不失败：最坏情况回退物理第 1 行,由调用方在列映射阶段报告缺失字段
    /// - xlsx 读取不产出空行,第 1 行为空白时回退结果为空表头
    pub fn resolve<'a, I>(&self, rows: I) -> HeaderResolution
    where
        I: IntoIterator<Item = &'a SheetRow>,
    {
        let mut first: Option<&SheetRow> = None;

        for row in rows
            .into_iter()
            .take_while(|row| row.number <= self.max_rows_to_scan)
        {
            if row.number == 1 {
                first = Some(row);
            }
            let matches = self.score(&row.cells);
            if matches > HEADER_MATCH_THRESHOLD {
                debug!(row = row.number, matches, "识别到表头行");
                return HeaderResolution::from_row(row, false);
            }
        }

        match first {
            Some(row) => {
                debug!(row = row.number, "未识别到表头行，回退第 1 行");
                HeaderResolution::from_row(row, true)
            }
            None => HeaderResolution::empty(),
        }
    }

    /// 由表头构建列映射（确定性）
    ///
    /// # 规则
    /// 1. 自左向右遍历表头,跳过空单元格
    /// 2. 按目录声明顺序查找首个标签或别名相等且尚未映射的字段（phone 可被后续列重映射）
    /// 3. 通用遍历后：存在"主号码"列且 phone 未映射时由其占用；否则"备用号码"列兜底 phone
    pub fn build_column_map(&self, header_row: &[String]) -> ColumnMap {
        let mut map = ColumnMap::new();
        let mut mapped_keys: HashSet<&str> = HashSet::new();

        for (col, raw) in header_row.iter().enumerate() {
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }

            let claimant = self.catalog.iter().find(|def| {
                def.matches(text) && (def.key == PHONE || !mapped_keys.contains(def.key.as_str()))
            });

            if let Some(def) = claimant {
                map.insert(&def.key, col);
                mapped_keys.insert(def.key.as_str());
            }
        }

        if !map.contains(PHONE) {
            let position_of = |label: &str| header_row.iter().position(|h| h.trim() == label);
            if let Some(col) = position_of(PRIMARY_PHONE_HEADER).or_else(|| position_of(BACKUP_PHONE_HEADER)) {
                map.insert(PHONE, col);
            }
        }

        map
    }

    /// 校验必需字段已映射,否则返回 SchemaMismatch
    pub fn require_mandatory(
        &self,
        map: &ColumnMap,
        resolution: &HeaderResolution,
    ) -> ImportResult<()> {
        let missing = map.missing_required();
        if map.is_empty() || !missing.is_empty() {
            let missing = if missing.is_empty() {
                crate::domain::field_catalog::REQUIRED_FIELDS
                    .iter()
                    .map(|k| k.to_string())
                    .collect()
            } else {
                missing.into_iter().map(|k| k.to_string()).collect()
            };
            return Err(ImportError::SchemaMismatch {
                missing,
                headers: resolution.raw_headers(),
            });
        }
        Ok(())
    }
}

/// 去除尾部空单元格
fn trim_trailing_empty(cells: &[String]) -> Vec<String> {
    let end = cells
        .iter()
        .rposition(|c| !c.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    cells[..end].to_vec()
}
