// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、测试配置、xlsx 夹具生成与回读
// ==========================================

#![allow(dead_code)]

use relief_registry::config::TransferConfig;
use relief_registry::db::{init_schema, open_shared, open_sqlite_connection};
use relief_registry::importer::SpreadsheetStreamReader;
use rusqlite::Connection;
use rust_xlsxwriter::Workbook;
use std::error::Error;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 场景表头（身份证号、姓名、手机号）
pub const SCENARIO_HEADERS: [&str; 3] = ["رقم الهوية", "الاسم الرباعي", "رقم الجوال"];

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接
pub fn shared_conn(db_path: &str) -> Arc<Mutex<Connection>> {
    open_shared(db_path).expect("打开测试数据库失败")
}

/// 以临时目录为存储根的传输配置
pub fn test_config(root: &Path) -> TransferConfig {
    TransferConfig::with_storage_root(root)
}

/// 生成 xlsx 夹具（第一行通常为表头）
pub fn write_xlsx(path: &Path, rows: &[Vec<&str>]) -> PathBuf {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            sheet
                .write_string(r as u32, c as u16, *value)
                .expect("写入单元格失败");
        }
    }
    workbook.save(path).expect("保存夹具失败");
    path.to_path_buf()
}

/// 回读表格全部行（按物理顺序）
pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    SpreadsheetStreamReader::open(path)
        .expect("打开表格失败")
        .for_each_row(|row| {
            rows.push(row.cells);
            Ok(ControlFlow::Continue(()))
        })
        .expect("读取表格失败");
    rows
}

/// 在行中按表头文本取值
pub fn cell<'a>(headers: &[String], row: &'a [String], header: &str) -> Option<&'a str> {
    let idx = headers.iter().position(|h| h == header)?;
    row.get(idx).map(String::as_str)
}
