// ==========================================
// 受助人登记系统 - 表格流式读取
// ==========================================
// 支持: Excel (.xlsx) / CSV (.csv)
// 约束:
// - 逐行读取,不整表载入内存（xlsx 使用 calamine 单元格流）
// - 按文件物理列顺序输出,与显示方向（RTL）无关
// - 可重复打开同一文件进行多遍扫描
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook, Data, DataRef, Reader, Xlsx};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// 支持的表格格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Xlsx,
    Csv,
}

impl SheetFormat {
    /// 根据扩展名识别格式
    pub fn from_path(path: &Path) -> ImportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "xlsx" => Ok(SheetFormat::Xlsx),
            "csv" => Ok(SheetFormat::Csv),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

// ==========================================
// SheetRow - 一行原始单元格文本
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 物理行号（1 起）
    pub number: usize,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn new(number: usize, cells: Vec<String>) -> Self {
        Self { number, cells }
    }

    /// 对齐到表头宽度：短行右补空串,长行截断
    pub fn align_to(&mut self, width: usize) {
        self.cells.resize(width, String::new());
    }
}

// ==========================================
// SpreadsheetStreamReader
// ==========================================
#[derive(Debug, Clone)]
pub struct SpreadsheetStreamReader {
    path: PathBuf,
    format: SheetFormat,
}

impl SpreadsheetStreamReader {
    /// 打开表格文件（校验存在性与格式,不读取内容）
    pub fn open<P: AsRef<Path>>(path: P) -> ImportResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let format = SheetFormat::from_path(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SheetFormat {
        self.format
    }

    /// 自上而下逐行回调
    ///
    /// # 参数
    /// - visit: 每行回调；返回 ControlFlow::Break 时提前结束本遍扫描
    ///
    /// # 说明
    /// xlsx 中完全没有单元格的行不会出现在流中,行号保持物理行号
    pub fn for_each_row<F>(&self, visit: F) -> ImportResult<()>
    where
        F: FnMut(SheetRow) -> ImportResult<ControlFlow<()>>,
    {
        match self.format {
            SheetFormat::Xlsx => self.stream_xlsx(visit),
            SheetFormat::Csv => self.stream_csv(visit),
        }
    }

    fn stream_xlsx<F>(&self, mut visit: F) -> ImportResult<()>
    where
        F: FnMut(SheetRow) -> ImportResult<ControlFlow<()>>,
    {
        let mut workbook: Xlsx<BufReader<File>> = open_workbook(&self.path)?;

        // 只读第一个 sheet
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ContainerFormatError("工作簿中没有工作表".to_string()))?;

        let mut cells = workbook.worksheet_cells_reader(&sheet_name)?;

        let mut current_row: Option<u32> = None;
        let mut buffer: Vec<String> = Vec::new();

        while let Some(cell) = cells.next_cell()? {
            let (row, col) = cell.get_position();

            if current_row != Some(row) {
                if let Some(done) = current_row {
                    let emitted = SheetRow::new(done as usize + 1, std::mem::take(&mut buffer));
                    if visit(emitted)?.is_break() {
                        return Ok(());
                    }
                }
                current_row = Some(row);
            }

            let col = col as usize;
            if buffer.len() <= col {
                buffer.resize(col + 1, String::new());
            }
            buffer[col] = cell_text(cell.get_value());
        }

        if let Some(done) = current_row {
            visit(SheetRow::new(done as usize + 1, buffer))?;
        }
        Ok(())
    }

    fn stream_csv<F>(&self, mut visit: F) -> ImportResult<()>
    where
        F: FnMut(SheetRow) -> ImportResult<ControlFlow<()>>,
    {
        let file = File::open(&self.path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .from_reader(BufReader::new(file));

        let mut record = csv::StringRecord::new();
        let mut number = 0usize;
        while reader.read_record(&mut record)? {
            number += 1;
            let mut cells: Vec<String> = record.iter().map(|v| v.to_string()).collect();
            if number == 1 {
                strip_bom(&mut cells);
            }
            if visit(SheetRow::new(number, cells))?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// 单元格值转文本
fn cell_text(value: &DataRef<'_>) -> String {
    match value {
        DataRef::Empty => String::new(),
        DataRef::String(s) => s.clone(),
        DataRef::SharedString(s) => s.to_string(),
        other => Data::from(other.clone()).to_string(),
    }
}

/// 去除 UTF-8 BOM（Excel 另存的 CSV 常带）
fn strip_bom(cells: &mut [String]) {
    if let Some(first) = cells.first_mut() {
        if let Some(rest) = first.strip_prefix('\u{feff}') {
            *first = rest.to_string();
        }
    }
}
