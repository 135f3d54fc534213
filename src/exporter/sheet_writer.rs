// ==========================================
// 受助人登记系统 - 流式表格写出
// ==========================================
// 工作表以 constant_memory 模式写出: 行写完即落盘,内存占用与行数无关
// 约束: 行必须自上而下顺序写入
// ==========================================

use crate::exporter::error::ExportResult;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};

const SHEET_NAME: &str = "المستفيدين";
const COLUMN_WIDTH: f64 = 22.0;
const HEADER_FONT_SIZE: f64 = 12.0;

pub struct SpreadsheetStreamWriter {
    workbook: Workbook,
    path: PathBuf,
    width: usize,
    next_row: u32,
}

impl SpreadsheetStreamWriter {
    /// 创建写出器并写入表头（加粗、字号加大）
    pub fn create<P: AsRef<Path>>(path: P, headers: &[String]) -> ExportResult<Self> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold().set_font_size(HEADER_FONT_SIZE);

        let sheet = workbook.add_worksheet_with_constant_memory();
        sheet.set_name(SHEET_NAME)?;
        for (col, label) in headers.iter().enumerate() {
            let col = column_index(col)?;
            sheet.set_column_width(col, COLUMN_WIDTH)?;
            sheet.write_string_with_format(0, col, label, &header_format)?;
        }

        Ok(Self {
            workbook,
            path: path.as_ref().to_path_buf(),
            width: headers.len(),
            next_row: 1,
        })
    }

    /// 写入一行数据（超出表头宽度的单元格丢弃,空单元格不写）
    pub fn write_row(&mut self, cells: &[String]) -> ExportResult<()> {
        let row = self.next_row;
        let width = self.width;
        let sheet = self.sheet()?;

        for (col, value) in cells.iter().take(width).enumerate() {
            if value.is_empty() {
                continue;
            }
            sheet.write_string(row, column_index(col)?, value)?;
        }

        self.next_row += 1;
        Ok(())
    }

    /// 已写入的数据行数（不含表头）
    pub fn rows_written(&self) -> u32 {
        self.next_row - 1
    }

    /// 保存文件
    pub fn finish(mut self) -> ExportResult<PathBuf> {
        self.workbook.save(&self.path)?;
        Ok(self.path)
    }

    fn sheet(&mut self) -> Result<&mut Worksheet, XlsxError> {
        self.workbook.worksheet_from_index(0)
    }
}

fn column_index(col: usize) -> Result<u16, XlsxError> {
    u16::try_from(col).map_err(|_| XlsxError::RowColumnLimitError)
}
