// ==========================================
// 受助人登记系统 - 显示方向元数据修补
// ==========================================
// 作用范围: 仅 xl/worksheets/sheet1.xml 中的 <sheetViews>/<sheetView>
// 规则:
// - 第一个 <sheetView> 设置/替换 rightToLeft 属性
// - <sheetViews> 中没有 <sheetView> → 新建（workbookViewId="0"）
// - 没有 <sheetViews> → 在 <sheetData> 之前插入
// 其他压缩条目原样拷贝（不解压、不重新压缩）,单元格数据不受影响
// ==========================================

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 第一个工作表的 XML 部件
const SHEET_PART: &str = "xl/worksheets/sheet1.xml";

const SHEET_VIEWS: &[u8] = b"sheetViews";
const SHEET_VIEW: &[u8] = b"sheetView";
const SHEET_DATA: &[u8] = b"sheetData";
const RIGHT_TO_LEFT: &str = "rightToLeft";

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("压缩容器错误: {0}")]
    Zip(#[from] ZipError),

    #[error("XML 解析失败: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("缺少工作表部件: {0}")]
    MissingSheetPart(String),

    #[error("工作表部件缺少 <sheetData>")]
    MissingSheetData,
}

pub type PatchResult<T> = Result<T, PatchError>;

pub struct DirectionMetadataPatcher;

impl DirectionMetadataPatcher {
    /// 读取第一个工作表第一个视图的方向标记（无视图时为 false）
    pub fn is_right_to_left<P: AsRef<Path>>(path: P) -> PatchResult<bool> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(path.as_ref())?))?;
        let xml = read_sheet_part(&mut archive)?;

        let mut reader = Reader::from_str(&xml);
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == SHEET_VIEW => {
                    for attr in e.attributes() {
                        let attr = attr.map_err(quick_xml::Error::from)?;
                        if attr.key.local_name().as_ref() == RIGHT_TO_LEFT.as_bytes() {
                            return Ok(matches!(attr.value.as_ref(), b"1" | b"true"));
                        }
                    }
                    return Ok(false);
                }
                Event::Start(e) if e.local_name().as_ref() == SHEET_DATA => return Ok(false),
                Event::Eof => return Ok(false),
                _ => {}
            }
        }
    }

    /// 设置方向标记,仅重写工作表部件
    pub fn set_right_to_left<P: AsRef<Path>>(path: P, right_to_left: bool) -> PatchResult<()> {
        let path = path.as_ref();
        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let patched = patch_sheet_xml(&read_sheet_part(&mut archive)?, right_to_left)?;

        let staging = staging_path(path);
        let result = rewrite_archive(&mut archive, &staging, &patched);
        drop(archive);

        match result {
            Ok(()) => {
                fs::rename(&staging, path)?;
                debug!(path = %path.display(), right_to_left, "方向标记已写入");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&staging);
                Err(e)
            }
        }
    }
}

fn read_sheet_part<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> PatchResult<String> {
    let mut part = archive.by_name(SHEET_PART).map_err(|e| match e {
        ZipError::FileNotFound => PatchError::MissingSheetPart(SHEET_PART.to_string()),
        other => PatchError::Zip(other),
    })?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(xml)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".patching");
    path.with_file_name(name)
}

/// 拷贝全部条目,仅替换工作表部件
fn rewrite_archive<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    staging: &Path,
    sheet_xml: &[u8],
) -> PatchResult<()> {
    let mut writer = ZipWriter::new(File::create(staging)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        if entry.name() == SHEET_PART {
            drop(entry);
            writer.start_file(SHEET_PART, options)?;
            writer.write_all(sheet_xml)?;
        } else {
            writer.raw_copy_file(entry)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// 修补工作表 XML 的视图元素
fn patch_sheet_xml(xml: &str, right_to_left: bool) -> PatchResult<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 64));

    let mut view_patched = false;
    let mut has_views = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,

            Event::Start(e) if e.local_name().as_ref() == SHEET_VIEWS => {
                has_views = true;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == SHEET_VIEWS => {
                has_views = true;
                view_patched = true;
                write_views(&mut writer, Some(e), right_to_left)?;
            }
            Event::End(e) if e.local_name().as_ref() == SHEET_VIEWS => {
                if !view_patched {
                    view_patched = true;
                    writer.write_event(Event::Empty(new_view(right_to_left)))?;
                }
                writer.write_event(Event::End(e))?;
            }

            Event::Start(e) if !view_patched && e.local_name().as_ref() == SHEET_VIEW => {
                view_patched = true;
                writer.write_event(Event::Start(with_direction(&e, right_to_left)?))?;
            }
            Event::Empty(e) if !view_patched && e.local_name().as_ref() == SHEET_VIEW => {
                view_patched = true;
                writer.write_event(Event::Empty(with_direction(&e, right_to_left)?))?;
            }

            Event::Start(e) if !has_views && e.local_name().as_ref() == SHEET_DATA => {
                has_views = true;
                view_patched = true;
                write_views(&mut writer, None, right_to_left)?;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if !has_views && e.local_name().as_ref() == SHEET_DATA => {
                has_views = true;
                view_patched = true;
                write_views(&mut writer, None, right_to_left)?;
                writer.write_event(Event::Empty(e))?;
            }

            other => writer.write_event(other)?,
        }
    }

    if !view_patched {
        return Err(PatchError::MissingSheetData);
    }
    Ok(writer.into_inner())
}

/// 写出完整的 <sheetViews><sheetView/></sheetViews>
fn write_views(
    writer: &mut Writer<Vec<u8>>,
    views: Option<BytesStart<'_>>,
    right_to_left: bool,
) -> PatchResult<()> {
    let views = views.unwrap_or_else(|| BytesStart::new("sheetViews"));
    let end = BytesEnd::new(String::from_utf8_lossy(views.name().as_ref()).into_owned());
    writer.write_event(Event::Start(views))?;
    writer.write_event(Event::Empty(new_view(right_to_left)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn new_view(right_to_left: bool) -> BytesStart<'static> {
    let mut view = BytesStart::new("sheetView");
    view.push_attribute((RIGHT_TO_LEFT, flag(right_to_left)));
    view.push_attribute(("workbookViewId", "0"));
    view
}

/// 复制元素并设置/替换 rightToLeft
fn with_direction(element: &BytesStart<'_>, right_to_left: bool) -> PatchResult<BytesStart<'static>> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut patched = BytesStart::new(name);
    patched.push_attribute((RIGHT_TO_LEFT, flag(right_to_left)));

    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == RIGHT_TO_LEFT.as_bytes() {
            continue;
        }
        patched.push_attribute(attr);
    }
    Ok(patched)
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patched(xml: &str, rtl: bool) -> String {
        String::from_utf8(patch_sheet_xml(xml, rtl).unwrap()).unwrap()
    }

    #[test]
    fn test_replaces_existing_attribute() {
        let xml = r#"<worksheet><sheetViews><sheetView rightToLeft="0" tabSelected="1" workbookViewId="0"/></sheetViews><sheetData><row r="1"/></sheetData></worksheet>"#;
        let out = patched(xml, true);
        assert!(out.contains(r#"<sheetView rightToLeft="1" tabSelected="1" workbookViewId="0"/>"#));
        assert!(out.contains(r#"<sheetData><row r="1"/></sheetData>"#));
        assert_eq!(out.matches("rightToLeft").count(), 1);
    }

    #[test]
    fn test_creates_view_inside_empty_collection() {
        let out = patched("<worksheet><sheetViews></sheetViews><sheetData/></worksheet>", true);
        assert!(out.contains(r#"<sheetViews><sheetView rightToLeft="1" workbookViewId="0"/></sheetViews>"#));

        let out = patched("<worksheet><sheetViews/><sheetData/></worksheet>", false);
        assert!(out.contains(r#"<sheetViews><sheetView rightToLeft="0" workbookViewId="0"/></sheetViews><sheetData/>"#));
    }

    #[test]
    fn test_inserts_collection_before_sheet_data() {
        let xml = r#"<worksheet><dimension ref="A1"/><sheetData><row r="1"/></sheetData></worksheet>"#;
        let out = patched(xml, true);
        assert!(out.contains(
            r#"<dimension ref="A1"/><sheetViews><sheetView rightToLeft="1" workbookViewId="0"/></sheetViews><sheetData>"#
        ));
    }

    #[test]
    fn test_only_first_view_is_patched() {
        let xml = r#"<worksheet><sheetViews><sheetView workbookViewId="0"/><sheetView workbookViewId="1"/></sheetViews><sheetData/></worksheet>"#;
        let out = patched(xml, true);
        assert!(out.contains(r#"<sheetView rightToLeft="1" workbookViewId="0"/><sheetView workbookViewId="1"/>"#));
    }

    #[test]
    fn test_missing_sheet_data_is_error() {
        assert!(matches!(
            patch_sheet_xml("<worksheet/>", true),
            Err(PatchError::MissingSheetData)
        ));
    }
}
