// ==========================================
// 导出与往返集成测试
// ==========================================
// 覆盖: ltr 导出后重新导入还原字段值、空选择导出全部字段、
//       rtl 方向标记写入与导入端识别、过滤条件
// ==========================================

use relief_registry::domain::field_catalog::{self, FieldCatalog};
use relief_registry::domain::types::{Direction, ReviewFilter};
use relief_registry::domain::Relation;
use relief_registry::exporter::{DirectionMetadataPatcher, ExportPipeline, ExportRequest};
use relief_registry::importer::ImportPipeline;
use relief_registry::jobs::{CancelFlag, NoopProgress};
use relief_registry::repository::{ExportFilter, IdentityRepository};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

mod test_helpers;
use test_helpers::{cell, create_test_db, read_rows, shared_conn, test_config, write_xlsx};

const RICH_HEADERS: [&str; 7] = [
    "رقم الهوية",
    "الاسم الرباعي",
    "رقم الجوال",
    "المنطقة",
    "ملاحظات",
    "أفراد الأسرة (الاسم)",
    "أفراد الأسرة (صلة القرابة)",
];

fn seed(conn: Arc<Mutex<Connection>>, root: &Path) {
    let file = write_xlsx(
        &root.join("seed.xlsx"),
        &[
            RICH_HEADERS.to_vec(),
            vec!["111111111", "فاطمة أحمد", "0590000001", "غزة", "", "سارة | علي", "ابنة | ابن"],
            vec!["222222222", "محمود حسن", "0590000002", "خانيونس", "أرملة", "", ""],
        ],
    );
    let summary = ImportPipeline::new(conn, field_catalog::shared(), test_config(root))
        .run(&file, &[], &mut NoopProgress, &CancelFlag::new())
        .unwrap();
    assert_eq!(summary.created, 2);
}

fn export(
    conn: Arc<Mutex<Connection>>,
    root: &Path,
    request: &ExportRequest,
) -> relief_registry::exporter::ExportOutcome {
    let destination = root.join("exports").join("out.xlsx");
    ExportPipeline::new(conn, field_catalog::shared(), test_config(root))
        .run(request, &destination, &mut NoopProgress, &CancelFlag::new())
        .unwrap()
}

#[test]
fn test_ltr_export_then_import_reproduces_values() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = shared_conn(&db_path);
    let dir = tempfile::tempdir().unwrap();
    seed(conn.clone(), dir.path());

    let selected: Vec<String> = [
        "national_id",
        "full_name",
        "phone",
        "region",
        "notes",
        "family_member_name",
        "family_member_relation",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let outcome = export(
        conn.clone(),
        dir.path(),
        &ExportRequest {
            selected_fields: selected.clone(),
            direction: Direction::Ltr,
            ..Default::default()
        },
    );
    assert_eq!(outcome.rows_exported, 2);
    assert!(!DirectionMetadataPatcher::is_right_to_left(&outcome.file_path).unwrap());

    // 导入到全新的数据库
    let (_db2, db_path2) = create_test_db().unwrap();
    let fresh = shared_conn(&db_path2);
    let summary = ImportPipeline::new(fresh.clone(), field_catalog::shared(), test_config(dir.path()))
        .run(&outcome.file_path, &selected, &mut NoopProgress, &CancelFlag::new())
        .unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(summary.errors_count, 0);
    assert_eq!(summary.direction, Some(Direction::Ltr));

    let original = IdentityRepository::new(conn);
    let restored = IdentityRepository::new(fresh);
    for key in ["111111111", "222222222"] {
        let a = original.find_by_national_id(key).unwrap().unwrap();
        let b = restored.find_by_national_id(key).unwrap().unwrap();
        assert_eq!(a.full_name, b.full_name);
        for field in ["phone", "region", "notes"] {
            assert_eq!(a.fields.get(field), b.fields.get(field), "字段 {} 不一致", field);
        }
        assert_eq!(a.family_members_count, b.family_members_count);
        assert_eq!(
            original.household_of(a.id).unwrap(),
            restored.household_of(b.id).unwrap()
        );
    }

    let household = restored
        .household_of(restored.find_by_national_id("111111111").unwrap().unwrap().id)
        .unwrap();
    assert_eq!(household.len(), 2);
    assert_eq!(household[0].member_name, "سارة");
    assert_eq!(household[0].relation, Relation::Daughter);
    assert_eq!(household[1].relation, Relation::Son);
}

#[test]
fn test_empty_selection_exports_all_fields_in_catalog_order() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = shared_conn(&db_path);
    let dir = tempfile::tempdir().unwrap();
    seed(conn.clone(), dir.path());

    let outcome = export(conn, dir.path(), &ExportRequest::default());

    let rows = read_rows(&outcome.file_path);
    let expected: Vec<String> = FieldCatalog::standard()
        .canonical_selection::<&str>(&[])
        .into_iter()
        .map(|def| def.label.clone())
        .collect();
    assert_eq!(rows[0], expected);
    assert_eq!(rows.len(), 3);

    let headers = &rows[0];
    let numbers: Vec<&str> = rows[1..]
        .iter()
        .filter_map(|row| cell(headers, row, "رقم"))
        .collect();
    assert_eq!(numbers, vec!["1", "2"]);
}

#[test]
fn test_rtl_export_is_flagged_and_detected_on_import() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = shared_conn(&db_path);
    let dir = tempfile::tempdir().unwrap();
    seed(conn.clone(), dir.path());

    let outcome = export(
        conn.clone(),
        dir.path(),
        &ExportRequest {
            selected_fields: vec!["national_id".into(), "full_name".into()],
            direction: Direction::Rtl,
            ..Default::default()
        },
    );
    assert!(outcome.direction_applied);
    assert!(DirectionMetadataPatcher::is_right_to_left(&outcome.file_path).unwrap());

    // 修补后的文件仍可读且内容不变
    let rows = read_rows(&outcome.file_path);
    assert_eq!(rows[0], vec!["الاسم الرباعي", "رقم الهوية"]);
    assert_eq!(rows.len(), 3);

    let summary = ImportPipeline::new(conn, field_catalog::shared(), test_config(dir.path()))
        .run(&outcome.file_path, &[], &mut NoopProgress, &CancelFlag::new())
        .unwrap();
    assert_eq!(summary.direction, Some(Direction::Rtl));
    assert_eq!((summary.created, summary.updated), (0, 2));
}

#[test]
fn test_export_filter_by_search_and_status() {
    let (_db, db_path) = create_test_db().unwrap();
    let conn = shared_conn(&db_path);
    let dir = tempfile::tempdir().unwrap();
    seed(conn.clone(), dir.path());

    let by_name = export(
        conn.clone(),
        dir.path(),
        &ExportRequest {
            selected_fields: vec!["national_id".into()],
            direction: Direction::Ltr,
            filter: ExportFilter {
                search: Some("فاطمة".into()),
                status: None,
            },
        },
    );
    assert_eq!(by_name.rows_exported, 1);
    assert_eq!(by_name.total_rows, 1);

    // 管理员导入的档案均为已核实
    let pending = export(
        conn,
        dir.path(),
        &ExportRequest {
            selected_fields: vec!["national_id".into()],
            direction: Direction::Ltr,
            filter: ExportFilter {
                search: None,
                status: Some(ReviewFilter::Pending),
            },
        },
    );
    assert_eq!(pending.rows_exported, 0);
    assert_eq!(read_rows(&pending.file_path).len(), 1);
}
