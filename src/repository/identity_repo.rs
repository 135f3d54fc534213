// ==========================================
// 受助人登记系统 - 档案 Repository
// ==========================================
// 职责: 档案与家庭成员的数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 说明: IdentityStore 的方法接收调用方持有的连接/事务,
//       事务边界由批量 upsert 引擎决定
// ==========================================

use crate::domain::identity::{HouseholdMember, IdentityFields, IdentityRecord, Relation};
use crate::domain::types::ReviewFilter;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{decode_timestamp, encode_timestamp};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// IN (...) 查询单次最大参数数
const LOOKUP_CHUNK: usize = 500;

const IDENTITY_COLUMNS: &str = r#"
    id, national_id, full_name,
    phone, backup_phone, marital_status, spouse_name, spouse_phone, spouse_national_id,
    primary_address, previous_address, region, locality, branch, mosque, housing_type,
    job_title, health_status, notes,
    family_members_count, needs_review, entered_at, updated_at, deleted_at
"#;

// ==========================================
// IdentityDraft - 待写入的档案值
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityDraft {
    pub national_id: String,
    pub full_name: String,
    pub fields: IdentityFields,
    pub needs_review: bool,
}

impl IdentityDraft {
    /// 以已有档案为底稿（更新时未选字段保持原值）
    pub fn from_record(record: &IdentityRecord) -> Self {
        Self {
            national_id: record.national_id.clone(),
            full_name: record.full_name.clone(),
            fields: record.fields.clone(),
            needs_review: record.needs_review,
        }
    }
}

// ==========================================
// ExportFilter - 导出查询条件
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    /// 身份证号、姓名或电话的子串
    pub search: Option<String>,
    pub status: Option<ReviewFilter>,
}

/// 导出分页游标（updated_at DESC, id DESC）
#[derive(Debug, Clone, PartialEq)]
pub struct ExportCursor {
    pub updated_at: DateTime<Utc>,
    pub id: i64,
}

// ==========================================
// IdentityStore Trait
// ==========================================
// 用途: 批量 upsert 引擎的持久化接口
// 实现者: SqliteIdentityStore
pub trait IdentityStore: Send + Sync {
    /// 按自然键集合批量查询（含软删除档案）
    fn find_by_national_ids(
        &self,
        conn: &Connection,
        national_ids: &[String],
    ) -> RepositoryResult<HashMap<String, IdentityRecord>>;

    /// 按自然键查询单条（含软删除档案）
    fn find_by_national_id(
        &self,
        conn: &Connection,
        national_id: &str,
    ) -> RepositoryResult<Option<IdentityRecord>>;

    /// 批量插入,返回插入条数
    fn bulk_insert(&self, conn: &Connection, drafts: &[IdentityDraft]) -> RepositoryResult<usize>;

    /// 单条插入,返回生成的 id
    fn create(&self, conn: &Connection, draft: &IdentityDraft) -> RepositoryResult<i64>;

    /// 按 id 覆写档案值,同时清除软删除标记
    fn update(&self, conn: &Connection, id: i64, draft: &IdentityDraft) -> RepositoryResult<()>;

    /// 仅刷新 updated_at
    fn touch(&self, conn: &Connection, id: i64) -> RepositoryResult<()>;

    /// 整体替换家庭成员（先删后插）并回写 family_members_count
    fn replace_household(
        &self,
        conn: &Connection,
        identity_id: i64,
        members: &[HouseholdMember],
    ) -> RepositoryResult<()>;
}

// ==========================================
// SqliteIdentityStore
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteIdentityStore;

impl IdentityStore for SqliteIdentityStore {
    fn find_by_national_ids(
        &self,
        conn: &Connection,
        national_ids: &[String],
    ) -> RepositoryResult<HashMap<String, IdentityRecord>> {
        let mut found = HashMap::with_capacity(national_ids.len());

        for chunk in national_ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT {} FROM identities WHERE national_id IN ({})",
                IDENTITY_COLUMNS, placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), map_identity_row)?;
            for row in rows {
                let record = row?;
                found.insert(record.national_id.clone(), record);
            }
        }

        Ok(found)
    }

    fn find_by_national_id(
        &self,
        conn: &Connection,
        national_id: &str,
    ) -> RepositoryResult<Option<IdentityRecord>> {
        let sql = format!(
            "SELECT {} FROM identities WHERE national_id = ?1",
            IDENTITY_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![national_id], map_identity_row)
            .optional()?;
        Ok(record)
    }

    fn bulk_insert(&self, conn: &Connection, drafts: &[IdentityDraft]) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare_cached(INSERT_SQL)?;
        let now = encode_timestamp(&Utc::now());

        let mut count = 0;
        for draft in drafts {
            insert_one(&mut stmt, draft, &now)?;
            count += 1;
        }
        Ok(count)
    }

    fn create(&self, conn: &Connection, draft: &IdentityDraft) -> RepositoryResult<i64> {
        let now = encode_timestamp(&Utc::now());
        let mut stmt = conn.prepare_cached(INSERT_SQL)?;
        insert_one(&mut stmt, draft, &now)?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, conn: &Connection, id: i64, draft: &IdentityDraft) -> RepositoryResult<()> {
        let f = &draft.fields;
        let affected = conn.execute(
            r#"
            UPDATE identities SET
                national_id = ?1, full_name = ?2,
                phone = ?3, backup_phone = ?4, marital_status = ?5, spouse_name = ?6,
                spouse_phone = ?7, spouse_national_id = ?8, primary_address = ?9,
                previous_address = ?10, region = ?11, locality = ?12, branch = ?13,
                mosque = ?14, housing_type = ?15, job_title = ?16, health_status = ?17,
                notes = ?18, needs_review = ?19, updated_at = ?20, deleted_at = NULL
            WHERE id = ?21
            "#,
            params![
                draft.national_id,
                draft.full_name,
                f.phone,
                f.backup_phone,
                f.marital_status,
                f.spouse_name,
                f.spouse_phone,
                f.spouse_national_id,
                f.primary_address,
                f.previous_address,
                f.region,
                f.locality,
                f.branch,
                f.mosque,
                f.housing_type,
                f.job_title,
                f.health_status,
                f.notes,
                draft.needs_review as i32,
                encode_timestamp(&Utc::now()),
                id,
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Identity".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn touch(&self, conn: &Connection, id: i64) -> RepositoryResult<()> {
        let affected = conn.execute(
            "UPDATE identities SET updated_at = ?1 WHERE id = ?2",
            params![encode_timestamp(&Utc::now()), id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Identity".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn replace_household(
        &self,
        conn: &Connection,
        identity_id: i64,
        members: &[HouseholdMember],
    ) -> RepositoryResult<()> {
        conn.execute(
            "DELETE FROM household_members WHERE identity_id = ?1",
            params![identity_id],
        )?;

        let mut stmt = conn.prepare(
            r#"
            INSERT INTO household_members (
                identity_id, member_name, relation, national_id, phone, birth_date,
                is_guardian, needs_care, health_status, education_status, notes, position
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )?;

        for (position, member) in members.iter().enumerate() {
            stmt.execute(params![
                identity_id,
                member.member_name,
                member.relation.as_str(),
                member.national_id,
                member.phone,
                member.birth_date,
                member.is_guardian as i32,
                member.needs_care as i32,
                member.health_status,
                member.education_status,
                member.notes,
                position as i64,
            ])?;
        }

        conn.execute(
            "UPDATE identities SET family_members_count = ?1 WHERE id = ?2",
            params![members.len() as i64, identity_id],
        )?;
        Ok(())
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO identities (
        national_id, full_name,
        phone, backup_phone, marital_status, spouse_name, spouse_phone, spouse_national_id,
        primary_address, previous_address, region, locality, branch, mosque, housing_type,
        job_title, health_status, notes,
        family_members_count, needs_review, entered_at, updated_at
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
        0, ?19, ?20, ?20
    )
"#;

fn insert_one(
    stmt: &mut rusqlite::Statement<'_>,
    draft: &IdentityDraft,
    now: &str,
) -> rusqlite::Result<usize> {
    let f = &draft.fields;
    stmt.execute(params![
        draft.national_id,
        draft.full_name,
        f.phone,
        f.backup_phone,
        f.marital_status,
        f.spouse_name,
        f.spouse_phone,
        f.spouse_national_id,
        f.primary_address,
        f.previous_address,
        f.region,
        f.locality,
        f.branch,
        f.mosque,
        f.housing_type,
        f.job_title,
        f.health_status,
        f.notes,
        draft.needs_review as i32,
        now,
    ])
}

fn map_identity_row(row: &Row) -> rusqlite::Result<IdentityRecord> {
    let fields = IdentityFields {
        phone: row.get(3)?,
        backup_phone: row.get(4)?,
        marital_status: row.get(5)?,
        spouse_name: row.get(6)?,
        spouse_phone: row.get(7)?,
        spouse_national_id: row.get(8)?,
        primary_address: row.get(9)?,
        previous_address: row.get(10)?,
        region: row.get(11)?,
        locality: row.get(12)?,
        branch: row.get(13)?,
        mosque: row.get(14)?,
        housing_type: row.get(15)?,
        job_title: row.get(16)?,
        health_status: row.get(17)?,
        notes: row.get(18)?,
    };

    let entered_at: String = row.get(21)?;
    let updated_at: String = row.get(22)?;
    let deleted_at: Option<String> = row.get(23)?;

    Ok(IdentityRecord {
        id: row.get(0)?,
        national_id: row.get(1)?,
        full_name: row.get(2)?,
        fields,
        family_members_count: row.get(19)?,
        needs_review: row.get::<_, i64>(20)? != 0,
        entered_at: decode_timestamp(21, &entered_at)?,
        updated_at: decode_timestamp(22, &updated_at)?,
        deleted_at: deleted_at
            .map(|raw| decode_timestamp(23, &raw))
            .transpose()?,
    })
}

fn map_member_row(row: &Row) -> rusqlite::Result<(i64, HouseholdMember)> {
    let relation: String = row.get(2)?;
    let member = HouseholdMember {
        member_name: row.get(1)?,
        relation: Relation::parse(&relation),
        national_id: row.get(3)?,
        phone: row.get(4)?,
        birth_date: row.get::<_, Option<NaiveDate>>(5)?,
        is_guardian: row.get::<_, i64>(6)? != 0,
        needs_care: row.get::<_, i64>(7)? != 0,
        health_status: row.get(8)?,
        education_status: row.get(9)?,
        notes: row.get(10)?,
    };
    Ok((row.get(0)?, member))
}

// ==========================================
// IdentityRepository - 面向查询/管理的档案访问
// ==========================================
pub struct IdentityRepository {
    conn: Arc<Mutex<Connection>>,
}

impl IdentityRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按自然键查询档案
    pub fn find_by_national_id(&self, national_id: &str) -> RepositoryResult<Option<IdentityRecord>> {
        let conn = self.get_conn()?;
        SqliteIdentityStore.find_by_national_id(&conn, national_id)
    }

    /// 查询档案的家庭成员（按录入顺序）
    pub fn household_of(&self, identity_id: i64) -> RepositoryResult<Vec<HouseholdMember>> {
        let conn = self.get_conn()?;
        let mut by_owner = Self::households_for(&conn, &[identity_id])?;
        Ok(by_owner.remove(&identity_id).unwrap_or_default())
    }

    /// 软删除档案
    pub fn soft_delete(&self, national_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE identities SET deleted_at = ?1 WHERE national_id = ?2 AND deleted_at IS NULL",
            params![encode_timestamp(&Utc::now()), national_id],
        )?;
        Ok(affected > 0)
    }

    /// 未删除档案总数
    pub fn count_active(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM identities WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 符合导出条件的档案数
    pub fn count_for_export(&self, filter: &ExportFilter) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let (where_sql, args) = export_where(filter, None);
        let sql = format!("SELECT COUNT(*) FROM identities WHERE {}", where_sql);
        let count = conn.query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// 导出分页（updated_at DESC, id DESC）
    ///
    /// # 参数
    /// - filter: 导出条件
    /// - after: 上一页最后一条的游标（None 表示第一页）
    /// - limit: 每页条数
    /// - with_household: 是否加载家庭成员（未选择家庭成员列时为空）
    pub fn export_page(
        &self,
        filter: &ExportFilter,
        after: Option<&ExportCursor>,
        limit: usize,
        with_household: bool,
    ) -> RepositoryResult<Vec<(IdentityRecord, Vec<HouseholdMember>)>> {
        let conn = self.get_conn()?;
        let (where_sql, mut args) = export_where(filter, after);
        args.push(limit.to_string());

        let sql = format!(
            "SELECT {} FROM identities WHERE {} ORDER BY updated_at DESC, id DESC LIMIT CAST(? AS INTEGER)",
            IDENTITY_COLUMNS, where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), map_identity_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut households = if with_household {
            let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
            Self::households_for(&conn, &ids)?
        } else {
            HashMap::new()
        };

        Ok(records
            .into_iter()
            .map(|record| {
                let members = households.remove(&record.id).unwrap_or_default();
                (record, members)
            })
            .collect())
    }

    fn households_for(
        conn: &Connection,
        identity_ids: &[i64],
    ) -> RepositoryResult<HashMap<i64, Vec<HouseholdMember>>> {
        let mut grouped: HashMap<i64, Vec<HouseholdMember>> = HashMap::new();

        for chunk in identity_ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                r#"
                SELECT identity_id, member_name, relation, national_id, phone, birth_date,
                       is_guardian, needs_care, health_status, education_status, notes
                FROM household_members
                WHERE identity_id IN ({})
                ORDER BY identity_id, position, id
                "#,
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), map_member_row)?;
            for row in rows {
                let (owner, member) = row?;
                grouped.entry(owner).or_default().push(member);
            }
        }

        Ok(grouped)
    }
}

/// 构建导出 WHERE 子句（参数均以文本绑定）
fn export_where(filter: &ExportFilter, after: Option<&ExportCursor>) -> (String, Vec<String>) {
    let mut clauses = vec!["deleted_at IS NULL".to_string()];
    let mut args = Vec::new();

    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", escape_like(term));
        clauses.push(
            "(national_id LIKE ? ESCAPE '\\' OR full_name LIKE ? ESCAPE '\\' OR phone LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        args.extend(std::iter::repeat(pattern).take(3));
    }

    match filter.status {
        Some(ReviewFilter::Pending) => clauses.push("needs_review = 1".to_string()),
        Some(ReviewFilter::Verified) => clauses.push("needs_review = 0".to_string()),
        None => {}
    }

    if let Some(cursor) = after {
        clauses.push("(updated_at < ? OR (updated_at = ? AND id < CAST(? AS INTEGER)))".to_string());
        let ts = encode_timestamp(&cursor.updated_at);
        args.push(ts.clone());
        args.push(ts);
        args.push(cursor.id.to_string());
    }

    (clauses.join(" AND "), args)
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn draft(national_id: &str, name: &str) -> IdentityDraft {
        IdentityDraft {
            national_id: national_id.to_string(),
            full_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bulk_insert_and_lookup() {
        let shared = setup();
        let conn = shared.lock().unwrap();
        let store = SqliteIdentityStore;

        let inserted = store
            .bulk_insert(&conn, &[draft("111111", "أ"), draft("222222", "ب")])
            .unwrap();
        assert_eq!(inserted, 2);

        let found = store
            .find_by_national_ids(&conn, &["111111".to_string(), "999999".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["111111"].full_name, "أ");
        assert!(!found["111111"].needs_review);
    }

    #[test]
    fn test_duplicate_insert_is_unique_violation() {
        let shared = setup();
        let conn = shared.lock().unwrap();
        let store = SqliteIdentityStore;

        store.create(&conn, &draft("111111", "أ")).unwrap();
        let err = store.create(&conn, &draft("111111", "ب")).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_replace_household_updates_count_and_cascades() {
        let shared = setup();
        let repo = IdentityRepository::new(shared.clone());
        let id = {
            let conn = shared.lock().unwrap();
            let store = SqliteIdentityStore;
            let id = store.create(&conn, &draft("111111", "أ")).unwrap();
            let members = vec![
                HouseholdMember {
                    member_name: "سارة".to_string(),
                    relation: Relation::Daughter,
                    ..Default::default()
                },
                HouseholdMember {
                    member_name: "علي".to_string(),
                    relation: Relation::Son,
                    ..Default::default()
                },
            ];
            store.replace_household(&conn, id, &members).unwrap();
            store.replace_household(&conn, id, &members[..1]).unwrap();
            id
        };

        let members = repo.household_of(id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].relation, Relation::Daughter);
        let record = repo.find_by_national_id("111111").unwrap().unwrap();
        assert_eq!(record.family_members_count, 1);

        shared
            .lock()
            .unwrap()
            .execute("DELETE FROM identities WHERE id = ?1", params![id])
            .unwrap();
        assert!(repo.household_of(id).unwrap().is_empty());
    }

    #[test]
    fn test_export_filters_and_paging() {
        let shared = setup();
        let repo = IdentityRepository::new(shared.clone());
        {
            let conn = shared.lock().unwrap();
            let store = SqliteIdentityStore;
            for i in 0..5 {
                let mut d = draft(&format!("10000{}", i), &format!("اسم {}", i));
                d.needs_review = i % 2 == 0;
                store.create(&conn, &d).unwrap();
            }
        }
        repo.soft_delete("100004").unwrap();

        let all = ExportFilter::default();
        assert_eq!(repo.count_for_export(&all).unwrap(), 4);

        let pending = ExportFilter {
            status: Some(ReviewFilter::Pending),
            ..Default::default()
        };
        assert_eq!(repo.count_for_export(&pending).unwrap(), 2);

        let search = ExportFilter {
            search: Some("100003".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.count_for_export(&search).unwrap(), 1);

        let first = repo.export_page(&all, None, 3, false).unwrap();
        assert_eq!(first.len(), 3);
        let last = &first[2].0;
        let cursor = ExportCursor {
            updated_at: last.updated_at,
            id: last.id,
        };
        let second = repo.export_page(&all, Some(&cursor), 3, false).unwrap();
        assert_eq!(second.len(), 1);

        let mut seen: Vec<String> = first
            .iter()
            .chain(second.iter())
            .map(|(r, _)| r.national_id.clone())
            .collect();
        seen.sort();
        assert_eq!(seen, vec!["100000", "100001", "100002", "100003"]);
    }

    #[test]
    fn test_export_page_loads_household_only_when_requested() {
        let shared = setup();
        let repo = IdentityRepository::new(shared.clone());
        {
            let conn = shared.lock().unwrap();
            let store = SqliteIdentityStore;
            let id = store.create(&conn, &draft("111111", "أ")).unwrap();
            let member = HouseholdMember {
                member_name: "سارة".to_string(),
                relation: Relation::Daughter,
                ..Default::default()
            };
            store.replace_household(&conn, id, &[member]).unwrap();
        }

        let all = ExportFilter::default();
        let with = repo.export_page(&all, None, 10, true).unwrap();
        assert_eq!(with[0].1.len(), 1);

        let without = repo.export_page(&all, None, 10, false).unwrap();
        assert!(without[0].1.is_empty());
        assert_eq!(without[0].0.family_members_count, 1);
    }
}
