// ==========================================
// 受助人登记系统 - 批量 Upsert 引擎
// ==========================================
// 流程: 批量查询已存在档案 → 构建字段值 → 划分 插入/更新
//       → 批内去重 → 插入事务 → 更新事务
// 事务:
// - 插入阶段遇唯一约束冲突（并发导入同一自然键）→ 回滚后逐行 upsert 回退
// - 其他持久化错误 → 回滚整批并上抛
// - 更新阶段任何错误 → 回滚整批并上抛（不回退）
// 计数: imported = created + updated,每行恰好计入一个桶
// ==========================================

use crate::domain::field_catalog::{FieldCatalog, FAMILY_MEMBER_NAME, FULL_NAME};
use crate::domain::identity::{HouseholdMember, IdentityFields, IdentityRecord};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::household::{decode_members, selects_household};
use crate::importer::parsed_row::ParsedRow;
use crate::repository::{IdentityDraft, IdentityStore, RepositoryError, SqliteIdentityStore};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, warn};

/// 默认批大小
pub const DEFAULT_BATCH_SIZE: usize = 500;

// ==========================================
// BatchOutcome - 单批结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub created: i64,
    pub updated: i64,
    pub imported: i64,
    /// 回退路径自身失败的行（已本地化）
    pub errors: Vec<String>,
}

impl BatchOutcome {
    fn record_created(&mut self) {
        self.created += 1;
        self.imported += 1;
    }

    fn record_updated(&mut self) {
        self.updated += 1;
        self.imported += 1;
    }
}

/// 待写入行：字段值 + 可选的家庭成员替换集
struct PendingWrite<'a> {
    row: &'a ParsedRow,
    draft: IdentityDraft,
    household: Option<Vec<HouseholdMember>>,
}

/// 同一自然键的后续出现（仅刷新 updated_at,计入 updated）
struct Duplicate<'a> {
    row: &'a ParsedRow,
}

// ==========================================
// BatchUpsertEngine
// ==========================================
pub struct BatchUpsertEngine<S = SqliteIdentityStore>
where
    S: IdentityStore,
{
    conn: Arc<Mutex<Connection>>,
    store: S,
    catalog: Arc<FieldCatalog>,
}

impl BatchUpsertEngine<SqliteIdentityStore> {
    pub fn new(conn: Arc<Mutex<Connection>>, catalog: Arc<FieldCatalog>) -> Self {
        Self::with_store(conn, SqliteIdentityStore, catalog)
    }
}

impl<S> BatchUpsertEngine<S>
where
    S: IdentityStore,
{
    /// 使用指定存储实现创建引擎
    pub fn with_store(conn: Arc<Mutex<Connection>>, store: S, catalog: Arc<FieldCatalog>) -> Self {
        Self {
            conn,
            store,
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<FieldCatalog> {
        &self.catalog
    }

    /// 应用一批数据行
    ///
    /// # 参数
    /// - rows: 已通过必需字段校验的数据行
    /// - selected_fields: 导入字段选择集（空表示全部字段）
    ///
    /// # 返回
    /// - Ok(BatchOutcome): 本批计数与回退失败的行错误
    /// - Err(PersistenceFailure): 整批已回滚
    #[instrument(skip_all, fields(batch_size = rows.len()))]
    pub fn apply_batch(
        &self,
        rows: &[ParsedRow],
        selected_fields: &[String],
    ) -> ImportResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if rows.is_empty() {
            return Ok(outcome);
        }

        let selected = self.catalog.selection_keys(selected_fields);
        let with_household = selects_household(selected.iter());

        let conn = self
            .conn
            .lock()
            .map_err(|e| ImportError::from(RepositoryError::LockError(e.to_string())))?;

        // 1. 一次查询取回本批已存在的档案
        let keys: Vec<String> = {
            let mut seen = HashSet::new();
            rows.iter()
                .filter(|r| seen.insert(r.natural_key.as_str()))
                .map(|r| r.natural_key.clone())
                .collect()
        };
        let existing = self.store.find_by_national_ids(&conn, &keys)?;

        // 2-4. 构建字段值、划分并批内去重（首次出现生效）
        let mut to_insert: Vec<PendingWrite> = Vec::new();
        let mut insert_dups: Vec<Duplicate> = Vec::new();
        let mut to_update: Vec<(i64, PendingWrite)> = Vec::new();
        let mut update_dups: Vec<(i64, Duplicate)> = Vec::new();
        let mut claimed: HashSet<&str> = HashSet::new();

        for row in rows {
            let first = claimed.insert(row.natural_key.as_str());
            match existing.get(&row.natural_key) {
                Some(record) if first => to_update.push((
                    record.id,
                    self.pending_write(row, Some(record), &selected, with_household),
                )),
                Some(record) => update_dups.push((record.id, Duplicate { row })),
                None if first => {
                    to_insert.push(self.pending_write(row, None, &selected, with_household))
                }
                None => insert_dups.push(Duplicate { row }),
            }
        }

        debug!(
            inserts = to_insert.len(),
            updates = to_update.len(),
            duplicates = insert_dups.len() + update_dups.len(),
            "批次划分完成"
        );

        // 5. 插入阶段
        if !to_insert.is_empty() {
            match self.insert_phase(&conn, &to_insert, &insert_dups) {
                Ok(()) => {
                    for _ in &to_insert {
                        outcome.record_created();
                    }
                    for _ in &insert_dups {
                        outcome.record_updated();
                    }
                }
                Err(ImportError::PersistenceConflict(msg)) => {
                    warn!(error = %msg, "批量插入遇唯一约束冲突，逐行回退");
                    self.fallback_phase(
                        &conn,
                        &to_insert,
                        &insert_dups,
                        &selected,
                        with_household,
                        &mut outcome,
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // 6. 更新阶段（无回退）
        if !to_update.is_empty() {
            self.update_phase(&conn, &to_update, &update_dups)?;
            for _ in &to_update {
                outcome.record_updated();
            }
            for _ in &update_dups {
                outcome.record_updated();
            }
        }

        debug!(
            created = outcome.created,
            updated = outcome.updated,
            errors = outcome.errors.len(),
            "批次写入完成"
        );
        Ok(outcome)
    }

    /// 构建写入值
    ///
    /// 更新时以已有档案为底稿,仅覆盖"已选择且文件中有对应列"的字段；
    /// 新建时未选字段为空。自然键与姓名始终写入。
    /// 管理员导入视为已核实,needs_review 一律清零。
    /// 文件中没有家庭成员姓名列时保留已有家庭成员。
    fn pending_write<'a>(
        &self,
        row: &'a ParsedRow,
        base: Option<&IdentityRecord>,
        selected: &HashSet<String>,
        with_household: bool,
    ) -> PendingWrite<'a> {
        let mut draft = match base {
            Some(record) => IdentityDraft::from_record(record),
            None => IdentityDraft {
                national_id: row.natural_key.clone(),
                full_name: String::new(),
                fields: IdentityFields::default(),
                needs_review: false,
            },
        };

        draft.national_id = row.natural_key.clone();
        draft.full_name = row.value(FULL_NAME).to_string();
        draft.needs_review = false;

        for key in IdentityFields::KEYS {
            if selected.contains(key) && row.has_column(key) {
                draft.fields.set(key, row.value(key));
            }
        }

        let household = if with_household && row.has_column(FAMILY_MEMBER_NAME) {
            Some(decode_members(row))
        } else {
            None
        };

        PendingWrite {
            row,
            draft,
            household,
        }
    }

    /// 插入事务：批量插入 → 回查 id → 替换家庭成员 → 刷新批内重复
    fn insert_phase(
        &self,
        conn: &Connection,
        to_insert: &[PendingWrite],
        dups: &[Duplicate],
    ) -> ImportResult<()> {
        let tx = conn.unchecked_transaction()?;

        let drafts: Vec<IdentityDraft> = to_insert.iter().map(|w| w.draft.clone()).collect();
        self.store.bulk_insert(&tx, &drafts)?;

        let keys: Vec<String> = to_insert.iter().map(|w| w.draft.national_id.clone()).collect();
        let inserted = self.store.find_by_national_ids(&tx, &keys)?;

        for write in to_insert {
            let Some(record) = inserted.get(&write.draft.national_id) else {
                return Err(ImportError::PersistenceFailure(format!(
                    "插入后未找到档案: {}",
                    write.draft.national_id
                )));
            };
            if let Some(members) = &write.household {
                self.store.replace_household(&tx, record.id, members)?;
            }
        }

        for dup in dups {
            if let Some(record) = inserted.get(&dup.row.natural_key) {
                self.store.touch(&tx, record.id)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// 逐行回退：重新查询,存在则更新,否则新建；每行独立事务
    fn fallback_phase(
        &self,
        conn: &Connection,
        to_insert: &[PendingWrite],
        dups: &[Duplicate],
        selected: &HashSet<String>,
        with_household: bool,
        outcome: &mut BatchOutcome,
    ) {
        for write in to_insert {
            match self.upsert_one(conn, write.row, selected, with_household) {
                Ok(true) => outcome.record_created(),
                Ok(false) => outcome.record_updated(),
                Err(e) => {
                    warn!(row = write.row.row_index, error = %e, "逐行回退失败");
                    outcome.errors.push(row_failure(write.row, &e));
                }
            }
        }

        for dup in dups {
            match self.touch_existing(conn, dup.row) {
                Ok(()) => outcome.record_updated(),
                Err(e) => {
                    warn!(row = dup.row.row_index, error = %e, "重复行回退失败");
                    outcome.errors.push(row_failure(dup.row, &e));
                }
            }
        }
    }

    /// 单行 upsert
    ///
    /// # 返回
    /// - Ok(true): 新建
    /// - Ok(false): 更新
    fn upsert_one(
        &self,
        conn: &Connection,
        row: &ParsedRow,
        selected: &HashSet<String>,
        with_household: bool,
    ) -> ImportResult<bool> {
        let tx = conn.unchecked_transaction()?;

        let existing = self.store.find_by_national_id(&tx, &row.natural_key)?;
        let write = self.pending_write(row, existing.as_ref(), selected, with_household);

        let (id, created) = match existing {
            Some(record) => {
                self.store.update(&tx, record.id, &write.draft)?;
                (record.id, false)
            }
            None => (self.store.create(&tx, &write.draft)?, true),
        };

        if let Some(members) = &write.household {
            self.store.replace_household(&tx, id, members)?;
        }

        tx.commit()?;
        Ok(created)
    }

    fn touch_existing(&self, conn: &Connection, row: &ParsedRow) -> ImportResult<()> {
        let tx = conn.unchecked_transaction()?;
        let record = self
            .store
            .find_by_national_id(&tx, &row.natural_key)?
            .ok_or_else(|| {
                ImportError::PersistenceFailure(format!("档案不存在: {}", row.natural_key))
            })?;
        self.store.touch(&tx, record.id)?;
        tx.commit()?;
        Ok(())
    }

    /// 更新事务：覆写字段 → 替换家庭成员 → 刷新批内重复
    fn update_phase(
        &self,
        conn: &Connection,
        to_update: &[(i64, PendingWrite)],
        dups: &[(i64, Duplicate)],
    ) -> ImportResult<()> {
        let tx = conn.unchecked_transaction()?;

        for (id, write) in to_update {
            self.store.update(&tx, *id, &write.draft)?;
            if let Some(members) = &write.household {
                self.store.replace_household(&tx, *id, members)?;
            }
        }

        for (id, _) in dups {
            self.store.touch(&tx, *id)?;
        }

        tx.commit()?;
        Ok(())
    }
}

/// 回退失败行的错误条目
fn row_failure(row: &ParsedRow, err: &ImportError) -> String {
    crate::i18n::t_with_args(
        "import.row_failed",
        &[
            ("row", &row.row_index.to_string()),
            ("reason", &err.user_message()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field_catalog::{ColumnMap, FAMILY_MEMBER_RELATION, NATIONAL_ID};
    use crate::repository::IdentityRepository;

    fn setup() -> (Arc<Mutex<Connection>>, BatchUpsertEngine) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        let engine = BatchUpsertEngine::new(shared.clone(), Arc::new(FieldCatalog::standard()));
        (shared, engine)
    }

    fn columns() -> Arc<ColumnMap> {
        let mut map = ColumnMap::new();
        map.insert(NATIONAL_ID, 0);
        map.insert(FULL_NAME, 1);
        map.insert("phone", 2);
        map.insert(FAMILY_MEMBER_NAME, 3);
        map.insert(FAMILY_MEMBER_RELATION, 4);
        Arc::new(map)
    }

    fn row(index: usize, cells: &[&str]) -> ParsedRow {
        ParsedRow::new(index, cells.iter().map(|c| c.to_string()).collect(), columns())
    }

    #[test]
    fn test_create_then_update() {
        let (shared, engine) = setup();
        let repo = IdentityRepository::new(shared);

        let first = engine
            .apply_batch(&[row(2, &["123456789", "أحمد علي", "0591234567", "", ""])], &[])
            .unwrap();
        assert_eq!((first.created, first.updated, first.imported), (1, 0, 1));

        let second = engine
            .apply_batch(&[row(2, &["123456789", "أحمد علي محمد", "", "", ""])], &[])
            .unwrap();
        assert_eq!((second.created, second.updated, second.imported), (0, 1, 1));

        let stored = repo.find_by_national_id("123456789").unwrap().unwrap();
        assert_eq!(stored.full_name, "أحمد علي محمد");
        assert_eq!(stored.fields.phone, None);
    }

    #[test]
    fn test_unselected_fields_keep_existing_values() {
        let (shared, engine) = setup();
        let repo = IdentityRepository::new(shared);

        engine
            .apply_batch(&[row(2, &["123456789", "أحمد", "0591234567", "", ""])], &[])
            .unwrap();
        engine
            .apply_batch(
                &[row(2, &["123456789", "أحمد", "0000000000", "", ""])],
                &["full_name".to_string()],
            )
            .unwrap();

        let stored = repo.find_by_national_id("123456789").unwrap().unwrap();
        assert_eq!(stored.fields.phone.as_deref(), Some("0591234567"));
    }

    #[test]
    fn test_in_batch_duplicates_first_occurrence_wins() {
        let (shared, engine) = setup();
        let repo = IdentityRepository::new(shared);

        let outcome = engine
            .apply_batch(
                &[
                    row(2, &["123456789", "الأول", "", "", ""]),
                    row(3, &["123456789", "الثاني", "", "", ""]),
                ],
                &[],
            )
            .unwrap();

        assert_eq!((outcome.created, outcome.updated), (1, 1));
        assert!(outcome.errors.is_empty());
        let stored = repo.find_by_national_id("123456789").unwrap().unwrap();
        assert_eq!(stored.full_name, "الأول");
        assert_eq!(repo.count_active().unwrap(), 1);
    }

    #[test]
    fn test_household_replaced_when_selected() {
        let (shared, engine) = setup();
        let repo = IdentityRepository::new(shared);

        engine
            .apply_batch(&[row(2, &["123456789", "أحمد", "", "سارة | علي", "ابنة | ابن"])], &[])
            .unwrap();
        let stored = repo.find_by_national_id("123456789").unwrap().unwrap();
        assert_eq!(stored.family_members_count, 2);

        engine
            .apply_batch(&[row(2, &["123456789", "أحمد", "", "سارة", "ابنة"])], &[])
            .unwrap();
        let members = repo.household_of(stored.id).unwrap();
        assert_eq!(members.len(), 1);

        // 未选择家庭成员列时不触碰
        engine
            .apply_batch(
                &[row(2, &["123456789", "أحمد", "", "", ""])],
                &["full_name".to_string()],
            )
            .unwrap();
        assert_eq!(repo.household_of(stored.id).unwrap().len(), 1);
    }
}
