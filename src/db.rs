// ==========================================
// 受助人登记系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建表入口,避免各模块各自建表导致结构漂移
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启（家庭成员级联删除依赖它）
/// - busy_timeout 需要"每个连接"单独配置,并发任务写入时有界等待
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 初始化数据库结构（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS identities (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          national_id TEXT NOT NULL UNIQUE,
          full_name TEXT NOT NULL,
          phone TEXT,
          backup_phone TEXT,
          marital_status TEXT,
          spouse_name TEXT,
          spouse_phone TEXT,
          spouse_national_id TEXT,
          primary_address TEXT,
          previous_address TEXT,
          region TEXT,
          locality TEXT,
          branch TEXT,
          mosque TEXT,
          housing_type TEXT,
          job_title TEXT,
          health_status TEXT,
          notes TEXT,
          family_members_count INTEGER NOT NULL DEFAULT 0,
          needs_review INTEGER NOT NULL DEFAULT 0,
          entered_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_identities_updated
          ON identities(updated_at DESC);

        CREATE TABLE IF NOT EXISTS household_members (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
          member_name TEXT NOT NULL,
          relation TEXT NOT NULL,
          national_id TEXT,
          phone TEXT,
          birth_date TEXT,
          is_guardian INTEGER NOT NULL DEFAULT 0,
          needs_care INTEGER NOT NULL DEFAULT 0,
          health_status TEXT,
          education_status TEXT,
          notes TEXT,
          position INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_household_identity
          ON household_members(identity_id, position);

        CREATE TABLE IF NOT EXISTS transfer_jobs (
          job_id TEXT PRIMARY KEY,
          kind TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'pending',
          total_rows INTEGER NOT NULL DEFAULT 0,
          processed_rows INTEGER NOT NULL DEFAULT 0,
          imported INTEGER NOT NULL DEFAULT 0,
          created INTEGER NOT NULL DEFAULT 0,
          updated INTEGER NOT NULL DEFAULT 0,
          errors_count INTEGER NOT NULL DEFAULT 0,
          error_list TEXT NOT NULL DEFAULT '[]',
          error_message TEXT,
          result_message TEXT,
          file_path TEXT,
          file_name TEXT,
          selected_fields TEXT NOT NULL DEFAULT '[]',
          direction TEXT NOT NULL DEFAULT 'rtl',
          search TEXT,
          status_filter TEXT,
          created_at TEXT NOT NULL,
          started_at TEXT,
          completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_transfer_jobs_status
          ON transfer_jobs(status, created_at);

        CREATE TABLE IF NOT EXISTS config_kv (
          scope_id TEXT NOT NULL,
          key TEXT NOT NULL,
          value TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          PRIMARY KEY (scope_id, key)
        );
        "#,
    )?;
    Ok(())
}
