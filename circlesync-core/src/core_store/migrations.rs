//! Schema migrations for the durable cache store
//!
//! Each migration runs in its own transaction and is recorded in
//! `cache_schema_version`.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use super::StoreResult;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

pub fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Namespaced cache entries",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,                    -- JSON encoded base value
                updated_at INTEGER NOT NULL,            -- unix millis
                PRIMARY KEY (namespace, key)
            );
        "#,
    }]
}

fn current_version(pool: &Pool<SqliteConnectionManager>) -> StoreResult<i32> {
    let conn = pool.get()?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM cache_schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded version
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> StoreResult<()> {
    let current = current_version(pool)?;
    let pending: Vec<_> = migrations()
        .into_iter()
        .filter(|m| m.version > current)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let conn = pool.get()?;
    for migration in pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up_sql)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        tx.execute(
            "INSERT INTO cache_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, now],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied cache store migration"
        );
    }
    Ok(())
}
