//! On-disk schema and numbered migrations
//!
//! Four logical tables: `schema_version`, `checkpoints`, `tasks`,
//! `checkpoint_chain`. External admin tooling reads these directly, so
//! columns are only ever added through a new migration.

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::info;

use crate::errors::StoreError;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

const MIGRATION_V1: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    checkpoint_id TEXT NOT NULL UNIQUE,
    version INTEGER NOT NULL,
    state BLOB NOT NULL,
    state_hash TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    compressed INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL,
    UNIQUE (task_id, version)
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_task ON checkpoints (task_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_checkpoint ON checkpoints (checkpoint_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_task_version ON checkpoints (task_id, version DESC);
CREATE INDEX IF NOT EXISTS idx_checkpoints_created ON checkpoints (created_at);
CREATE INDEX IF NOT EXISTS idx_checkpoints_expires ON checkpoints (expires_at);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    checkpoint_count INTEGER NOT NULL DEFAULT 0,
    latest_checkpoint_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_chain (
    checkpoint_id TEXT PRIMARY KEY,
    parent_id TEXT,
    task_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chain_parent ON checkpoint_chain (parent_id);
CREATE INDEX IF NOT EXISTS idx_chain_task ON checkpoint_chain (task_id);
";

// Startup scans filter tasks by status.
const MIGRATION_V2: &str = "
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1), (2, MIGRATION_V2)];

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<u32, StoreError> {
    let current = current_version(conn)?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        apply_migration(&tx, version, sql)?;
        tx.commit()?;
        info!(version, "Applied checkpoint store migration");
    }

    Ok(CURRENT_SCHEMA_VERSION.max(current))
}

fn apply_migration(tx: &Transaction<'_>, version: u32, sql: &str) -> Result<(), StoreError> {
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)
         ON CONFLICT(version) DO NOTHING",
        params![version, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

/// Highest applied migration, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version' LIMIT 1",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(0);
    }

    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}
