//! Durable Store
//!
//! Transactional SQLite persistence for checkpoint rows, task summaries and
//! the parent/child checkpoint chain. This is the only module that touches
//! disk.
//!
//! Every mutation runs inside one `BEGIN IMMEDIATE` transaction while holding
//! the connection mutex, so version assignment and insert are atomic even
//! with concurrent writers for the same task.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::StoreError;

pub mod records;
pub mod schema;

pub use records::{
    CheckpointMetadata, CheckpointType, IntegrityCheck, ListOptions, OrderBy, OrderDirection,
    PruneReport, SaveOptions, StateRecord, StoreStats, TaskRecord, TaskStatus, TriggerReason,
};

const STATE_COLUMNS: &str = "id, task_id, checkpoint_id, version, state, state_hash, metadata, \
                             created_at, expires_at, compressed, size";

const TASK_COLUMNS: &str =
    "id, status, checkpoint_count, latest_checkpoint_id, created_at, updated_at";

/// Hex SHA-256 of a stored payload
pub fn hash_state(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SQLite-backed checkpoint store
pub struct DurableStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    closed: AtomicBool,
}

impl DurableStore {
    /// Open (or create) a store at `path` and apply pending migrations.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::from_connection(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "Opened checkpoint store");
        Ok(store)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.lock())
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.conn()?;
        schema::current_version(&conn)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Persist one checkpoint.
    ///
    /// Assigns `version = max + 1`, inserts the row, upserts the task summary
    /// and records the chain edge, all in one transaction. A full checkpoint
    /// saved without an explicit parent is linked to the task's current
    /// latest checkpoint.
    pub fn save_state(
        &self,
        task_id: &str,
        checkpoint_id: &str,
        state: &[u8],
        metadata: &CheckpointMetadata,
        opts: &SaveOptions,
    ) -> Result<StateRecord, StoreError> {
        let now = Utc::now();
        let state_hash = hash_state(state);

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let duplicate = tx
            .query_row(
                "SELECT 1 FROM checkpoints WHERE checkpoint_id = ?1",
                params![checkpoint_id],
                |_| Ok(()),
            )
            .optional()?;
        if duplicate.is_some() {
            return Err(StoreError::DuplicateCheckpoint(checkpoint_id.to_string()));
        }

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM checkpoints WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;

        let mut metadata = metadata.clone();
        match metadata.parent_checkpoint_id.as_deref() {
            Some(parent) => {
                let found = tx
                    .query_row(
                        "SELECT 1 FROM checkpoints WHERE checkpoint_id = ?1 AND task_id = ?2",
                        params![parent, task_id],
                        |_| Ok(()),
                    )
                    .optional()?;
                if found.is_none() {
                    return Err(StoreError::MissingParent {
                        task_id: task_id.to_string(),
                        parent_id: parent.to_string(),
                    });
                }
            }
            None if metadata.is_diff => {
                return Err(StoreError::DiffWithoutBase {
                    task_id: task_id.to_string(),
                    checkpoint_id: checkpoint_id.to_string(),
                });
            }
            None => {
                metadata.parent_checkpoint_id = latest_checkpoint_id(&tx, task_id)?;
            }
        }

        let metadata_json = serde_json::to_string(&metadata).map_err(|e| {
            StoreError::Serialization {
                what: "checkpoint metadata",
                message: e.to_string(),
            }
        })?;

        let id = Uuid::new_v4().to_string();
        let now_ms = now.timestamp_millis();
        let expires_ms = opts.expires_at.map(|at| at.timestamp_millis());
        let size = state.len() as i64;

        tx.execute(
            "INSERT INTO checkpoints
                (id, task_id, checkpoint_id, version, state, state_hash, metadata,
                 created_at, expires_at, compressed, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                task_id,
                checkpoint_id,
                version,
                state,
                state_hash,
                metadata_json,
                now_ms,
                expires_ms,
                opts.compressed,
                size
            ],
        )?;

        tx.execute(
            "INSERT INTO tasks
                (id, status, checkpoint_count, latest_checkpoint_id, created_at, updated_at)
             VALUES (?1, 'active', 1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                status = 'active',
                checkpoint_count = checkpoint_count + 1,
                latest_checkpoint_id = excluded.latest_checkpoint_id,
                updated_at = excluded.updated_at",
            params![task_id, checkpoint_id, now_ms],
        )?;

        tx.execute(
            "INSERT INTO checkpoint_chain (checkpoint_id, parent_id, task_id, sequence_number)
             VALUES (?1, ?2, ?3, ?4)",
            params![checkpoint_id, metadata.parent_checkpoint_id, task_id, version],
        )?;

        tx.commit()?;
        debug!(task_id, checkpoint_id, version, "Saved checkpoint row");

        Ok(StateRecord {
            id,
            task_id: task_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            version: version as u64,
            state: state.to_vec(),
            state_hash,
            metadata,
            created_at: from_millis(now_ms),
            expires_at: expires_ms.map(from_millis),
            compressed: opts.compressed,
            size: size as u64,
        })
    }

    /// Delete one checkpoint and its chain edge. Returns whether it existed.
    pub fn delete_state(&self, checkpoint_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let task_id: Option<String> = tx
            .query_row(
                "SELECT task_id FROM checkpoints WHERE checkpoint_id = ?1",
                params![checkpoint_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(task_id) = task_id else {
            return Ok(false);
        };

        delete_checkpoint_rows(&tx, checkpoint_id)?;
        refresh_task_summary(&tx, &task_id)?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete every checkpoint, chain edge and the summary row of a task.
    /// Returns the number of checkpoints removed.
    pub fn delete_task(&self, task_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute("DELETE FROM checkpoints WHERE task_id = ?1", params![task_id])?;
        tx.execute(
            "DELETE FROM checkpoint_chain WHERE task_id = ?1",
            params![task_id],
        )?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        tx.commit()?;
        info!(task_id, deleted, "Deleted task checkpoints");
        Ok(deleted)
    }

    /// Keep the `keep_count` newest versions of a task and delete the rest.
    pub fn prune_checkpoints(
        &self,
        task_id: &str,
        keep_count: usize,
    ) -> Result<PruneReport, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let doomed: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT checkpoint_id FROM checkpoints WHERE task_id = ?1
                 ORDER BY version DESC LIMIT -1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![task_id, keep_count as i64], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for checkpoint_id in &doomed {
            delete_checkpoint_rows(&tx, checkpoint_id)?;
        }
        refresh_task_summary(&tx, task_id)?;

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        if !doomed.is_empty() {
            info!(task_id, deleted = doomed.len(), remaining, "Pruned checkpoints");
        }

        Ok(PruneReport {
            deleted: doomed.len(),
            remaining: remaining as usize,
            deleted_ids: doomed,
        })
    }

    /// Delete every checkpoint whose `expires_at` is at or before `now`.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let expired: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT checkpoint_id, task_id FROM checkpoints
                 WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            )?;
            let rows = stmt.query_map(params![now.timestamp_millis()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut touched = BTreeSet::new();
        for (checkpoint_id, task_id) in &expired {
            delete_checkpoint_rows(&tx, checkpoint_id)?;
            touched.insert(task_id.as_str());
        }
        for task_id in touched {
            refresh_task_summary(&tx, task_id)?;
        }
        tx.commit()?;

        if !expired.is_empty() {
            info!(deleted = expired.len(), "Deleted expired checkpoints");
        }
        Ok(expired.len())
    }

    /// Rewrite a checkpoint's payload in place, typically turning a diff
    /// into a full state before its ancestors are pruned.
    pub fn materialize_state(
        &self,
        checkpoint_id: &str,
        state: &[u8],
        compressed: bool,
        metadata: &CheckpointMetadata,
    ) -> Result<bool, StoreError> {
        let metadata_json = serde_json::to_string(metadata).map_err(|e| {
            StoreError::Serialization {
                what: "checkpoint metadata",
                message: e.to_string(),
            }
        })?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = tx.execute(
            "UPDATE checkpoints
             SET state = ?2, state_hash = ?3, metadata = ?4, compressed = ?5, size = ?6
             WHERE checkpoint_id = ?1",
            params![
                checkpoint_id,
                state,
                hash_state(state),
                metadata_json,
                compressed,
                state.len() as i64
            ],
        )?;
        tx.commit()?;
        Ok(updated > 0)
    }

    /// Set a task's status. Returns whether the task exists.
    pub fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = tx.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![task_id, status.as_str(), Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(updated > 0)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_state(&self, checkpoint_id: &str) -> Result<Option<StateRecord>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM checkpoints WHERE checkpoint_id = ?1", STATE_COLUMNS),
                params![checkpoint_id],
                RawStateRow::from_row,
            )
            .optional()?;
        raw.map(RawStateRow::into_record).transpose()
    }

    /// Newest checkpoint of a task. Expired rows are skipped unless
    /// `include_expired` is set.
    pub fn get_latest(
        &self,
        task_id: &str,
        include_expired: bool,
    ) -> Result<Option<StateRecord>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints
                     WHERE task_id = ?1
                       AND (?2 OR expires_at IS NULL OR expires_at > ?3)
                     ORDER BY version DESC LIMIT 1",
                    STATE_COLUMNS
                ),
                params![task_id, include_expired, Utc::now().timestamp_millis()],
                RawStateRow::from_row,
            )
            .optional()?;
        raw.map(RawStateRow::into_record).transpose()
    }

    /// Most recent non-expired checkpoint created at or before `ts`.
    pub fn get_by_timestamp(
        &self,
        task_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<Option<StateRecord>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints
                     WHERE task_id = ?1 AND created_at <= ?2
                       AND (expires_at IS NULL OR expires_at > ?3)
                     ORDER BY created_at DESC, version DESC LIMIT 1",
                    STATE_COLUMNS
                ),
                params![
                    task_id,
                    ts.timestamp_millis(),
                    Utc::now().timestamp_millis()
                ],
                RawStateRow::from_row,
            )
            .optional()?;
        raw.map(RawStateRow::into_record).transpose()
    }

    pub fn list_checkpoints(
        &self,
        task_id: &str,
        opts: &ListOptions,
    ) -> Result<Vec<StateRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM checkpoints
             WHERE task_id = ?1
               AND (?2 OR expires_at IS NULL OR expires_at > ?3)
             ORDER BY {} LIMIT ?4 OFFSET ?5",
            STATE_COLUMNS,
            opts.order_clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                task_id,
                opts.include_expired,
                Utc::now().timestamp_millis(),
                opts.limit as i64,
                opts.offset as i64
            ],
            RawStateRow::from_row,
        )?;
        let raws = rows.collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawStateRow::into_record).collect()
    }

    /// Checkpoint ids from the task's root to `checkpoint_id`, root first.
    ///
    /// The walk stops at the first parent that no longer exists (pruned or
    /// deleted), so the result then starts at the oldest reachable ancestor.
    pub fn get_checkpoint_chain(&self, checkpoint_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;

        let lookup = |id: &str| -> Result<Option<Option<String>>, StoreError> {
            Ok(conn
                .query_row(
                    "SELECT parent_id FROM checkpoint_chain WHERE checkpoint_id = ?1",
                    params![id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?)
        };

        let Some(mut next) = lookup(checkpoint_id)? else {
            return Ok(Vec::new());
        };

        let mut chain = vec![checkpoint_id.to_string()];
        let mut seen: HashSet<String> = HashSet::from([checkpoint_id.to_string()]);

        while let Some(parent) = next {
            if !seen.insert(parent.clone()) {
                warn!(checkpoint_id, parent = %parent, "Cycle in checkpoint chain");
                break;
            }
            match lookup(&parent)? {
                Some(grandparent) => {
                    chain.push(parent);
                    next = grandparent;
                }
                None => {
                    debug!(checkpoint_id, parent = %parent, "Chain parent no longer exists");
                    break;
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Recompute the stored payload's hash and compare it with `state_hash`.
    pub fn verify_integrity(&self, checkpoint_id: &str) -> Result<IntegrityCheck, StoreError> {
        let conn = self.conn()?;
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT state, state_hash FROM checkpoints WHERE checkpoint_id = ?1",
                params![checkpoint_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            None => IntegrityCheck::Missing,
            Some((state, expected)) => {
                let actual = hash_state(&state);
                if actual == expected {
                    IntegrityCheck::Valid
                } else {
                    IntegrityCheck::Mismatch { expected, actual }
                }
            }
        })
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                RawTaskRow::from_row,
            )
            .optional()?;
        raw.map(RawTaskRow::into_record).transpose()
    }

    /// Tasks ordered by most recently updated, optionally filtered by status.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE (?1 IS NULL OR status = ?1)
             ORDER BY updated_at DESC, id ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], RawTaskRow::from_row)?;
        let raws = rows.collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawTaskRow::into_record).collect()
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(StoreStats {
            tasks: count("SELECT COUNT(*) FROM tasks")?,
            active_tasks: count("SELECT COUNT(*) FROM tasks WHERE status = 'active'")?,
            checkpoints: count("SELECT COUNT(*) FROM checkpoints")?,
            compressed_checkpoints: count("SELECT COUNT(*) FROM checkpoints WHERE compressed = 1")?,
            diff_checkpoints: count(
                "SELECT COUNT(*) FROM checkpoints WHERE json_extract(metadata, '$.isDiff') = 1",
            )?,
            total_bytes: count("SELECT COALESCE(SUM(size), 0) FROM checkpoints")?,
            schema_version: schema::current_version(&conn)?,
        })
    }

    /// Flush the write-ahead log and refuse further calls.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let conn = self.conn.lock();
        if self.path.is_some() {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        }
        info!("Closed checkpoint store");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn latest_checkpoint_id(tx: &Transaction<'_>, task_id: &str) -> Result<Option<String>, StoreError> {
    Ok(tx
        .query_row(
            "SELECT checkpoint_id FROM checkpoints WHERE task_id = ?1
             ORDER BY version DESC LIMIT 1",
            params![task_id],
            |row| row.get(0),
        )
        .optional()?)
}

fn delete_checkpoint_rows(tx: &Transaction<'_>, checkpoint_id: &str) -> Result<(), StoreError> {
    tx.execute(
        "DELETE FROM checkpoints WHERE checkpoint_id = ?1",
        params![checkpoint_id],
    )?;
    tx.execute(
        "DELETE FROM checkpoint_chain WHERE checkpoint_id = ?1",
        params![checkpoint_id],
    )?;
    Ok(())
}

fn refresh_task_summary(tx: &Transaction<'_>, task_id: &str) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE tasks SET
            checkpoint_count = (SELECT COUNT(*) FROM checkpoints WHERE task_id = ?1),
            latest_checkpoint_id = (
                SELECT checkpoint_id FROM checkpoints WHERE task_id = ?1
                ORDER BY version DESC LIMIT 1
            ),
            updated_at = ?2
         WHERE id = ?1",
        params![task_id, Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

struct RawStateRow {
    id: String,
    task_id: String,
    checkpoint_id: String,
    version: i64,
    state: Vec<u8>,
    state_hash: String,
    metadata: String,
    created_at: i64,
    expires_at: Option<i64>,
    compressed: bool,
    size: i64,
}

impl RawStateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            checkpoint_id: row.get(2)?,
            version: row.get(3)?,
            state: row.get(4)?,
            state_hash: row.get(5)?,
            metadata: row.get(6)?,
            created_at: row.get(7)?,
            expires_at: row.get(8)?,
            compressed: row.get(9)?,
            size: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<StateRecord, StoreError> {
        let metadata: CheckpointMetadata =
            serde_json::from_str(&self.metadata).map_err(|e| StoreError::Deserialization {
                checkpoint_id: self.checkpoint_id.clone(),
                message: format!("metadata: {}", e),
            })?;

        Ok(StateRecord {
            id: self.id,
            task_id: self.task_id,
            checkpoint_id: self.checkpoint_id,
            version: self.version as u64,
            state: self.state,
            state_hash: self.state_hash,
            metadata,
            created_at: from_millis(self.created_at),
            expires_at: self.expires_at.map(from_millis),
            compressed: self.compressed,
            size: self.size as u64,
        })
    }
}

struct RawTaskRow {
    id: String,
    status: String,
    checkpoint_count: i64,
    latest_checkpoint_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawTaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            checkpoint_count: row.get(2)?,
            latest_checkpoint_id: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord, StoreError> {
        let status = self
            .status
            .parse::<TaskStatus>()
            .map_err(|message| StoreError::Deserialization {
                checkpoint_id: format!("task:{}", self.id),
                message,
            })?;
        Ok(TaskRecord {
            id: self.id,
            status,
            checkpoint_count: self.checkpoint_count as u64,
            latest_checkpoint_id: self.latest_checkpoint_id,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}
