//! Checkpoint Manager
//!
//! Turns task states into persisted checkpoints and back:
//! - Throttles automatic checkpoints per task
//! - Stores incremental diffs against the previous in-memory state
//! - Compresses large payloads
//! - Rebuilds diff checkpoints by folding their chain
//! - Prunes and expires old checkpoints without orphaning chains
//!
//! Writes for one task are serialized by a per-task async lock. Store and
//! codec work runs on the blocking pool.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CheckpointConfig;
use crate::errors::{CheckpointError, StoreError};
use crate::events::{DurabilityEvent, EventBus};
use crate::state::TaskState;
use crate::store::{
    hash_state, DurableStore, IntegrityCheck, ListOptions, OrderDirection, PruneReport,
    SaveOptions, StateRecord, TaskRecord, TaskStatus,
};
use crate::telemetry::sanitize_for_log;

pub mod codec;
pub mod diff;

pub use crate::store::{CheckpointMetadata, CheckpointType, TriggerReason};
pub use diff::{StateDiff, StatePayload};

/// Options for `create_checkpoint`
#[derive(Debug, Clone, Default)]
pub struct CheckpointOptions {
    pub checkpoint_type: CheckpointType,
    pub label: Option<String>,
    /// Defaults from the checkpoint type when unset
    pub trigger_reason: Option<TriggerReason>,
    pub action_type: Option<String>,
    pub action_index: Option<u64>,
    /// Bypass the minimum-interval throttle
    pub force: bool,
}

impl CheckpointOptions {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn manual(label: impl Into<String>) -> Self {
        Self {
            checkpoint_type: CheckpointType::Manual,
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action_type: impl Into<String>, action_index: u64) -> Self {
        self.action_type = Some(action_type.into());
        self.action_index = Some(action_index);
        self
    }

    pub fn with_trigger(mut self, reason: TriggerReason) -> Self {
        self.trigger_reason = Some(reason);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    fn resolved_trigger(&self) -> TriggerReason {
        self.trigger_reason.unwrap_or(match self.checkpoint_type {
            CheckpointType::Auto if self.action_type.is_some() => TriggerReason::Action,
            CheckpointType::Auto => TriggerReason::Interval,
            CheckpointType::Manual => TriggerReason::Manual,
            CheckpointType::Milestone => TriggerReason::Milestone,
            CheckpointType::Error => TriggerReason::Error,
        })
    }
}

/// Lightweight view of a stored checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub task_id: String,
    pub checkpoint_id: String,
    pub version: u64,
    pub checkpoint_type: CheckpointType,
    pub trigger_reason: TriggerReason,
    pub label: Option<String>,
    pub phase: String,
    pub progress: f64,
    pub is_diff: bool,
    pub compressed: bool,
    pub size: u64,
    pub parent_checkpoint_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&StateRecord> for CheckpointSummary {
    fn from(record: &StateRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            checkpoint_id: record.checkpoint_id.clone(),
            version: record.version,
            checkpoint_type: record.metadata.checkpoint_type,
            trigger_reason: record.metadata.trigger_reason,
            label: record.metadata.label.clone(),
            phase: record.metadata.phase.clone(),
            progress: record.metadata.progress,
            is_diff: record.metadata.is_diff,
            compressed: record.compressed,
            size: record.size,
            parent_checkpoint_id: record.metadata.parent_checkpoint_id.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// Result of `create_checkpoint`
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointOutcome {
    Created(CheckpointSummary),
    /// An auto checkpoint arrived inside the minimum interval; nothing was written
    Throttled { retry_after: Duration },
}

impl CheckpointOutcome {
    pub fn created(&self) -> Option<&CheckpointSummary> {
        match self {
            CheckpointOutcome::Created(summary) => Some(summary),
            CheckpointOutcome::Throttled { .. } => None,
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, CheckpointOutcome::Throttled { .. })
    }
}

/// A reconstructed checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredCheckpoint {
    pub summary: CheckpointSummary,
    pub state: TaskState,
    /// Payloads folded to rebuild the state, 1 for a full checkpoint
    pub chain_length: usize,
}

/// Snapshot of manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub created: u64,
    pub restored: u64,
    pub throttled: u64,
    pub pruned: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    restored: AtomicU64,
    throttled: AtomicU64,
    pruned: AtomicU64,
    bytes_written: AtomicU64,
}

struct TaskCache {
    /// Unset when the entry was seeded by a restore
    last_checkpoint_at: Option<Instant>,
    checkpoint_id: String,
    latest_state: Arc<TaskState>,
}

#[derive(Debug, Clone, Copy)]
struct EncodeSettings {
    threshold: usize,
    level: i32,
}

pub struct CheckpointManager {
    store: Arc<DurableStore>,
    config: CheckpointConfig,
    cache: Mutex<HashMap<String, TaskCache>>,
    task_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: EventBus,
    counters: Counters,
}

impl CheckpointManager {
    pub fn new(store: Arc<DurableStore>, config: CheckpointConfig, events: EventBus) -> Self {
        Self {
            store,
            config,
            cache: Mutex::new(HashMap::new()),
            task_locks: Mutex::new(HashMap::new()),
            events,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            threshold: self.config.compression_threshold_bytes,
            level: self.config.compression_level,
        }
    }

    fn task_lock(&self, task_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.task_locks.lock();
        Arc::clone(locks.entry(task_id.to_string()).or_default())
    }

    // ------------------------------------------------------------------
    // Creating
    // ------------------------------------------------------------------

    /// Checkpoint `state` for `task_id`.
    ///
    /// `Auto` checkpoints inside the minimum interval come back as
    /// [`CheckpointOutcome::Throttled`] unless `force` is set.
    pub async fn create_checkpoint(
        &self,
        task_id: &str,
        state: &TaskState,
        opts: CheckpointOptions,
    ) -> Result<CheckpointOutcome, CheckpointError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        if opts.checkpoint_type == CheckpointType::Auto && !opts.force {
            if let Some(retry_after) = self.throttle_remaining(task_id) {
                self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id = %sanitize_for_log(task_id),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Checkpoint throttled"
                );
                return Ok(CheckpointOutcome::Throttled { retry_after });
            }
        }

        self.persist(task_id, state, opts)
            .await
            .map(CheckpointOutcome::Created)
    }

    /// Forced milestone checkpoint with a label
    pub async fn create_milestone(
        &self,
        task_id: &str,
        state: &TaskState,
        label: impl Into<String>,
    ) -> Result<CheckpointSummary, CheckpointError> {
        let opts = CheckpointOptions {
            checkpoint_type: CheckpointType::Milestone,
            label: Some(label.into()),
            force: true,
            ..CheckpointOptions::default()
        };
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;
        self.persist(task_id, state, opts).await
    }

    /// Forced checkpoint taken right after a task error
    pub async fn create_error_checkpoint(
        &self,
        task_id: &str,
        state: &TaskState,
        error: &str,
    ) -> Result<CheckpointSummary, CheckpointError> {
        let opts = CheckpointOptions {
            checkpoint_type: CheckpointType::Error,
            label: Some(format!("error: {}", error)),
            force: true,
            ..CheckpointOptions::default()
        };
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;
        self.persist(task_id, state, opts).await
    }

    /// Caller must hold the task lock.
    async fn persist(
        &self,
        task_id: &str,
        state: &TaskState,
        opts: CheckpointOptions,
    ) -> Result<CheckpointSummary, CheckpointError> {
        let allow_diff = opts.checkpoint_type == CheckpointType::Auto && self.config.enable_diffs;
        let base = if allow_diff {
            self.cache
                .lock()
                .get(task_id)
                .map(|c| (c.checkpoint_id.clone(), Arc::clone(&c.latest_state)))
        } else {
            None
        };

        let next = Arc::new(state.clone());
        let job = SaveJob {
            task_id: task_id.to_string(),
            checkpoint_id: Uuid::new_v4().to_string(),
            state: Arc::clone(&next),
            base,
            trigger: opts.resolved_trigger(),
            opts,
            expires_at: self
                .config
                .ttl_secs
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
            encode: self.encode_settings(),
        };

        let store = Arc::clone(&self.store);
        let (record, checkpoint_count) = blocking(move || job.run(&store)).await?;

        self.cache.lock().insert(
            task_id.to_string(),
            TaskCache {
                last_checkpoint_at: Some(Instant::now()),
                checkpoint_id: record.checkpoint_id.clone(),
                latest_state: next,
            },
        );
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(record.size, Ordering::Relaxed);

        info!(
            task_id = %sanitize_for_log(task_id),
            checkpoint_id = %record.checkpoint_id,
            version = record.version,
            is_diff = record.metadata.is_diff,
            compressed = record.compressed,
            size = record.size,
            "Checkpoint created"
        );
        self.events.emit(DurabilityEvent::CheckpointCreated {
            task_id: task_id.to_string(),
            checkpoint_id: record.checkpoint_id.clone(),
            version: record.version,
            trigger_reason: record.metadata.trigger_reason,
            is_diff: record.metadata.is_diff,
            size: record.size,
        });

        let max = self.config.max_checkpoints_per_task;
        if self.config.auto_prune && checkpoint_count > max as u64 {
            if let Err(e) = self.prune_locked(task_id, max).await {
                warn!(task_id = %sanitize_for_log(task_id), error = %e, "Auto-prune failed");
            }
        }

        Ok(CheckpointSummary::from(&record))
    }

    fn throttle_remaining(&self, task_id: &str) -> Option<Duration> {
        let min = self.config.min_interval();
        let last = self.cache.lock().get(task_id)?.last_checkpoint_at?;
        let elapsed = last.elapsed();
        (elapsed < min).then(|| min - elapsed)
    }

    /// Whether the agent loop should checkpoint now, and why.
    ///
    /// `Action` once `actions_since_last` reaches the action interval,
    /// `Interval` once the checkpoint interval has passed since this
    /// process last checkpointed the task (or it never has).
    pub fn needs_checkpoint(&self, task_id: &str, actions_since_last: usize) -> Option<TriggerReason> {
        let interval = self.config.action_interval;
        if interval > 0 && actions_since_last >= interval {
            return Some(TriggerReason::Action);
        }

        let last = self
            .cache
            .lock()
            .get(task_id)
            .and_then(|c| c.last_checkpoint_at);
        match last {
            Some(at) if at.elapsed() < self.config.checkpoint_interval() => None,
            _ => Some(TriggerReason::Interval),
        }
    }

    // ------------------------------------------------------------------
    // Restoring
    // ------------------------------------------------------------------

    /// Rebuild the state stored at `checkpoint_id`.
    pub async fn restore_checkpoint(&self, checkpoint_id: &str) -> Result<TaskState, CheckpointError> {
        self.restore_detailed(checkpoint_id)
            .await
            .map(|restored| restored.state)
    }

    /// Like [`restore_checkpoint`](Self::restore_checkpoint), keeping the
    /// checkpoint summary and chain length.
    pub async fn restore_detailed(
        &self,
        checkpoint_id: &str,
    ) -> Result<RestoredCheckpoint, CheckpointError> {
        let id = checkpoint_id.to_string();
        self.restore_with(move |store| Ok(store.get_state(&id)?))
            .await?
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))
    }

    /// Rebuild the newest non-expired checkpoint of a task.
    pub async fn restore_latest(
        &self,
        task_id: &str,
    ) -> Result<Option<RestoredCheckpoint>, CheckpointError> {
        let id = task_id.to_string();
        self.restore_with(move |store| Ok(store.get_latest(&id, false)?))
            .await
    }

    /// Rebuild the newest checkpoint created at or before `ts`.
    pub async fn restore_at(
        &self,
        task_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<Option<RestoredCheckpoint>, CheckpointError> {
        let id = task_id.to_string();
        self.restore_with(move |store| Ok(store.get_by_timestamp(&id, ts)?))
            .await
    }

    async fn restore_with<F>(&self, find: F) -> Result<Option<RestoredCheckpoint>, CheckpointError>
    where
        F: FnOnce(&DurableStore) -> Result<Option<StateRecord>, CheckpointError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let found = blocking(move || {
            let Some(target) = find(&store)? else {
                return Ok(None);
            };
            let latest = store
                .get_task(&target.task_id)?
                .and_then(|t| t.latest_checkpoint_id);
            let (state, chain_length) = reconstruct(&store, &target)?;
            Ok(Some((target, state, chain_length, latest)))
        })
        .await?;

        let Some((record, state, chain_length, latest)) = found else {
            return Ok(None);
        };

        if latest.as_deref() == Some(record.checkpoint_id.as_str()) {
            self.seed_cache(&record, &state);
        }

        self.counters.restored.fetch_add(1, Ordering::Relaxed);
        info!(
            task_id = %sanitize_for_log(&record.task_id),
            checkpoint_id = %record.checkpoint_id,
            chain_length,
            "Checkpoint restored"
        );
        self.events.emit(DurabilityEvent::CheckpointRestored {
            task_id: record.task_id.clone(),
            checkpoint_id: record.checkpoint_id.clone(),
            chain_length,
        });

        Ok(Some(RestoredCheckpoint {
            summary: CheckpointSummary::from(&record),
            state,
            chain_length,
        }))
    }

    /// Let the next auto checkpoint diff against a restored latest state.
    fn seed_cache(&self, record: &StateRecord, state: &TaskState) {
        let mut cache = self.cache.lock();
        let entry = cache
            .entry(record.task_id.clone())
            .or_insert_with(|| TaskCache {
                last_checkpoint_at: None,
                checkpoint_id: record.checkpoint_id.clone(),
                latest_state: Arc::new(state.clone()),
            });
        if entry.checkpoint_id != record.checkpoint_id {
            entry.checkpoint_id = record.checkpoint_id.clone();
            entry.latest_state = Arc::new(state.clone());
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn latest_checkpoint(
        &self,
        task_id: &str,
    ) -> Result<Option<CheckpointSummary>, CheckpointError> {
        let store = Arc::clone(&self.store);
        let id = task_id.to_string();
        let record = blocking(move || Ok(store.get_latest(&id, false)?)).await?;
        Ok(record.as_ref().map(CheckpointSummary::from))
    }

    pub async fn list_checkpoints(
        &self,
        task_id: &str,
        opts: ListOptions,
    ) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let store = Arc::clone(&self.store);
        let id = task_id.to_string();
        let records = blocking(move || Ok(store.list_checkpoints(&id, &opts)?)).await?;
        Ok(records.iter().map(CheckpointSummary::from).collect())
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>, CheckpointError> {
        let store = Arc::clone(&self.store);
        blocking(move || Ok(store.list_tasks(status)?)).await
    }

    pub async fn verify(&self, checkpoint_id: &str) -> Result<IntegrityCheck, CheckpointError> {
        let store = Arc::clone(&self.store);
        let id = checkpoint_id.to_string();
        blocking(move || Ok(store.verify_integrity(&id)?)).await
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            created: self.counters.created.load(Ordering::Relaxed),
            restored: self.counters.restored.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            pruned: self.counters.pruned.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle and cleanup
    // ------------------------------------------------------------------

    /// Mark a task completed so the startup scan ignores it.
    pub async fn complete_task(&self, task_id: &str) -> Result<bool, CheckpointError> {
        let store = Arc::clone(&self.store);
        let id = task_id.to_string();
        let updated =
            blocking(move || Ok(store.update_task_status(&id, TaskStatus::Completed)?)).await?;
        self.cache.lock().remove(task_id);
        if updated {
            info!(task_id = %sanitize_for_log(task_id), "Task marked completed");
        }
        Ok(updated)
    }

    /// Remove every checkpoint of a task. Returns how many were deleted.
    pub async fn delete_task(&self, task_id: &str) -> Result<usize, CheckpointError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let store = Arc::clone(&self.store);
        let id = task_id.to_string();
        let deleted = blocking(move || Ok(store.delete_task(&id)?)).await?;
        self.cache.lock().remove(task_id);
        Ok(deleted)
    }

    /// Delete one checkpoint. Diffs chained after it can no longer be restored.
    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool, CheckpointError> {
        let store = Arc::clone(&self.store);
        let id = checkpoint_id.to_string();
        let deleted = blocking(move || Ok(store.delete_state(&id)?)).await?;
        if deleted {
            self.cache
                .lock()
                .retain(|_, entry| entry.checkpoint_id != checkpoint_id);
        }
        Ok(deleted)
    }

    /// Keep the `keep` newest checkpoints of a task.
    ///
    /// When the oldest survivor is a diff it is rewritten as a full state
    /// first, so the remaining chain stays restorable.
    pub async fn prune(&self, task_id: &str, keep: usize) -> Result<PruneReport, CheckpointError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;
        self.prune_locked(task_id, keep).await
    }

    async fn prune_locked(&self, task_id: &str, keep: usize) -> Result<PruneReport, CheckpointError> {
        let store = Arc::clone(&self.store);
        let id = task_id.to_string();
        let encode = self.encode_settings();

        let report = blocking(move || {
            if keep > 0 {
                let opts = ListOptions {
                    limit: keep,
                    include_expired: true,
                    ..ListOptions::default()
                };
                let survivors = store.list_checkpoints(&id, &opts)?;
                if let Some(oldest) = survivors.last().filter(|_| survivors.len() == keep) {
                    materialize_if_diff(&store, oldest, encode)?;
                }
            }
            Ok(store.prune_checkpoints(&id, keep)?)
        })
        .await?;

        if keep == 0 {
            self.cache.lock().remove(task_id);
        }
        if report.deleted > 0 {
            self.counters
                .pruned
                .fetch_add(report.deleted as u64, Ordering::Relaxed);
            self.events.emit(DurabilityEvent::CheckpointsPruned {
                task_id: task_id.to_string(),
                deleted: report.deleted,
            });
        }
        Ok(report)
    }

    /// Delete expired checkpoints across all tasks.
    ///
    /// A live diff whose parent is about to expire is materialized first, so
    /// every chain that survives the sweep still starts at a full state.
    pub async fn sweep_expired(&self) -> Result<usize, CheckpointError> {
        let store = Arc::clone(&self.store);
        let encode = self.encode_settings();

        blocking(move || {
            let now = Utc::now();
            let everything = ListOptions {
                limit: i64::MAX as usize,
                order_direction: OrderDirection::Asc,
                include_expired: true,
                ..ListOptions::default()
            };
            for task in store.list_tasks(None)? {
                let rows = store.list_checkpoints(&task.id, &everything)?;
                let expired: HashSet<&str> = rows
                    .iter()
                    .filter(|r| r.is_expired(now))
                    .map(|r| r.checkpoint_id.as_str())
                    .collect();
                if expired.is_empty() {
                    continue;
                }

                for record in rows.iter().filter(|r| !r.is_expired(now)) {
                    let parent_expiring = record
                        .metadata
                        .parent_checkpoint_id
                        .as_deref()
                        .is_some_and(|parent| expired.contains(parent));
                    if !parent_expiring {
                        continue;
                    }
                    if let Err(e) = materialize_if_diff(&store, record, encode) {
                        warn!(
                            task_id = %sanitize_for_log(&task.id),
                            checkpoint_id = %record.checkpoint_id,
                            error = %e,
                            "Could not materialize checkpoint before expiry sweep"
                        );
                    }
                }
            }
            Ok(store.delete_expired(now)?)
        })
        .await
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// store is closed or the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match manager.sweep_expired().await {
                    Ok(0) => {}
                    Ok(deleted) => debug!(deleted, "Expired checkpoint sweep"),
                    Err(CheckpointError::Store(StoreError::Closed)) => break,
                    Err(e) => warn!(error = %e, "Expired checkpoint sweep failed"),
                }
            }
            debug!("Checkpoint sweeper stopped");
        })
    }
}

/// Work item for one checkpoint write, run on the blocking pool
struct SaveJob {
    task_id: String,
    checkpoint_id: String,
    state: Arc<TaskState>,
    base: Option<(String, Arc<TaskState>)>,
    trigger: TriggerReason,
    opts: CheckpointOptions,
    expires_at: Option<DateTime<Utc>>,
    encode: EncodeSettings,
}

impl SaveJob {
    fn run(self, store: &DurableStore) -> Result<(StateRecord, u64), CheckpointError> {
        let parent = store
            .get_task(&self.task_id)?
            .and_then(|t| t.latest_checkpoint_id);

        // Only diff against the cached state when it is still the task's latest.
        let diff = match (&parent, &self.base) {
            (Some(parent), Some((base_id, base))) if parent == base_id => {
                diff::compute_diff(base, &self.state)
            }
            _ => None,
        };
        let payload = match diff {
            Some(diff) => StatePayload::Diff(diff),
            None => StatePayload::Full(self.state.as_ref().clone()),
        };

        let encoded = codec::encode(&payload, self.encode.threshold, self.encode.level)?;
        let metadata = CheckpointMetadata {
            trigger_reason: self.trigger,
            checkpoint_type: self.opts.checkpoint_type,
            label: self.opts.label,
            action_type: self.opts.action_type,
            action_index: self.opts.action_index,
            phase: self.state.phase.clone(),
            progress: self.state.progress,
            is_diff: payload.is_diff(),
            parent_checkpoint_id: parent,
        };

        let record = store.save_state(
            &self.task_id,
            &self.checkpoint_id,
            &encoded.bytes,
            &metadata,
            &SaveOptions {
                compressed: encoded.compressed,
                expires_at: self.expires_at,
            },
        )?;
        let count = store
            .get_task(&self.task_id)?
            .map(|t| t.checkpoint_count)
            .unwrap_or(record.version);
        Ok((record, count))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CheckpointError>
where
    F: FnOnce() -> Result<T, CheckpointError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CheckpointError::Join(e.to_string()))?
}

/// Verify a record's hash and decode its payload.
fn load_payload(record: &StateRecord) -> Result<StatePayload, CheckpointError> {
    let actual = hash_state(&record.state);
    if actual != record.state_hash {
        return Err(CheckpointError::IntegrityMismatch {
            checkpoint_id: record.checkpoint_id.clone(),
            expected: record.state_hash.clone(),
            actual,
        });
    }
    codec::decode(&record.checkpoint_id, &record.state, record.compressed)
}

/// Rebuild the state of `target`, returning it with the number of payloads
/// folded.
///
/// Walks the chain back from the target to the nearest full payload, then
/// applies forward. Any missing link is a [`CheckpointError::BrokenChain`].
fn reconstruct(
    store: &DurableStore,
    target: &StateRecord,
) -> Result<(TaskState, usize), CheckpointError> {
    let target_payload = load_payload(target)?;
    let mut pending = vec![(target.metadata.parent_checkpoint_id.clone(), target_payload)];

    if pending[0].1.is_diff() {
        let chain = store.get_checkpoint_chain(&target.checkpoint_id)?;
        for id in chain.iter().rev().skip(1) {
            let record = store
                .get_state(id)?
                .ok_or_else(|| CheckpointError::BrokenChain {
                    checkpoint_id: target.checkpoint_id.clone(),
                    missing: id.clone(),
                })?;
            let payload = load_payload(&record)?;
            let is_full = !payload.is_diff();
            pending.push((record.metadata.parent_checkpoint_id.clone(), payload));
            if is_full {
                break;
            }
        }
    }

    let chain_length = pending.len();
    let mut state = None;
    for (parent, payload) in pending.into_iter().rev() {
        state = Some(diff::apply(state, payload).map_err(|_| {
            CheckpointError::BrokenChain {
                checkpoint_id: target.checkpoint_id.clone(),
                missing: parent.unwrap_or_else(|| "<no base>".to_string()),
            }
        })?);
    }

    state
        .map(|state| (state, chain_length))
        .ok_or_else(|| CheckpointError::NotFound(target.checkpoint_id.clone()))
}

/// Rewrite a diff checkpoint as a full one. Returns whether it changed.
fn materialize_if_diff(
    store: &DurableStore,
    record: &StateRecord,
    encode: EncodeSettings,
) -> Result<bool, CheckpointError> {
    if !record.metadata.is_diff {
        return Ok(false);
    }

    let (state, _) = reconstruct(store, record)?;
    let encoded = codec::encode(&StatePayload::Full(state), encode.threshold, encode.level)?;
    let mut metadata = record.metadata.clone();
    metadata.is_diff = false;
    store.materialize_state(&record.checkpoint_id, &encoded.bytes, encoded.compressed, &metadata)?;
    debug!(checkpoint_id = %record.checkpoint_id, "Materialized diff checkpoint");
    Ok(true)
}
