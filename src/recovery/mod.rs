//! Recovery Coordinator
//!
//! Detects crashed tasks through missed heartbeats or a startup scan, queues
//! them for recovery, and runs one of four strategies:
//! - `resume`: restore the latest checkpoint and re-run the executor
//! - `restart`: drop all checkpoints and re-run from a zero state
//! - `skip`: mark the task completed without running it
//! - `manual`: wait for an operator to resolve or dismiss it
//!
//! Record status moves `pending -> recovering -> {recovered, restarted,
//! skipped, failed}`. Only one recovery per task runs at a time; the
//! check-and-set on the status field happens under the queue lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointManager, CheckpointOptions, CheckpointSummary, CheckpointType};
use crate::config::RecoveryConfig;
use crate::errors::RecoveryError;
use crate::events::{DurabilityEvent, EventBus};
use crate::state::TaskState;
use crate::store::{TaskStatus, TriggerReason};
use crate::telemetry::{sanitize_for_log, track_recovery};

pub mod heartbeat;

pub use heartbeat::{HeartbeatMonitor, HeartbeatStatus, HeartbeatTransition, TaskHeartbeat};

/// How a crashed task is continued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    #[default]
    Resume,
    Restart,
    Skip,
    Manual,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Resume => "resume",
            RecoveryStrategy::Restart => "restart",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    Recovering,
    Recovered,
    Failed,
    Skipped,
    Restarted,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStatus::Pending => "pending",
            RecoveryStatus::Recovering => "recovering",
            RecoveryStatus::Recovered => "recovered",
            RecoveryStatus::Failed => "failed",
            RecoveryStatus::Skipped => "skipped",
            RecoveryStatus::Restarted => "restarted",
        }
    }

    /// Terminal success states
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            RecoveryStatus::Recovered | RecoveryStatus::Skipped | RecoveryStatus::Restarted
        )
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue entry for one crashed task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    pub task_id: String,
    pub last_checkpoint_id: String,
    pub crashed_at: DateTime<Utc>,
    pub recovery_status: RecoveryStatus,
    pub recovery_attempts: u32,
    pub max_attempts: u32,
    pub strategy: RecoveryStrategy,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RecoveryRecord {
    fn touch(&mut self, status: RecoveryStatus) {
        self.recovery_status = status;
        self.updated_at = Utc::now();
    }
}

/// Callback that continues a task from a restored state.
///
/// Supplied by the agent loop; this is the only way restored state re-enters
/// application logic.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task_id: &str, state: TaskState) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`TaskExecutor`]
pub struct FnExecutor<F>(F);

pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(String, TaskState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnExecutor(f)
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(String, TaskState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(&self, task_id: &str, state: TaskState) -> anyhow::Result<()> {
        (self.0)(task_id.to_string(), state).await
    }
}

/// What `shutdown` left behind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub abandoned: Vec<String>,
    pub store_closed: bool,
}

#[derive(Clone)]
pub struct RecoveryCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    manager: Arc<CheckpointManager>,
    executor: Arc<dyn TaskExecutor>,
    config: RecoveryConfig,
    heartbeats: HeartbeatMonitor,
    queue: Mutex<HashMap<String, RecoveryRecord>>,
    events: EventBus,
    ticker: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl RecoveryCoordinator {
    pub fn new(
        manager: Arc<CheckpointManager>,
        executor: Arc<dyn TaskExecutor>,
        config: RecoveryConfig,
    ) -> Result<Self, RecoveryError> {
        config.validate().map_err(RecoveryError::InvalidConfig)?;
        let events = manager.events().clone();
        let heartbeats = HeartbeatMonitor::new(config.heartbeat_interval(), config.dead_threshold)?;
        Ok(Self {
            inner: Arc::new(Inner {
                manager,
                executor,
                config,
                heartbeats,
                queue: Mutex::new(HashMap::new()),
                events,
                ticker: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn manager(&self) -> &Arc<CheckpointManager> {
        &self.inner.manager
    }

    /// Scan the store for tasks that were active when the process stopped,
    /// queue each one that has a checkpoint, and start the heartbeat ticker.
    /// Returns the number of records queued.
    pub async fn initialize(&self) -> Result<usize, RecoveryError> {
        let inner = &self.inner;
        let active = inner.manager.list_tasks(Some(TaskStatus::Active)).await?;

        let mut queued = Vec::new();
        for task in active {
            let Some(latest) = inner.manager.latest_checkpoint(&task.id).await? else {
                debug!(task_id = %sanitize_for_log(&task.id), "Active task has no live checkpoint");
                continue;
            };
            if inner.enqueue(&task.id, &latest.checkpoint_id) {
                queued.push(task.id);
            }
        }

        info!(queued = queued.len(), "Startup recovery scan finished");
        self.start_ticker();

        if inner.config.auto_recover {
            for task_id in &queued {
                inner.spawn_recovery(task_id);
            }
        }
        Ok(queued.len())
    }

    fn start_ticker(&self) {
        let mut slot = self.inner.ticker.lock();
        if slot.is_some() || self.inner.shutting_down.load(Ordering::Acquire) {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.heartbeats.interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                for transition in inner.heartbeats.evaluate() {
                    inner.on_transition(transition, true).await;
                }
            }
        }));
    }

    // ------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------

    /// Record a heartbeat for a running task. Registers it on first call.
    pub fn register_heartbeat(&self, task_id: &str) {
        self.inner.heartbeats.beat(task_id);
    }

    pub fn unregister_heartbeat(&self, task_id: &str) -> bool {
        self.inner.heartbeats.unregister(task_id)
    }

    pub fn heartbeat_status(&self, task_id: &str) -> Option<TaskHeartbeat> {
        self.inner.heartbeats.status(task_id)
    }

    pub fn heartbeats(&self) -> Vec<TaskHeartbeat> {
        self.inner.heartbeats.tracked()
    }

    /// Evaluate heartbeats once and handle any crash inline.
    pub async fn check_heartbeats(&self) -> Vec<HeartbeatTransition> {
        let transitions = self.inner.heartbeats.evaluate();
        for transition in &transitions {
            self.inner.on_transition(transition.clone(), false).await;
        }
        transitions
    }

    // ------------------------------------------------------------------
    // Crash handling
    // ------------------------------------------------------------------

    /// Queue a crashed task for recovery.
    ///
    /// Fails with [`RecoveryError::Unrecoverable`] when the task has no live
    /// checkpoint.
    pub async fn handle_crash(&self, task_id: &str) -> Result<RecoveryRecord, RecoveryError> {
        self.inner.handle_crash(task_id).await
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Run the configured strategy for a queued task and return the new
    /// record status.
    pub async fn recover_task(&self, task_id: &str) -> Result<RecoveryStatus, RecoveryError> {
        self.inner.recover_task(task_id).await
    }

    /// Recover every pending non-manual record concurrently.
    pub async fn recover_all_pending(&self) -> Vec<(String, Result<RecoveryStatus, RecoveryError>)> {
        let pending: Vec<String> = {
            let queue = self.inner.queue.lock();
            let mut ids: Vec<_> = queue
                .values()
                .filter(|r| {
                    r.recovery_status == RecoveryStatus::Pending
                        && r.strategy != RecoveryStrategy::Manual
                })
                .map(|r| r.task_id.clone())
                .collect();
            ids.sort();
            ids
        };

        let mut set = JoinSet::new();
        for task_id in pending {
            let inner = Arc::clone(&self.inner);
            set.spawn(async move {
                let result = inner.recover_task(&task_id).await;
                (task_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => error!(error = %e, "Recovery task panicked"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Resolve a pending record with an operator-supplied state.
    ///
    /// Writes a forced manual checkpoint and marks the record recovered.
    pub async fn manual_resolve(
        &self,
        task_id: &str,
        state: TaskState,
    ) -> Result<CheckpointSummary, RecoveryError> {
        let inner = &self.inner;
        let previous = inner.claim(task_id)?;

        let opts = CheckpointOptions {
            checkpoint_type: CheckpointType::Manual,
            label: Some("manual resolve".to_string()),
            trigger_reason: Some(TriggerReason::Manual),
            force: true,
            ..CheckpointOptions::default()
        };

        let created = inner
            .manager
            .create_checkpoint(task_id, &state, opts)
            .await
            .map_err(RecoveryError::from)
            .and_then(|outcome| {
                outcome
                    .created()
                    .cloned()
                    .ok_or_else(|| RecoveryError::Executor {
                        task_id: task_id.to_string(),
                        message: "manual checkpoint was throttled".to_string(),
                    })
            });

        match created {
            Ok(summary) => {
                inner.resolve(task_id, RecoveryStatus::Recovered, RecoveryStrategy::Manual);
                Ok(summary)
            }
            Err(e) => {
                inner.release(task_id, previous, &e);
                Err(e)
            }
        }
    }

    /// Close a pending record without running the task.
    ///
    /// The task is also marked completed in the store so the next startup
    /// scan leaves it alone.
    pub async fn dismiss_recovery(&self, task_id: &str) -> Result<(), RecoveryError> {
        let inner = &self.inner;
        let previous = inner.claim(task_id)?;

        match inner.manager.complete_task(task_id).await {
            Ok(_) => {
                inner.resolve(task_id, RecoveryStatus::Skipped, RecoveryStrategy::Manual);
                info!(task_id = %sanitize_for_log(task_id), "Recovery dismissed");
                Ok(())
            }
            Err(e) => {
                let e = RecoveryError::from(e);
                inner.release(task_id, previous, &e);
                Err(e)
            }
        }
    }

    /// Change a record's strategy. A failed record is re-armed: it goes back
    /// to pending with its attempt counter reset.
    pub fn set_strategy(
        &self,
        task_id: &str,
        strategy: RecoveryStrategy,
    ) -> Result<RecoveryRecord, RecoveryError> {
        let mut queue = self.inner.queue.lock();
        let record = queue
            .get_mut(task_id)
            .ok_or_else(|| RecoveryError::NotQueued(task_id.to_string()))?;

        match record.recovery_status {
            RecoveryStatus::Recovering => {
                return Err(RecoveryError::AlreadyRecovering(task_id.to_string()))
            }
            status if status.is_resolved() => {
                return Err(RecoveryError::AlreadyResolved {
                    task_id: task_id.to_string(),
                    status: status.to_string(),
                })
            }
            _ => {}
        }

        let changed = record.strategy != strategy;
        record.strategy = strategy;
        if changed && record.recovery_status == RecoveryStatus::Failed {
            record.recovery_attempts = 0;
            record.last_error = None;
            record.touch(RecoveryStatus::Pending);
            info!(task_id = %sanitize_for_log(task_id), %strategy, "Failed recovery re-armed");
        } else {
            record.updated_at = Utc::now();
        }
        Ok(record.clone())
    }

    pub fn recovery_record(&self, task_id: &str) -> Option<RecoveryRecord> {
        self.inner.queue.lock().get(task_id).cloned()
    }

    /// All records, oldest crash first
    pub fn recovery_queue(&self) -> Vec<RecoveryRecord> {
        let mut records: Vec<_> = self.inner.queue.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            a.crashed_at
                .cmp(&b.crashed_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        records
    }

    /// Drop resolved records from the queue. Returns how many were removed.
    pub fn clear_resolved(&self) -> usize {
        let mut queue = self.inner.queue.lock();
        let before = queue.len();
        queue.retain(|_, r| !r.recovery_status.is_resolved());
        before - queue.len()
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop the ticker, wait up to `timeout` for running recoveries, report
    /// the rest as abandoned, and close the store.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::Release);
        if let Some(handle) = inner.ticker.lock().take() {
            handle.abort();
        }

        let poll = Duration::from_millis(inner.config.shutdown_poll_ms.max(1));
        let deadline = tokio::time::Instant::now() + timeout;
        while inner.recovering_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(poll).await;
        }

        let abandoned: Vec<String> = {
            let queue = inner.queue.lock();
            let mut ids: Vec<_> = queue
                .values()
                .filter(|r| r.recovery_status == RecoveryStatus::Recovering)
                .map(|r| r.task_id.clone())
                .collect();
            ids.sort();
            ids
        };
        for task_id in &abandoned {
            warn!(task_id = %sanitize_for_log(task_id), "Recovery abandoned at shutdown");
            inner.events.emit(DurabilityEvent::RecoveryAbandoned {
                task_id: task_id.clone(),
            });
        }

        let store_closed = match inner.manager.store().close() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to close checkpoint store");
                false
            }
        };

        info!(abandoned = abandoned.len(), "Recovery coordinator stopped");
        ShutdownReport {
            abandoned,
            store_closed,
        }
    }
}

impl Inner {
    async fn on_transition(self: &Arc<Self>, transition: HeartbeatTransition, spawn: bool) {
        match transition {
            HeartbeatTransition::Stale {
                task_id,
                missed_beats,
            } => {
                warn!(task_id = %sanitize_for_log(&task_id), missed_beats, "Heartbeat missed");
                self.events.emit(DurabilityEvent::HeartbeatMissed {
                    task_id,
                    missed_beats,
                });
            }
            HeartbeatTransition::Dead {
                task_id,
                missed_beats,
            } => {
                error!(task_id = %sanitize_for_log(&task_id), missed_beats, "Task presumed crashed");
                if spawn {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        let _ = inner.handle_crash(&task_id).await;
                    });
                } else {
                    let _ = self.handle_crash(&task_id).await;
                }
            }
        }
    }

    async fn handle_crash(self: &Arc<Self>, task_id: &str) -> Result<RecoveryRecord, RecoveryError> {
        self.heartbeats.unregister(task_id);

        let latest = match self.manager.latest_checkpoint(task_id).await {
            Ok(latest) => latest,
            Err(e) => {
                error!(task_id = %sanitize_for_log(task_id), error = %e, "Crash lookup failed");
                return Err(e.into());
            }
        };

        let Some(latest) = latest else {
            let err = RecoveryError::Unrecoverable(task_id.to_string());
            error!(task_id = %sanitize_for_log(task_id), "Crashed task has no checkpoint");
            self.events.emit(DurabilityEvent::UnrecoverableCrash {
                task_id: task_id.to_string(),
                reason: err.to_string(),
            });
            return Err(err);
        };

        let queued = self.enqueue(task_id, &latest.checkpoint_id);
        self.events.emit(DurabilityEvent::TaskCrashed {
            task_id: task_id.to_string(),
            last_checkpoint_id: latest.checkpoint_id.clone(),
        });
        if queued && self.config.auto_recover {
            self.spawn_recovery(task_id);
        }

        self.queue
            .lock()
            .get(task_id)
            .cloned()
            .ok_or_else(|| RecoveryError::NotQueued(task_id.to_string()))
    }

    /// Insert or refresh a pending record. Returns false when the task is
    /// already being recovered or has failed permanently; a failed record only
    /// picks up the new crash details and stays failed until its strategy
    /// changes.
    fn enqueue(&self, task_id: &str, checkpoint_id: &str) -> bool {
        let now = Utc::now();
        let mut queue = self.queue.lock();

        if let Some(existing) = queue.get_mut(task_id) {
            match existing.recovery_status {
                RecoveryStatus::Recovering => return false,
                RecoveryStatus::Pending | RecoveryStatus::Failed => {
                    existing.last_checkpoint_id = checkpoint_id.to_string();
                    existing.crashed_at = now;
                    existing.updated_at = now;
                    return existing.recovery_status == RecoveryStatus::Pending;
                }
                _ => {}
            }
        }

        queue.insert(
            task_id.to_string(),
            RecoveryRecord {
                task_id: task_id.to_string(),
                last_checkpoint_id: checkpoint_id.to_string(),
                crashed_at: now,
                recovery_status: RecoveryStatus::Pending,
                recovery_attempts: 0,
                max_attempts: self.config.max_attempts,
                strategy: self.config.default_strategy,
                last_error: None,
                updated_at: now,
            },
        );
        info!(task_id = %sanitize_for_log(task_id), checkpoint_id, "Task queued for recovery");
        true
    }

    fn spawn_recovery(self: &Arc<Self>, task_id: &str) {
        let inner = Arc::clone(self);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = inner.recover_task(&task_id).await {
                debug!(task_id = %sanitize_for_log(&task_id), error = %e, "Automatic recovery did not run");
            }
        });
    }

    /// Move a pending or failed record to recovering for an operator action.
    /// Returns the status to restore if the action fails.
    fn claim(&self, task_id: &str) -> Result<RecoveryStatus, RecoveryError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RecoveryError::ShuttingDown);
        }
        let mut queue = self.queue.lock();
        let record = queue
            .get_mut(task_id)
            .ok_or_else(|| RecoveryError::NotQueued(task_id.to_string()))?;

        let previous = record.recovery_status;
        match previous {
            RecoveryStatus::Pending | RecoveryStatus::Failed => {}
            RecoveryStatus::Recovering => {
                return Err(RecoveryError::AlreadyRecovering(task_id.to_string()))
            }
            status => {
                return Err(RecoveryError::AlreadyResolved {
                    task_id: task_id.to_string(),
                    status: status.to_string(),
                })
            }
        }
        record.touch(RecoveryStatus::Recovering);
        Ok(previous)
    }

    fn release(&self, task_id: &str, previous: RecoveryStatus, error: &RecoveryError) {
        if let Some(record) = self.queue.lock().get_mut(task_id) {
            record.last_error = Some(error.to_string());
            record.touch(previous);
        }
    }

    async fn recover_task(self: &Arc<Self>, task_id: &str) -> Result<RecoveryStatus, RecoveryError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RecoveryError::ShuttingDown);
        }

        let (strategy, attempt) = {
            let mut queue = self.queue.lock();
            let record = queue
                .get_mut(task_id)
                .ok_or_else(|| RecoveryError::NotQueued(task_id.to_string()))?;

            match record.recovery_status {
                RecoveryStatus::Recovering => {
                    return Err(RecoveryError::AlreadyRecovering(task_id.to_string()))
                }
                status if status.is_resolved() => {
                    return Err(RecoveryError::AlreadyResolved {
                        task_id: task_id.to_string(),
                        status: status.to_string(),
                    })
                }
                _ => {}
            }

            if record.recovery_attempts >= record.max_attempts {
                record.touch(RecoveryStatus::Failed);
                return Err(RecoveryError::MaxAttemptsExceeded {
                    task_id: task_id.to_string(),
                    attempts: record.recovery_attempts,
                });
            }

            if record.strategy == RecoveryStrategy::Manual {
                debug!(task_id = %sanitize_for_log(task_id), "Awaiting operator resolution");
                return Ok(RecoveryStatus::Pending);
            }

            record.recovery_attempts += 1;
            record.touch(RecoveryStatus::Recovering);
            (record.strategy, record.recovery_attempts)
        };

        self.events.emit(DurabilityEvent::RecoveryStarted {
            task_id: task_id.to_string(),
            strategy,
            attempt,
        });

        let result = track_recovery(task_id, strategy.as_str(), || {
            self.run_strategy(task_id, strategy)
        })
        .await;
        self.finish(task_id, result, strategy)
    }

    async fn run_strategy(
        &self,
        task_id: &str,
        strategy: RecoveryStrategy,
    ) -> Result<RecoveryStatus, RecoveryError> {
        match strategy {
            RecoveryStrategy::Resume => {
                let restored = self
                    .manager
                    .restore_latest(task_id)
                    .await?
                    .ok_or_else(|| RecoveryError::Unrecoverable(task_id.to_string()))?;
                self.execute(task_id, restored.state).await?;
                Ok(RecoveryStatus::Recovered)
            }
            RecoveryStrategy::Restart => {
                let deleted = self.manager.delete_task(task_id).await?;
                debug!(task_id = %sanitize_for_log(task_id), deleted, "Cleared checkpoints for restart");

                let state = TaskState::default();
                let opts = CheckpointOptions {
                    checkpoint_type: CheckpointType::Manual,
                    label: Some("restart".to_string()),
                    trigger_reason: Some(TriggerReason::Manual),
                    force: true,
                    ..CheckpointOptions::default()
                };
                self.manager.create_checkpoint(task_id, &state, opts).await?;
                self.execute(task_id, state).await?;
                Ok(RecoveryStatus::Restarted)
            }
            RecoveryStrategy::Skip => {
                self.manager.complete_task(task_id).await?;
                Ok(RecoveryStatus::Skipped)
            }
            RecoveryStrategy::Manual => Ok(RecoveryStatus::Pending),
        }
    }

    async fn execute(&self, task_id: &str, state: TaskState) -> Result<(), RecoveryError> {
        self.executor
            .execute(task_id, state)
            .await
            .map_err(|e| RecoveryError::Executor {
                task_id: task_id.to_string(),
                message: format!("{:#}", e),
            })
    }

    /// Record the outcome of an attempt. Failures go back to pending until
    /// attempts are exhausted.
    fn finish(
        &self,
        task_id: &str,
        result: Result<RecoveryStatus, RecoveryError>,
        strategy: RecoveryStrategy,
    ) -> Result<RecoveryStatus, RecoveryError> {
        let mut queue = self.queue.lock();
        let Some(record) = queue.get_mut(task_id) else {
            return result;
        };

        match result {
            Ok(status) => {
                Self::mark_resolved(&self.events, record, status, strategy);
                Ok(status)
            }
            Err(e) => {
                let permanent = record.recovery_attempts >= record.max_attempts;
                record.last_error = Some(e.to_string());
                record.touch(if permanent {
                    RecoveryStatus::Failed
                } else {
                    RecoveryStatus::Pending
                });
                if permanent {
                    error!(
                        task_id = %sanitize_for_log(task_id),
                        attempts = record.recovery_attempts,
                        error = %e,
                        "Recovery failed permanently"
                    );
                }
                self.events.emit(DurabilityEvent::RecoveryFailed {
                    task_id: task_id.to_string(),
                    error: e.to_string(),
                    attempts: record.recovery_attempts,
                    permanent,
                });
                Err(e)
            }
        }
    }

    /// Operator close of a claimed record.
    fn resolve(&self, task_id: &str, status: RecoveryStatus, strategy: RecoveryStrategy) {
        let mut queue = self.queue.lock();
        if let Some(record) = queue.get_mut(task_id) {
            Self::mark_resolved(&self.events, record, status, strategy);
        }
    }

    fn mark_resolved(
        events: &EventBus,
        record: &mut RecoveryRecord,
        status: RecoveryStatus,
        strategy: RecoveryStrategy,
    ) {
        record.last_error = None;
        record.touch(status);
        info!(task_id = %sanitize_for_log(&record.task_id), %strategy, %status, "Recovery finished");
        events.emit(DurabilityEvent::RecoveryCompleted {
            task_id: record.task_id.clone(),
            strategy,
        });
    }

    fn recovering_count(&self) -> usize {
        self.queue
            .lock()
            .values()
            .filter(|r| r.recovery_status == RecoveryStatus::Recovering)
            .count()
    }
}
