//! Steadfast - durable checkpoints and crash recovery for agent tasks
//!
//! Long-running agent tasks write snapshots of their state as they go. When
//! a process dies, a task's heartbeat stops, or the host restarts, the
//! recovery coordinator finds the unfinished work and continues it from the
//! newest intact checkpoint.
//!
//! - **Store**: SQLite persistence with versioned, hash-verified rows
//! - **Checkpoints**: throttling, incremental diffs, zstd compression, pruning
//! - **Recovery**: heartbeat monitoring, startup scan, resume/restart/skip/manual
//!
//! # Quick Start
//!
//! ```ignore
//! use steadfast::{executor_fn, Config, Steadfast, TaskState};
//! use std::sync::Arc;
//!
//! let executor = Arc::new(executor_fn(|task_id: String, state: TaskState| async move {
//!     run_agent(task_id, state).await
//! }));
//! let runtime = Steadfast::open(Config::load(None)?, executor)?;
//! runtime.start().await?;
//! ```

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod recovery;
pub mod runtime;
pub mod state;
pub mod store;
pub mod telemetry;

pub use checkpoint::{
    CheckpointManager, CheckpointOptions, CheckpointOutcome, CheckpointSummary,
    RestoredCheckpoint,
};
pub use config::Config;
pub use errors::{CheckpointError, RecoveryError, SteadfastError, StoreError};
pub use events::{DurabilityEvent, EventBus};
pub use recovery::{
    executor_fn, RecoveryCoordinator, RecoveryRecord, RecoveryStatus, RecoveryStrategy,
    TaskExecutor,
};
pub use runtime::Steadfast;
pub use state::TaskState;
pub use store::{DurableStore, TriggerReason};
