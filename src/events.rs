//! Durability events
//!
//! Typed broadcast bus shared by the checkpoint manager and the recovery
//! coordinator. Subscribers that fall behind lose the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::recovery::RecoveryStrategy;
use crate::store::TriggerReason;

const DEFAULT_CAPACITY: usize = 256;

/// Event emitted by the durability layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DurabilityEvent {
    CheckpointCreated {
        task_id: String,
        checkpoint_id: String,
        version: u64,
        trigger_reason: TriggerReason,
        is_diff: bool,
        size: u64,
    },
    CheckpointRestored {
        task_id: String,
        checkpoint_id: String,
        chain_length: usize,
    },
    CheckpointsPruned {
        task_id: String,
        deleted: usize,
    },
    HeartbeatMissed {
        task_id: String,
        missed_beats: u32,
    },
    TaskCrashed {
        task_id: String,
        last_checkpoint_id: String,
    },
    UnrecoverableCrash {
        task_id: String,
        reason: String,
    },
    RecoveryStarted {
        task_id: String,
        strategy: RecoveryStrategy,
        attempt: u32,
    },
    RecoveryCompleted {
        task_id: String,
        strategy: RecoveryStrategy,
    },
    RecoveryFailed {
        task_id: String,
        error: String,
        attempts: u32,
        permanent: bool,
    },
    RecoveryAbandoned {
        task_id: String,
    },
}

impl DurabilityEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::CheckpointCreated { task_id, .. }
            | Self::CheckpointRestored { task_id, .. }
            | Self::CheckpointsPruned { task_id, .. }
            | Self::HeartbeatMissed { task_id, .. }
            | Self::TaskCrashed { task_id, .. }
            | Self::UnrecoverableCrash { task_id, .. }
            | Self::RecoveryStarted { task_id, .. }
            | Self::RecoveryCompleted { task_id, .. }
            | Self::RecoveryFailed { task_id, .. }
            | Self::RecoveryAbandoned { task_id } => task_id,
        }
    }
}

/// Cloneable handle to the broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DurabilityEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: DurabilityEvent) {
        if self.tx.send(event).is_err() {
            trace!("Durability event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DurabilityEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
