//! Heartbeat liveness tracking
//!
//! A task is healthy while it beats at least once per interval. The number
//! of whole intervals since its last beat decides its status:
//! `0` healthy, `1..dead_threshold` stale, `>= dead_threshold` dead.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::RecoveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Healthy,
    Stale,
    Dead,
}

/// Public view of one tracked task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHeartbeat {
    pub task_id: String,
    pub last_beat: DateTime<Utc>,
    pub status: HeartbeatStatus,
    pub missed_beats: u32,
}

/// Status change reported by [`HeartbeatMonitor::evaluate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatTransition {
    /// Missed count grew but the task is not dead yet
    Stale { task_id: String, missed_beats: u32 },
    /// The task crossed the dead threshold and is no longer tracked
    Dead { task_id: String, missed_beats: u32 },
}

#[derive(Debug)]
struct Entry {
    last_beat: Instant,
    last_beat_at: DateTime<Utc>,
    status: HeartbeatStatus,
    missed_beats: u32,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    dead_threshold: u32,
    entries: Mutex<HashMap<String, Entry>>,
}

impl HeartbeatMonitor {
    /// Fails on a zero interval or a threshold below 2, which would leave
    /// no room for a stale phase.
    pub fn new(interval: Duration, dead_threshold: u32) -> Result<Self, RecoveryError> {
        if interval.is_zero() {
            return Err(RecoveryError::InvalidConfig(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if dead_threshold < 2 {
            return Err(RecoveryError::InvalidConfig(format!(
                "dead threshold {} is below 2",
                dead_threshold
            )));
        }
        Ok(Self {
            interval,
            dead_threshold,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a beat. Registers the task on first call.
    pub fn beat(&self, task_id: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(task_id.to_string()).or_insert_with(|| Entry {
            last_beat: Instant::now(),
            last_beat_at: Utc::now(),
            status: HeartbeatStatus::Healthy,
            missed_beats: 0,
        });
        entry.last_beat = Instant::now();
        entry.last_beat_at = Utc::now();
        entry.status = HeartbeatStatus::Healthy;
        entry.missed_beats = 0;
    }

    pub fn unregister(&self, task_id: &str) -> bool {
        self.entries.lock().remove(task_id).is_some()
    }

    pub fn status(&self, task_id: &str) -> Option<TaskHeartbeat> {
        self.entries
            .lock()
            .get(task_id)
            .map(|entry| view(task_id, entry))
    }

    pub fn tracked(&self) -> Vec<TaskHeartbeat> {
        let mut all: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| view(id, entry))
            .collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute every task's status. Dead tasks are removed, so each crash
    /// is reported exactly once.
    pub fn evaluate(&self) -> Vec<HeartbeatTransition> {
        self.evaluate_at(Instant::now())
    }

    pub fn evaluate_at(&self, now: Instant) -> Vec<HeartbeatTransition> {
        let interval_ms = self.interval.as_millis().max(1);
        let mut transitions = Vec::new();
        let mut entries = self.entries.lock();

        entries.retain(|task_id, entry| {
            let elapsed = now.saturating_duration_since(entry.last_beat).as_millis();
            let missed = u32::try_from(elapsed / interval_ms).unwrap_or(u32::MAX);

            if missed >= self.dead_threshold {
                transitions.push(HeartbeatTransition::Dead {
                    task_id: task_id.clone(),
                    missed_beats: missed,
                });
                return false;
            }

            if missed == 0 {
                entry.status = HeartbeatStatus::Healthy;
            } else {
                entry.status = HeartbeatStatus::Stale;
                if missed > entry.missed_beats {
                    transitions.push(HeartbeatTransition::Stale {
                        task_id: task_id.clone(),
                        missed_beats: missed,
                    });
                }
            }
            entry.missed_beats = missed;
            true
        });

        transitions
    }
}

fn view(task_id: &str, entry: &Entry) -> TaskHeartbeat {
    TaskHeartbeat {
        task_id: task_id.to_string(),
        last_beat: entry.last_beat_at,
        status: entry.status,
        missed_beats: entry.missed_beats,
    }
}
