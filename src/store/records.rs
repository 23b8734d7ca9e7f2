//! Rows persisted by the durable store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Action,
    Interval,
    Milestone,
    Error,
    Manual,
}

/// Kind of checkpoint requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    #[default]
    Auto,
    Manual,
    Milestone,
    Error,
}

/// Metadata stored alongside every checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub trigger_reason: TriggerReason,
    #[serde(default)]
    pub checkpoint_type: CheckpointType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_index: Option<u64>,
    pub phase: String,
    pub progress: f64,
    pub is_diff: bool,
    #[serde(default)]
    pub parent_checkpoint_id: Option<String>,
}

/// A persisted checkpoint row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub id: String,
    pub task_id: String,
    pub checkpoint_id: String,
    pub version: u64,
    #[serde(skip)]
    pub state: Vec<u8>,
    pub state_hash: String,
    pub metadata: CheckpointMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub compressed: bool,
    pub size: u64,
}

impl StateRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Task summary row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub checkpoint_count: u64,
    pub latest_checkpoint_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Options for `save_state`
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub compressed: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    Version,
    CreatedAt,
    Size,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

/// Options for `list_checkpoints`
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub order_by: OrderBy,
    pub order_direction: OrderDirection,
    pub include_expired: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            order_by: OrderBy::Version,
            order_direction: OrderDirection::Desc,
            include_expired: false,
        }
    }
}

impl ListOptions {
    pub(crate) fn order_clause(&self) -> &'static str {
        match (self.order_by, self.order_direction) {
            (OrderBy::Version, OrderDirection::Asc) => "version ASC",
            (OrderBy::Version, OrderDirection::Desc) => "version DESC",
            (OrderBy::CreatedAt, OrderDirection::Asc) => "created_at ASC, version ASC",
            (OrderBy::CreatedAt, OrderDirection::Desc) => "created_at DESC, version DESC",
            (OrderBy::Size, OrderDirection::Asc) => "size ASC, version ASC",
            (OrderBy::Size, OrderDirection::Desc) => "size DESC, version DESC",
        }
    }
}

/// Outcome of `prune_checkpoints`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted: usize,
    pub remaining: usize,
    pub deleted_ids: Vec<String>,
}

/// Outcome of `verify_integrity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IntegrityCheck {
    Valid,
    Mismatch { expected: String, actual: String },
    Missing,
}

impl IntegrityCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, IntegrityCheck::Valid)
    }
}

/// Aggregate counts for admin tooling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub tasks: u64,
    pub active_tasks: u64,
    pub checkpoints: u64,
    pub compressed_checkpoints: u64,
    pub diff_checkpoints: u64,
    pub total_bytes: u64,
    pub schema_version: u32,
}
