//! Incremental state diffs
//!
//! A checkpoint payload is either a full `TaskState` or a `StateDiff` against
//! its parent. Reconstruction folds payloads root-first through [`apply`].
//!
//! List fields are diffed as append-only logs: a diff carries only the
//! elements beyond the previous length. Truncating, reordering, or editing
//! earlier elements cannot be represented, so a reconstructed state keeps the
//! old tail in that case.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{ActionRecord, ErrorRecord, StateMap, StateMessage, TaskState};

/// Fields that changed since the parent checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_state: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<StateMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.progress.is_none()
            && self.phase.is_none()
            && self.data.is_none()
            && self.agent_state.is_none()
            && self.custom.is_none()
            && self.messages.is_empty()
            && self.actions.is_empty()
            && self.errors.is_empty()
    }
}

/// Stored checkpoint payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum StatePayload {
    Full(TaskState),
    Diff(StateDiff),
}

impl StatePayload {
    pub fn is_diff(&self) -> bool {
        matches!(self, StatePayload::Diff(_))
    }
}

/// Error returned when a diff has nothing to apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingBase;

/// Compute the diff from `prev` to `next`, or `None` when nothing changed.
pub fn compute_diff(prev: &TaskState, next: &TaskState) -> Option<StateDiff> {
    let diff = StateDiff {
        progress: (prev.progress != next.progress).then_some(next.progress),
        phase: (prev.phase != next.phase).then(|| next.phase.clone()),
        data: (prev.data != next.data).then(|| next.data.clone()),
        agent_state: (prev.agent_state != next.agent_state).then(|| next.agent_state.clone()),
        custom: (prev.custom != next.custom).then(|| next.custom.clone()),
        messages: appended("messages", &prev.messages, &next.messages),
        actions: appended("actions", &prev.actions, &next.actions),
        errors: appended("errors", &prev.errors, &next.errors),
    };

    (!diff.is_empty()).then_some(diff)
}

fn appended<T: Clone>(field: &'static str, prev: &[T], next: &[T]) -> Vec<T> {
    if next.len() < prev.len() {
        warn!(
            field,
            previous = prev.len(),
            current = next.len(),
            "List shrank between checkpoints; diffs only record appended entries"
        );
    }
    next.get(prev.len()..).map(<[T]>::to_vec).unwrap_or_default()
}

/// Apply one payload on top of `base`.
///
/// A full payload replaces the base. A diff overwrites scalars, replaces
/// maps wholesale, and appends list entries in stored order.
pub fn apply(base: Option<TaskState>, payload: StatePayload) -> Result<TaskState, MissingBase> {
    match payload {
        StatePayload::Full(state) => Ok(state),
        StatePayload::Diff(diff) => {
            let mut state = base.ok_or(MissingBase)?;
            if let Some(progress) = diff.progress {
                state.progress = progress;
            }
            if let Some(phase) = diff.phase {
                state.phase = phase;
            }
            if let Some(data) = diff.data {
                state.data = data;
            }
            if let Some(agent_state) = diff.agent_state {
                state.agent_state = agent_state;
            }
            if let Some(custom) = diff.custom {
                state.custom = custom;
            }
            state.messages.extend(diff.messages);
            state.actions.extend(diff.actions);
            state.errors.extend(diff.errors);
            Ok(state)
        }
    }
}
