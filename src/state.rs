//! Task state captured by checkpoints
//!
//! `TaskState` is produced by the agent loop. This crate only serializes it,
//! diffs it, and hands it back during recovery. The list fields are treated
//! as append-only logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque key-value section of a task state
pub type StateMap = Map<String, Value>;

/// Full snapshot of an agent task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    /// Completion percentage, 0 to 100
    pub progress: f64,
    pub phase: String,
    #[serde(default)]
    pub data: StateMap,
    #[serde(default)]
    pub agent_state: StateMap,
    #[serde(default)]
    pub custom: StateMap,
    #[serde(default)]
    pub messages: Vec<StateMessage>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

/// A conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// An action performed by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub success: bool,
}

/// An error observed while running the task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            progress: 0.0,
            phase: "init".to_string(),
            data: StateMap::new(),
            agent_state: StateMap::new(),
            custom: StateMap::new(),
            messages: Vec::new(),
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl TaskState {
    /// Zero-value state used when a task is restarted from scratch
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            ..Self::default()
        }
    }

    pub fn set_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 100.0);
    }

    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.phase = phase.into();
    }

    pub fn push_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.messages.push(StateMessage {
            timestamp: Utc::now(),
            role: role.into(),
            content: content.into(),
        });
    }

    pub fn push_action(&mut self, action_type: impl Into<String>, payload: Value, success: bool) {
        self.actions.push(ActionRecord {
            timestamp: Utc::now(),
            action_type: action_type.into(),
            payload,
            success,
        });
    }

    pub fn push_error(&mut self, message: impl Into<String>, recoverable: bool) {
        self.errors.push(ErrorRecord {
            timestamp: Utc::now(),
            message: message.into(),
            recoverable,
        });
    }

    /// Type of the most recent action, if any
    pub fn last_action_type(&self) -> Option<&str> {
        self.actions.last().map(|a| a.action_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_state() {
        let state = TaskState::default();
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.phase, "init");
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut state = TaskState::default();
        state.set_progress(140.0);
        assert_eq!(state.progress, 100.0);
        state.set_progress(-3.0);
        assert_eq!(state.progress, 0.0);
    }

    #[test]
    fn test_camel_case_serialization() {
        let mut state = TaskState::new("planning");
        state
            .agent_state
            .insert("model".to_string(), json!("local"));
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("agentState").is_some());
        assert!(value.get("agent_state").is_none());
    }

    #[test]
    fn test_missing_collections_default() {
        let state: TaskState =
            serde_json::from_value(json!({"progress": 12.5, "phase": "run"})).unwrap();
        assert_eq!(state.progress, 12.5);
        assert!(state.data.is_empty());
        assert!(state.actions.is_empty());
    }

    #[test]
    fn test_push_helpers() {
        let mut state = TaskState::default();
        state.push_message("user", "hello");
        state.push_action("click", json!({"selector": "#go"}), true);
        state.push_error("timeout", true);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.last_action_type(), Some("click"));
        assert!(state.errors[0].recoverable);
    }
}
