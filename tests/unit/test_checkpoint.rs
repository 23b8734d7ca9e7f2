//! Unit tests for the checkpoint manager
//!
//! Tests cover:
//! - Diff checkpoints and their reconstruction
//! - Throttling of automatic checkpoints
//! - Long diff chains and repeated restores
//! - Compression and pruning through the public API

use serde_json::json;
use std::sync::Arc;

use steadfast::config::CheckpointConfig;
use steadfast::store::{DurableStore, ListOptions, TaskStatus};
use steadfast::{CheckpointError, CheckpointManager, CheckpointOptions, EventBus, TaskState};

fn manager_with(config: CheckpointConfig) -> CheckpointManager {
    let store = Arc::new(DurableStore::open_in_memory().unwrap());
    CheckpointManager::new(store, config, EventBus::default())
}

fn manager() -> CheckpointManager {
    manager_with(CheckpointConfig::default())
}

// ============================================================================
// Diffs
// ============================================================================

mod diff_tests {
    use super::*;

    #[tokio::test]
    async fn test_diff_restore_merges_unchanged_fields() {
        let manager = manager();

        let mut state = TaskState::new("init");
        state.data.insert("url".into(), json!("https://example.com"));
        let cp1 = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();
        let cp1 = cp1.created().unwrap().clone();
        assert!(!cp1.is_diff);

        state.set_progress(50.0);
        let cp2 = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto().forced())
            .await
            .unwrap();
        let cp2 = cp2.created().unwrap().clone();
        assert!(cp2.is_diff);
        assert_eq!(cp2.parent_checkpoint_id.as_deref(), Some(cp1.checkpoint_id.as_str()));

        let restored = manager.restore_checkpoint(&cp2.checkpoint_id).await.unwrap();
        assert_eq!(restored.progress, 50.0);
        assert_eq!(restored.phase, "init");
        assert_eq!(restored.data["url"], json!("https://example.com"));
    }

    #[tokio::test]
    async fn test_long_chain_restores_every_version() {
        let manager = manager();
        let mut state = TaskState::new("browse");
        let mut expected = Vec::new();

        for i in 0..8 {
            state.push_action("click", json!({ "n": i }), true);
            state.set_progress(f64::from(i) * 10.0);
            let outcome = manager
                .create_checkpoint(
                    "task",
                    &state,
                    CheckpointOptions::auto().with_action("click", i as u64).forced(),
                )
                .await
                .unwrap();
            expected.push((outcome.created().unwrap().checkpoint_id.clone(), state.clone()));
        }

        for (checkpoint_id, state) in &expected {
            let restored = manager.restore_checkpoint(checkpoint_id).await.unwrap();
            assert_eq!(&restored, state);
        }

        let (last_id, _) = expected.last().unwrap();
        let detailed = manager.restore_detailed(last_id).await.unwrap();
        assert_eq!(detailed.chain_length, 8);
    }

    #[tokio::test]
    async fn test_restore_is_repeatable() {
        let manager = manager();
        let mut state = TaskState::new("a");
        manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();
        state.push_message("assistant", "hello");
        let outcome = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto().forced())
            .await
            .unwrap();
        let id = outcome.created().unwrap().checkpoint_id.clone();

        let first = manager.restore_checkpoint(&id).await.unwrap();
        let second = manager.restore_checkpoint(&id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_diffs_disabled_writes_full_checkpoints() {
        let manager = manager_with(CheckpointConfig {
            enable_diffs: false,
            ..CheckpointConfig::default()
        });
        let mut state = TaskState::new("a");
        manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();
        state.set_progress(20.0);
        let outcome = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto().forced())
            .await
            .unwrap();
        assert!(!outcome.created().unwrap().is_diff);
    }
}

// ============================================================================
// Throttling
// ============================================================================

mod throttle_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_auto_checkpoint_is_throttled() {
        let manager = manager();
        let state = TaskState::new("init");

        let first = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();
        assert!(first.created().is_some());

        let second = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();
        assert!(second.is_throttled());

        let rows = manager
            .list_checkpoints("task", ListOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(manager.stats().throttled, 1);
    }

    #[tokio::test]
    async fn test_manual_and_milestone_bypass_throttle() {
        let manager = manager();
        let state = TaskState::new("init");
        manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();

        let manual = manager
            .create_checkpoint("task", &state, CheckpointOptions::manual("before deploy"))
            .await
            .unwrap();
        assert_eq!(manual.created().unwrap().label.as_deref(), Some("before deploy"));

        let milestone = manager.create_milestone("task", &state, "half way").await.unwrap();
        assert_eq!(milestone.version, 3);
    }

    #[tokio::test]
    async fn test_throttle_is_per_task() {
        let manager = manager();
        let state = TaskState::new("init");
        for task in ["a", "b"] {
            let outcome = manager
                .create_checkpoint(task, &state, CheckpointOptions::auto())
                .await
                .unwrap();
            assert!(outcome.created().is_some());
        }
    }
}

// ============================================================================
// Storage features
// ============================================================================

mod storage_tests {
    use super::*;

    #[tokio::test]
    async fn test_large_state_is_compressed_and_restored() {
        let manager = manager_with(CheckpointConfig {
            compression_threshold_bytes: 256,
            ..CheckpointConfig::default()
        });
        let mut state = TaskState::new("fetch");
        state
            .data
            .insert("page".into(), json!("lorem ipsum ".repeat(200)));

        let outcome = manager
            .create_checkpoint("task", &state, CheckpointOptions::auto())
            .await
            .unwrap();
        let summary = outcome.created().unwrap();
        assert!(summary.compressed);

        let restored = manager.restore_checkpoint(&summary.checkpoint_id).await.unwrap();
        assert_eq!(restored, state);
    }

    #[tokio::test]
    async fn test_prune_keeps_chain_restorable() {
        let manager = manager();
        let mut state = TaskState::new("loop");
        let mut last_id = String::new();
        for i in 0..6 {
            state.set_progress(f64::from(i) * 10.0);
            let outcome = manager
                .create_checkpoint("task", &state, CheckpointOptions::auto().forced())
                .await
                .unwrap();
            last_id = outcome.created().unwrap().checkpoint_id.clone();
        }

        let report = manager.prune("task", 2).await.unwrap();
        assert_eq!(report.deleted, 4);
        assert_eq!(report.remaining, 2);

        let restored = manager.restore_checkpoint(&last_id).await.unwrap();
        assert_eq!(restored.progress, 50.0);
    }

    #[tokio::test]
    async fn test_restore_unknown_checkpoint() {
        let manager = manager();
        let err = manager.restore_checkpoint("missing").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_restore_latest_of_unknown_task_is_none() {
        let manager = manager();
        assert!(manager.restore_latest("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_task_marks_status() {
        let manager = manager();
        manager
            .create_checkpoint("task", &TaskState::default(), CheckpointOptions::auto())
            .await
            .unwrap();
        assert!(manager.complete_task("task").await.unwrap());

        let completed = manager.list_tasks(Some(TaskStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
    }
}
