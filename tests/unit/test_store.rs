//! Unit tests for the durable store
//!
//! Tests cover:
//! - Version assignment and task summaries
//! - Latest / by-timestamp lookups
//! - Parent chains and integrity checks
//! - Reopening a file-backed database

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use steadfast::store::{
    hash_state, CheckpointMetadata, CheckpointType, DurableStore, IntegrityCheck, ListOptions,
    OrderBy, OrderDirection, SaveOptions, TaskStatus, TriggerReason,
};
use steadfast::StoreError;

fn meta(is_diff: bool, parent: Option<&str>) -> CheckpointMetadata {
    CheckpointMetadata {
        trigger_reason: TriggerReason::Manual,
        checkpoint_type: CheckpointType::Manual,
        label: None,
        action_type: None,
        action_index: None,
        phase: "work".to_string(),
        progress: 10.0,
        is_diff,
        parent_checkpoint_id: parent.map(str::to_string),
    }
}

fn save(store: &DurableStore, task: &str, id: &str) {
    store
        .save_state(task, id, id.as_bytes(), &meta(false, None), &SaveOptions::default())
        .unwrap();
}

// ============================================================================
// Versioning
// ============================================================================

mod versioning_tests {
    use super::*;

    #[test]
    fn test_versions_are_per_task() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        save(&store, "b", "b1");
        save(&store, "a", "a2");

        assert_eq!(store.get_state("a2").unwrap().unwrap().version, 2);
        assert_eq!(store.get_state("b1").unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_task_summary_tracks_latest() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        save(&store, "a", "a2");

        let task = store.get_task("a").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.checkpoint_count, 2);
        assert_eq!(task.latest_checkpoint_id.as_deref(), Some("a2"));
    }

    #[test]
    fn test_stored_hash_matches_payload() {
        let store = DurableStore::open_in_memory().unwrap();
        let record = store
            .save_state("a", "a1", b"payload", &meta(false, None), &SaveOptions::default())
            .unwrap();
        assert_eq!(record.state_hash, hash_state(b"payload"));
        assert_eq!(record.size, 7);
    }

    #[test]
    fn test_duplicate_checkpoint_id_rejected() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "dup");
        let err = store
            .save_state("a", "dup", b"x", &meta(false, None), &SaveOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCheckpoint(_)));
    }

    #[test]
    fn test_diff_needs_a_base() {
        let store = DurableStore::open_in_memory().unwrap();
        let err = store
            .save_state("a", "d1", b"x", &meta(true, None), &SaveOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::DiffWithoutBase { .. }));
    }
}

// ============================================================================
// Queries
// ============================================================================

mod query_tests {
    use super::*;

    #[test]
    fn test_list_ordering_and_paging() {
        let store = DurableStore::open_in_memory().unwrap();
        for i in 1..=5 {
            save(&store, "a", &format!("a{}", i));
        }

        let newest: Vec<u64> = store
            .list_checkpoints("a", &ListOptions { limit: 2, ..ListOptions::default() })
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(newest, vec![5, 4]);

        let oldest: Vec<u64> = store
            .list_checkpoints(
                "a",
                &ListOptions {
                    limit: 2,
                    offset: 1,
                    order_by: OrderBy::Version,
                    order_direction: OrderDirection::Asc,
                    include_expired: false,
                },
            )
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(oldest, vec![2, 3]);
    }

    #[test]
    fn test_expired_rows_hidden_from_latest() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        store
            .save_state(
                "a",
                "a2",
                b"a2",
                &meta(false, None),
                &SaveOptions {
                    compressed: false,
                    expires_at: Some(Utc::now() - ChronoDuration::seconds(1)),
                },
            )
            .unwrap();

        assert_eq!(store.get_latest("a", false).unwrap().unwrap().checkpoint_id, "a1");
        assert_eq!(store.get_latest("a", true).unwrap().unwrap().checkpoint_id, "a2");
    }

    #[test]
    fn test_get_by_timestamp_before_first_is_none() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        let before = Utc::now() - ChronoDuration::hours(1);
        assert!(store.get_by_timestamp("a", before).unwrap().is_none());
        let after = Utc::now() + ChronoDuration::seconds(1);
        assert_eq!(
            store.get_by_timestamp("a", after).unwrap().unwrap().checkpoint_id,
            "a1"
        );
    }

    #[test]
    fn test_chain_is_root_first() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        store
            .save_state("a", "a2", b"d", &meta(true, Some("a1")), &SaveOptions::default())
            .unwrap();
        store
            .save_state("a", "a3", b"d", &meta(true, Some("a2")), &SaveOptions::default())
            .unwrap();

        assert_eq!(store.get_checkpoint_chain("a3").unwrap(), vec!["a1", "a2", "a3"]);
        assert!(store.get_checkpoint_chain("missing").unwrap().is_empty());
    }

    #[test]
    fn test_list_tasks_by_status() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        save(&store, "b", "b1");
        assert!(store.update_task_status("b", TaskStatus::Completed).unwrap());

        let active = store.list_tasks(Some(TaskStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
        assert_eq!(store.list_tasks(None).unwrap().len(), 2);
    }
}

// ============================================================================
// Integrity and lifecycle
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_verify_integrity_valid_and_missing() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        assert_eq!(store.verify_integrity("a1").unwrap(), IntegrityCheck::Valid);
        assert_eq!(store.verify_integrity("nope").unwrap(), IntegrityCheck::Missing);
    }

    #[test]
    fn test_delete_task_removes_everything() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        save(&store, "a", "a2");
        assert_eq!(store.delete_task("a").unwrap(), 2);
        assert!(store.get_task("a").unwrap().is_none());
        assert!(store.get_latest("a", true).unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let store = DurableStore::open_in_memory().unwrap();
        for i in 1..=6 {
            save(&store, "a", &format!("a{}", i));
        }
        let report = store.prune_checkpoints("a", 2).unwrap();
        assert_eq!(report.deleted, 4);
        assert_eq!(report.remaining, 2);
        assert_eq!(store.get_task("a").unwrap().unwrap().checkpoint_count, 2);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.db");
        {
            let store = DurableStore::open(&path, Duration::from_secs(1)).unwrap();
            save(&store, "a", "a1");
            store.close().unwrap();
            assert!(store.is_closed());
        }

        let store = DurableStore::open(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(store.get_latest("a", false).unwrap().unwrap().checkpoint_id, "a1");
        assert_eq!(
            store.schema_version().unwrap(),
            steadfast::store::schema::CURRENT_SCHEMA_VERSION
        );
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let store = DurableStore::open_in_memory().unwrap();
        store.close().unwrap();
        let err = store
            .save_state("a", "a1", b"x", &meta(false, None), &SaveOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[test]
    fn test_stats_counts() {
        let store = DurableStore::open_in_memory().unwrap();
        save(&store, "a", "a1");
        store
            .save_state("a", "a2", b"d", &meta(true, Some("a1")), &SaveOptions::default())
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.tasks, 1);
        assert_eq!(stats.checkpoints, 2);
        assert_eq!(stats.diff_checkpoints, 1);
    }
}
