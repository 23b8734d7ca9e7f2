//! Unit tests for the recovery coordinator
//!
//! Tests cover:
//! - Startup scan after a process restart
//! - Restart strategy wiping earlier checkpoints
//! - Heartbeat-driven crash detection, both polled and via the ticker
//! - One recovery at a time per task, and shutdown with recoveries in flight

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use steadfast::config::{CheckpointConfig, RecoveryConfig};
use steadfast::recovery::{HeartbeatTransition, ShutdownReport};
use steadfast::store::{DurableStore, ListOptions};
use steadfast::{
    executor_fn, CheckpointManager, CheckpointOptions, DurabilityEvent, EventBus,
    RecoveryCoordinator, RecoveryError, RecoveryStatus, RecoveryStrategy, TaskExecutor,
    TaskState,
};
use tokio::sync::Notify;

type Calls = Arc<Mutex<Vec<(String, TaskState)>>>;

fn recording_executor(calls: Calls) -> Arc<dyn TaskExecutor> {
    Arc::new(executor_fn(move |task_id: String, state: TaskState| {
        let calls = Arc::clone(&calls);
        async move {
            calls.lock().push((task_id, state));
            Ok::<(), anyhow::Error>(())
        }
    }))
}

fn checkpoint_config() -> CheckpointConfig {
    CheckpointConfig {
        min_checkpoint_interval_ms: 0,
        ..CheckpointConfig::default()
    }
}

fn manager_at(path: &Path) -> Arc<CheckpointManager> {
    let store = Arc::new(DurableStore::open(path, Duration::from_secs(1)).unwrap());
    Arc::new(CheckpointManager::new(store, checkpoint_config(), EventBus::default()))
}

fn in_memory_manager() -> Arc<CheckpointManager> {
    let store = Arc::new(DurableStore::open_in_memory().unwrap());
    Arc::new(CheckpointManager::new(store, checkpoint_config(), EventBus::default()))
}

// ============================================================================
// Startup scan
// ============================================================================

mod startup_tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_queues_one_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.db");

        {
            let manager = manager_at(&path);
            let mut state = TaskState::new("research");
            state.set_progress(30.0);
            manager
                .create_checkpoint("task-1", &state, CheckpointOptions::auto())
                .await
                .unwrap();
            manager.store().close().unwrap();
        }

        let calls: Calls = Arc::default();
        let coordinator = RecoveryCoordinator::new(
            manager_at(&path),
            recording_executor(Arc::clone(&calls)),
            RecoveryConfig::default(),
        )
        .unwrap();
        assert_eq!(coordinator.initialize().await.unwrap(), 1);

        let queue = coordinator.recovery_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].task_id, "task-1");
        assert_eq!(queue[0].recovery_status, RecoveryStatus::Pending);
        assert_eq!(queue[0].recovery_attempts, 0);

        assert_eq!(
            coordinator.recover_task("task-1").await.unwrap(),
            RecoveryStatus::Recovered
        );
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.progress, 30.0);
        assert_eq!(calls[0].1.phase, "research");

        drop(calls);
        coordinator.shutdown(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_completed_task_is_not_queued() {
        let manager = in_memory_manager();
        manager
            .create_checkpoint("done", &TaskState::default(), CheckpointOptions::auto())
            .await
            .unwrap();
        manager.complete_task("done").await.unwrap();

        let coordinator = RecoveryCoordinator::new(
            manager,
            recording_executor(Arc::default()),
            RecoveryConfig::default(),
        )
        .unwrap();
        assert_eq!(coordinator.initialize().await.unwrap(), 0);
        assert!(coordinator.recovery_queue().is_empty());
        coordinator.shutdown(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Restart strategy
// ============================================================================

mod restart_tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_leaves_single_initial_checkpoint() {
        let manager = in_memory_manager();
        let mut state = TaskState::new("crawl");
        for i in 0..10 {
            state.set_progress(f64::from(i) * 10.0);
            manager
                .create_checkpoint("task", &state, CheckpointOptions::auto().forced())
                .await
                .unwrap();
        }
        assert_eq!(
            manager.store().get_task("task").unwrap().unwrap().checkpoint_count,
            10
        );

        let calls: Calls = Arc::default();
        let coordinator = RecoveryCoordinator::new(
            Arc::clone(&manager),
            recording_executor(Arc::clone(&calls)),
            RecoveryConfig {
                default_strategy: RecoveryStrategy::Restart,
                ..RecoveryConfig::default()
            },
        )
        .unwrap();
        coordinator.handle_crash("task").await.unwrap();
        assert_eq!(
            coordinator.recover_task("task").await.unwrap(),
            RecoveryStatus::Restarted
        );

        let task = manager.store().get_task("task").unwrap().unwrap();
        assert_eq!(task.checkpoint_count, 1);
        let rows = manager
            .list_checkpoints("task", ListOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 1);
        assert_eq!(rows[0].label.as_deref(), Some("restart"));

        let restored = manager.restore_checkpoint(&rows[0].checkpoint_id).await.unwrap();
        assert_eq!(restored, TaskState::default());
        assert_eq!(calls.lock()[0].1, TaskState::default());
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

mod heartbeat_tests {
    use super::*;

    fn fast_heartbeats() -> RecoveryConfig {
        RecoveryConfig {
            heartbeat_interval_ms: 100,
            dead_threshold: 3,
            ..RecoveryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_queue_exactly_one_crash() {
        let manager = in_memory_manager();
        manager
            .create_checkpoint("task", &TaskState::default(), CheckpointOptions::auto())
            .await
            .unwrap();
        let mut events = manager.events().subscribe();

        let coordinator = RecoveryCoordinator::new(
            manager,
            recording_executor(Arc::default()),
            fast_heartbeats(),
        )
        .unwrap();
        coordinator.register_heartbeat("task");
        assert!(coordinator.check_heartbeats().await.is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        let transitions = coordinator.check_heartbeats().await;
        assert!(matches!(
            transitions.as_slice(),
            [HeartbeatTransition::Stale { missed_beats: 1, .. }]
        ));
        assert!(coordinator.recovery_record("task").is_none());

        tokio::time::advance(Duration::from_millis(200)).await;
        let transitions = coordinator.check_heartbeats().await;
        assert!(matches!(
            transitions.as_slice(),
            [HeartbeatTransition::Dead { .. }]
        ));

        let record = coordinator.recovery_record("task").unwrap();
        assert_eq!(record.recovery_status, RecoveryStatus::Pending);
        assert!(coordinator.heartbeat_status("task").is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(coordinator.check_heartbeats().await.is_empty());

        let mut crashes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DurabilityEvent::TaskCrashed { .. }) {
                crashes += 1;
            }
        }
        assert_eq!(crashes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_task_emits_heartbeat_missed() {
        let manager = in_memory_manager();
        let mut events = manager.events().subscribe();
        let coordinator = RecoveryCoordinator::new(
            manager,
            recording_executor(Arc::default()),
            fast_heartbeats(),
        )
        .unwrap();
        coordinator.register_heartbeat("task");

        tokio::time::advance(Duration::from_millis(150)).await;
        coordinator.check_heartbeats().await;
        match events.try_recv().unwrap() {
            DurabilityEvent::HeartbeatMissed {
                task_id,
                missed_beats,
            } => {
                assert_eq!(task_id, "task");
                assert_eq!(missed_beats, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Same missed count on the next check does not repeat the event.
        coordinator.check_heartbeats().await;
        assert!(events.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(100)).await;
        coordinator.check_heartbeats().await;
        assert!(matches!(
            events.try_recv().unwrap(),
            DurabilityEvent::HeartbeatMissed { missed_beats: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_beating_task_stays_healthy() {
        let coordinator = RecoveryCoordinator::new(
            in_memory_manager(),
            recording_executor(Arc::default()),
            fast_heartbeats(),
        )
        .unwrap();
        coordinator.register_heartbeat("task");
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(90)).await;
            coordinator.register_heartbeat("task");
            assert!(coordinator.check_heartbeats().await.is_empty());
        }
        assert!(coordinator.recovery_queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_detects_crash() {
        let manager = in_memory_manager();
        let mut events = manager.events().subscribe();
        let coordinator = RecoveryCoordinator::new(
            Arc::clone(&manager),
            recording_executor(Arc::default()),
            fast_heartbeats(),
        )
        .unwrap();
        assert_eq!(coordinator.initialize().await.unwrap(), 0);

        manager
            .create_checkpoint("task", &TaskState::default(), CheckpointOptions::auto())
            .await
            .unwrap();
        coordinator.register_heartbeat("task");

        let crashed = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match events.recv().await {
                    Ok(DurabilityEvent::TaskCrashed { task_id, .. }) => break task_id,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream ended: {}", e),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(crashed, "task");

        let record = coordinator.recovery_record("task").unwrap();
        assert_eq!(record.recovery_status, RecoveryStatus::Pending);
        coordinator.shutdown(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// In-flight recoveries
// ============================================================================

mod in_flight_tests {
    use super::*;

    /// Executor that blocks until `release` is notified.
    fn gated_executor(release: Arc<Notify>) -> Arc<dyn TaskExecutor> {
        Arc::new(executor_fn(move |_task_id: String, _state: TaskState| {
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok::<(), anyhow::Error>(())
            }
        }))
    }

    async fn crashed_coordinator(release: Arc<Notify>) -> RecoveryCoordinator {
        let manager = in_memory_manager();
        manager
            .create_checkpoint("t", &TaskState::new("work"), CheckpointOptions::auto())
            .await
            .unwrap();
        let coordinator =
            RecoveryCoordinator::new(manager, gated_executor(release), RecoveryConfig::default())
                .unwrap();
        coordinator.handle_crash("t").await.unwrap();
        coordinator
    }

    async fn wait_until_recovering(coordinator: &RecoveryCoordinator, task_id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.recovery_record(task_id).unwrap().recovery_status
                != RecoveryStatus::Recovering
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_second_recovery_of_same_task_rejected() {
        let release = Arc::new(Notify::new());
        let coordinator = crashed_coordinator(Arc::clone(&release)).await;

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.recover_task("t").await }
        });
        wait_until_recovering(&coordinator, "t").await;

        assert!(matches!(
            coordinator.recover_task("t").await,
            Err(RecoveryError::AlreadyRecovering(id)) if id == "t"
        ));
        assert_eq!(
            coordinator.recovery_record("t").unwrap().recovery_attempts,
            1
        );

        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), RecoveryStatus::Recovered);
        assert_eq!(
            coordinator.recovery_record("t").unwrap().recovery_status,
            RecoveryStatus::Recovered
        );
    }

    #[tokio::test]
    async fn test_shutdown_reports_abandoned_recovery() {
        let release = Arc::new(Notify::new());
        let coordinator = crashed_coordinator(release).await;
        let mut events = coordinator.manager().events().subscribe();

        tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                let _ = coordinator.recover_task("t").await;
            }
        });
        wait_until_recovering(&coordinator, "t").await;

        let report = coordinator.shutdown(Duration::from_millis(50)).await;
        assert_eq!(
            report,
            ShutdownReport {
                abandoned: vec!["t".to_string()],
                store_closed: true,
            }
        );
        assert!(coordinator.manager().store().is_closed());

        let mut abandoned = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DurabilityEvent::RecoveryAbandoned { task_id } = event {
                abandoned.push(task_id);
            }
        }
        assert_eq!(abandoned, vec!["t".to_string()]);

        assert!(matches!(
            coordinator.recover_task("t").await,
            Err(RecoveryError::ShuttingDown)
        ));
    }
}
