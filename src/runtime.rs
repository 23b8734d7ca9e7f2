//! One handle over store, checkpoint manager and recovery coordinator

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::errors::Result;
use crate::events::{DurabilityEvent, EventBus};
use crate::recovery::{RecoveryCoordinator, ShutdownReport, TaskExecutor};
use crate::store::DurableStore;

pub struct Steadfast {
    config: Config,
    store: Arc<DurableStore>,
    manager: Arc<CheckpointManager>,
    coordinator: RecoveryCoordinator,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Steadfast {
    /// Open the store at `config.store.path` and wire the components.
    pub fn open(config: Config, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        config.validate()?;
        let store = DurableStore::open(
            &config.store.path,
            Duration::from_millis(config.store.busy_timeout_ms),
        )?;
        Self::assemble(config, store, executor)
    }

    pub fn open_in_memory(config: Config, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        config.validate()?;
        let store = DurableStore::open_in_memory()?;
        Self::assemble(config, store, executor)
    }

    fn assemble(
        config: Config,
        store: DurableStore,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let store = Arc::new(store);
        let manager = Arc::new(CheckpointManager::new(
            Arc::clone(&store),
            config.checkpoint.clone(),
            EventBus::default(),
        ));
        let coordinator =
            RecoveryCoordinator::new(Arc::clone(&manager), executor, config.recovery.clone())?;
        Ok(Self {
            config,
            store,
            manager,
            coordinator,
            sweeper: Mutex::new(None),
        })
    }

    /// Run the startup recovery scan, start heartbeat ticks, and start the
    /// expiry sweeper when checkpoints have a TTL. Returns how many tasks
    /// were queued for recovery.
    pub async fn start(&self) -> Result<usize> {
        let queued = self.coordinator.initialize().await?;

        if self.config.checkpoint.ttl_secs.is_some() {
            let mut slot = self.sweeper.lock();
            if slot.is_none() {
                let period = Duration::from_secs(self.config.checkpoint.sweep_interval_secs.max(1));
                *slot = Some(self.manager.spawn_sweeper(period));
            }
        }

        let location = self
            .store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string());
        info!(path = %location, queued, "Steadfast started");
        Ok(queued)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<CheckpointManager> {
        &self.manager
    }

    pub fn coordinator(&self) -> &RecoveryCoordinator {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DurabilityEvent> {
        self.manager.events().subscribe()
    }

    /// Stop background work and close the store.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.coordinator.shutdown(timeout).await
    }
}
