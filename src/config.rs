use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::SteadfastError;
use crate::recovery::RecoveryStrategy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Minimum spacing between two `auto` checkpoints of one task
    #[serde(default = "default_min_checkpoint_interval_ms")]
    pub min_checkpoint_interval_ms: u64,
    /// Serialized payloads above this size are zstd-compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    #[serde(default = "default_true")]
    pub enable_diffs: bool,
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints_per_task: usize,
    #[serde(default = "default_true")]
    pub auto_prune: bool,
    /// Checkpoints expire after this many seconds; `None` keeps them forever
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Checkpoint every N agent actions
    #[serde(default = "default_action_interval")]
    pub action_interval: usize,
    /// Checkpoint at least this often while a task is running
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// Expired-checkpoint sweep period
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Missed intervals after which a task is considered dead
    #[serde(default = "default_dead_threshold")]
    pub dead_threshold: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub default_strategy: RecoveryStrategy,
    /// Start recovery as soon as a record is queued
    #[serde(default)]
    pub auto_recover: bool,
    #[serde(default = "default_shutdown_poll_ms")]
    pub shutdown_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            min_checkpoint_interval_ms: default_min_checkpoint_interval_ms(),
            compression_threshold_bytes: default_compression_threshold(),
            compression_level: default_compression_level(),
            enable_diffs: true,
            max_checkpoints_per_task: default_max_checkpoints(),
            auto_prune: true,
            ttl_secs: None,
            action_interval: default_action_interval(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            dead_threshold: default_dead_threshold(),
            max_attempts: default_max_attempts(),
            default_strategy: RecoveryStrategy::default(),
            auto_recover: false,
            shutdown_poll_ms: default_shutdown_poll_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl CheckpointConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_checkpoint_interval_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

impl RecoveryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.heartbeat_interval_ms == 0 {
            return Err("recovery.heartbeat_interval_ms must be greater than zero".to_string());
        }
        if self.dead_threshold < 2 {
            return Err("recovery.dead_threshold must be at least 2".to_string());
        }
        if self.max_attempts == 0 {
            return Err("recovery.max_attempts must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".steadfast")
        .join("checkpoints.db")
}
fn default_busy_timeout_ms() -> u64 { 5_000 }
fn default_min_checkpoint_interval_ms() -> u64 { 5_000 }
fn default_compression_threshold() -> usize { 10 * 1024 }
fn default_compression_level() -> i32 { 3 }
fn default_true() -> bool { true }
fn default_max_checkpoints() -> usize { 50 }
fn default_action_interval() -> usize { 10 }
fn default_checkpoint_interval_ms() -> u64 { 60_000 }
fn default_sweep_interval_secs() -> u64 { 300 }
fn default_heartbeat_interval_ms() -> u64 { 5_000 }
fn default_dead_threshold() -> u32 { 3 }
fn default_max_attempts() -> u32 { 3 }
fn default_shutdown_poll_ms() -> u64 { 50 }
fn default_log_filter() -> String { "info".to_string() }

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config: Config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let mut default_paths = vec![PathBuf::from("steadfast.toml")];
                if let Some(home) = dirs::home_dir() {
                    default_paths.push(home.join(".config/steadfast/config.toml"));
                }

                let mut loaded: Option<Config> = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).with_context(|| {
                            format!("Failed to parse config {}", p.display())
                        })?);
                        break;
                    }
                }
                loaded.unwrap_or_default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STEADFAST_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(ms) = std::env::var("STEADFAST_HEARTBEAT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.recovery.heartbeat_interval_ms = ms;
            }
        }
        if let Ok(filter) = std::env::var("STEADFAST_LOG") {
            self.logging.filter = filter;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), SteadfastError> {
        self.recovery.validate().map_err(SteadfastError::Config)?;
        if self.checkpoint.max_checkpoints_per_task == 0 {
            return Err(SteadfastError::Config(
                "checkpoint.max_checkpoints_per_task must be greater than zero".to_string(),
            ));
        }
        if !(1..=22).contains(&self.checkpoint.compression_level) {
            return Err(SteadfastError::Config(format!(
                "checkpoint.compression_level {} is outside 1..=22",
                self.checkpoint.compression_level
            )));
        }
        Ok(())
    }
}
