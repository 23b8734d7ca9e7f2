//! `steadfast` admin CLI
//!
//! Inspects and maintains a checkpoint database from outside the agent
//! process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{CheckpointManager, CheckpointSummary};
use crate::config::Config;
use crate::errors::CheckpointError;
use crate::events::EventBus;
use crate::store::schema::CURRENT_SCHEMA_VERSION;
use crate::store::{DurableStore, IntegrityCheck, ListOptions, TaskRecord, TaskStatus};
use crate::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "steadfast")]
#[command(about = "Inspect and maintain agent task checkpoints")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Checkpoint database, overrides the configured path
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum StatusFilter {
    Active,
    Completed,
}

impl From<StatusFilter> for TaskStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Active => TaskStatus::Active,
            StatusFilter::Completed => TaskStatus::Completed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks known to the store
    Tasks {
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },

    /// List checkpoints of a task, newest first
    Checkpoints {
        task_id: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Include expired checkpoints
        #[arg(long)]
        include_expired: bool,
    },

    /// Restore a checkpoint and print its state
    Show { checkpoint_id: String },

    /// Print the parent chain of a checkpoint, root first
    Chain { checkpoint_id: String },

    /// Recompute a checkpoint's hash and compare it with the stored one
    Verify { checkpoint_id: String },

    /// Keep only the newest checkpoints of a task
    Prune {
        task_id: String,

        #[arg(short, long)]
        keep: usize,
    },

    /// Delete expired checkpoints
    Sweep,

    /// Store-wide counts
    Stats,

    /// Show the schema version
    Schema,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    init_tracing(&config.logging);

    let path = config.store.path.clone();
    let store = DurableStore::open(&path, Duration::from_millis(config.store.busy_timeout_ms))
        .with_context(|| format!("Failed to open checkpoint store {}", path.display()))?;
    let store = Arc::new(store);
    let manager = CheckpointManager::new(Arc::clone(&store), config.checkpoint, EventBus::default());

    let result = execute(cli.command, cli.format, &manager).await;
    store.close().context("Failed to close checkpoint store")?;
    result
}

async fn execute(command: Commands, format: OutputFormat, manager: &CheckpointManager) -> Result<()> {
    let store = manager.store();

    match command {
        Commands::Tasks { status } => {
            let tasks = manager.list_tasks(status.map(TaskStatus::from)).await?;
            match format {
                OutputFormat::Json => print_json(&tasks)?,
                OutputFormat::Text => print_tasks(&tasks),
            }
        }

        Commands::Checkpoints {
            task_id,
            limit,
            offset,
            include_expired,
        } => {
            let opts = ListOptions {
                limit,
                offset,
                include_expired,
                ..ListOptions::default()
            };
            let checkpoints = manager.list_checkpoints(&task_id, opts).await?;
            match format {
                OutputFormat::Json => print_json(&checkpoints)?,
                OutputFormat::Text => print_checkpoints(&task_id, &checkpoints),
            }
        }

        Commands::Show { checkpoint_id } => {
            let restored = manager.restore_detailed(&checkpoint_id).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "checkpoint": restored.summary,
                    "chainLength": restored.chain_length,
                    "state": restored.state,
                }))?,
                OutputFormat::Text => {
                    print_checkpoints(&restored.summary.task_id, std::slice::from_ref(&restored.summary));
                    println!("{} {}", "chain length:".dimmed(), restored.chain_length);
                    println!("{}", serde_json::to_string_pretty(&restored.state)?);
                }
            }
        }

        Commands::Chain { checkpoint_id } => {
            let chain = store.get_checkpoint_chain(&checkpoint_id)?;
            if chain.is_empty() {
                return Err(CheckpointError::NotFound(checkpoint_id).into());
            }
            match format {
                OutputFormat::Json => print_json(&chain)?,
                OutputFormat::Text => {
                    for (depth, id) in chain.iter().enumerate() {
                        let marker = if depth == 0 { "◆" } else { "└" };
                        println!("{}{} {}", "  ".repeat(depth.min(1)), marker.cyan(), id);
                    }
                }
            }
        }

        Commands::Verify { checkpoint_id } => {
            let check = manager.verify(&checkpoint_id).await?;
            if format == OutputFormat::Json {
                print_json(&check)?;
            }
            match check {
                IntegrityCheck::Valid => {
                    if format == OutputFormat::Text {
                        println!("{} {} integrity ok", "✓".green(), checkpoint_id);
                    }
                }
                IntegrityCheck::Missing => {
                    return Err(CheckpointError::NotFound(checkpoint_id).into());
                }
                IntegrityCheck::Mismatch { expected, actual } => {
                    return Err(CheckpointError::IntegrityMismatch {
                        checkpoint_id,
                        expected,
                        actual,
                    }
                    .into());
                }
            }
        }

        Commands::Prune { task_id, keep } => {
            let report = manager.prune(&task_id, keep).await?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => println!(
                    "{} pruned {} checkpoint(s) from {}, {} remaining",
                    "✓".green(),
                    report.deleted,
                    task_id.bold(),
                    report.remaining
                ),
            }
        }

        Commands::Sweep => {
            let deleted = manager.sweep_expired().await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "deleted": deleted }))?,
                OutputFormat::Text => {
                    println!("{} deleted {} expired checkpoint(s)", "✓".green(), deleted)
                }
            }
        }

        Commands::Stats => {
            let stats = store.stats()?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Text => {
                    println!("{}", "Checkpoint store".bold());
                    println!("  tasks           {} ({} active)", stats.tasks, stats.active_tasks);
                    println!("  checkpoints     {}", stats.checkpoints);
                    println!("  diffs           {}", stats.diff_checkpoints);
                    println!("  compressed      {}", stats.compressed_checkpoints);
                    println!("  stored bytes    {}", stats.total_bytes);
                    println!("  schema version  {}", stats.schema_version);
                }
            }
        }

        Commands::Schema => {
            let version = store.schema_version()?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "version": version,
                    "supported": CURRENT_SCHEMA_VERSION,
                }))?,
                OutputFormat::Text => println!(
                    "schema version {} (supported {})",
                    version, CURRENT_SCHEMA_VERSION
                ),
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tasks(tasks: &[TaskRecord]) {
    if tasks.is_empty() {
        println!("{}", "No tasks.".dimmed());
        return;
    }
    for task in tasks {
        let status = match task.status {
            TaskStatus::Active => "active".yellow(),
            TaskStatus::Completed => "completed".green(),
        };
        println!(
            "{} {}  {}  {} checkpoint(s)  updated {}",
            "●".cyan(),
            task.id.bold(),
            status,
            task.checkpoint_count,
            task.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_checkpoints(task_id: &str, checkpoints: &[CheckpointSummary]) {
    if checkpoints.is_empty() {
        println!("{} {}", "No checkpoints for".dimmed(), task_id);
        return;
    }
    for cp in checkpoints {
        let kind = if cp.is_diff { "diff".blue() } else { "full".normal() };
        let label = cp
            .label
            .as_deref()
            .map(|l| format!("  \"{}\"", l))
            .unwrap_or_default();
        println!(
            "v{:<4} {}  {}  {:?}  {} {:.0}%  {} bytes{}{}",
            cp.version,
            cp.checkpoint_id,
            kind,
            cp.trigger_reason,
            cp.phase,
            cp.progress,
            cp.size,
            if cp.compressed { " (zstd)" } else { "" },
            label
        );
    }
}
