//! Maintenance entry point for the cascade engine.
//!
//! # Responsibility
//! - Open the configured database, recover orphaned cascades and run the
//!   periodic sweeps from cron or an operator shell.
//! - Print history, stats and pending task counts as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;
use varcascade_core::db::now_epoch_ms;
use varcascade_core::repo::task_repo::SqliteTaskRepository;
use varcascade_core::{
    init_logging_from_config, open_db_with_busy_timeout, CascadeHistoryQuery, CascadeService,
    CascadeStatus, EngineConfig, MaintenanceScheduler, TaskService,
};

#[derive(Parser)]
#[command(name = "varcascade")]
#[command(about = "Variable cascade engine maintenance", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = "VARCASCADE_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-enqueue and process pending cascades left by a previous process
    Recover,

    /// Run the retry and retention sweeps once
    Sweep,

    /// Show cascade history, newest first
    History {
        /// Filter by master variable id
        #[arg(long)]
        var: Option<String>,

        /// Filter by status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show aggregate cascade stats
    Stats {
        /// Window in days
        #[arg(long, default_value_t = 30)]
        window_days: u32,
    },

    /// Retry one failed cascade
    Retry {
        /// Cascade log id
        log_id: i64,
    },

    /// Show open task counts by type
    Tasks,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Completed,
    Failed,
}

impl From<StatusArg> for CascadeStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => CascadeStatus::Pending,
            StatusArg::Completed => CascadeStatus::Completed,
            StatusArg::Failed => CascadeStatus::Failed,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(db) = cli.db.clone() {
        config.db_path = Some(db);
    }
    init_logging_from_config(&config).context("Failed to initialize logging")?;

    let db_path = config.resolved_db_path();
    let conn = open_db_with_busy_timeout(&db_path, config.busy_timeout())
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let output = match cli.command {
        Commands::Recover => {
            let service = CascadeService::new(&conn, config.clone());
            let recovered = service
                .recover_pending()
                .context("Failed to scan pending cascades")?;
            let settled = service.process_queue();
            json!({ "recovered": recovered, "settled": settled })
        }
        Commands::Sweep => {
            let service = CascadeService::start(&conn, config.clone())
                .context("Failed to start cascade engine")?;
            let mut scheduler = MaintenanceScheduler::new(&config);
            let report = scheduler
                .tick(&service, now_epoch_ms())
                .context("Maintenance sweep failed")?;
            service.process_queue();
            info!(
                "event=cli_sweep module=cli status=ok retried={:?} pruned={:?}",
                report.retried, report.pruned
            );
            json!({ "retried": report.retried, "pruned": report.pruned })
        }
        Commands::History { var, status, limit } => {
            let master_var_id = var
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .context("Invalid master variable id")?;
            let service = CascadeService::new(&conn, config.clone());
            let entries = service
                .get_cascade_history(&CascadeHistoryQuery {
                    master_var_id,
                    status: status.map(Into::into),
                    limit,
                    ..CascadeHistoryQuery::default()
                })
                .context("Failed to query cascade history")?;
            serde_json::to_value(entries)?
        }
        Commands::Stats { window_days } => {
            let service = CascadeService::new(&conn, config.clone());
            let stats = service
                .get_cascade_stats(Some(window_days), now_epoch_ms())
                .context("Failed to compute cascade stats")?;
            serde_json::to_value(stats)?
        }
        Commands::Retry { log_id } => {
            let service = CascadeService::new(&conn, config.clone());
            service
                .retry_cascade(log_id)
                .with_context(|| format!("Failed to retry cascade {log_id}"))?;
            service.process_queue();
            serde_json::to_value(service.get_cascade_entry(log_id)?)?
        }
        Commands::Tasks => {
            let service = TaskService::new(SqliteTaskRepository::new(&conn));
            let counts = service
                .list_pending_tasks_by_type()
                .context("Failed to count pending tasks")?;
            serde_json::to_value(counts)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
