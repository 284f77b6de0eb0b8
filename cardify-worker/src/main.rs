//! # Cardify Worker
//!
//! Database backup job runner.
//!
//! ## Usage
//!
//! ```bash
//! cardify-worker run                  # scheduled dumps until Ctrl-C
//! cardify-worker backup               # one dump now
//! cardify-worker list                 # dumps on disk, newest first
//! cardify-worker restore FILE --yes   # replace the database from a dump
//! ```

use cardify_shared::telemetry::{
    BatcherConfig, EventBatcher, EventSink, HttpSink, HttpSinkConfig, TracingSink,
};
use cardify_worker::{
    backup::{list_backups, restore_backup, PgToolsRunner},
    config::WorkerConfig,
    scheduler::{BackupScheduler, SchedulerConfig},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cardify-worker")]
#[command(version, about = "Backup job runner for the Cardify database")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scheduled backups until interrupted (default)
    Run,

    /// Take one backup now and prune old ones
    Backup,

    /// Restore the database from a dump file
    Restore {
        file: PathBuf,

        /// Confirm that existing data will be replaced
        #[arg(long)]
        yes: bool,
    },

    /// List dump files, newest first
    List,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardify_worker=debug,cardify_shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn event_sink(config: &WorkerConfig) -> anyhow::Result<Arc<dyn EventSink>> {
    Ok(match &config.analytics_url {
        Some(url) => Arc::new(HttpSink::new(HttpSinkConfig::new(url.clone()))?),
        None => Arc::new(TracingSink),
    })
}

fn runner(config: &WorkerConfig) -> anyhow::Result<PgToolsRunner> {
    Ok(PgToolsRunner::new(
        config.database_url()?,
        config.pg_dump_bin.clone(),
        config.pg_restore_bin.clone(),
    ))
}

fn scheduler(config: &WorkerConfig, telemetry: EventBatcher) -> anyhow::Result<BackupScheduler> {
    let runner = runner(config)?;

    Ok(BackupScheduler::new(
        Arc::new(runner),
        SchedulerConfig {
            backup_dir: config.backup_dir.clone(),
            interval: config.interval,
            retention: config.retention,
        },
        telemetry,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env()?;

    tracing::info!("Cardify Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let sink = event_sink(&config)?;
            let telemetry = EventBatcher::new(BatcherConfig::default());
            let scheduler = scheduler(&config, telemetry.clone())?;
            let flush_cancel = CancellationToken::new();
            let flusher = telemetry.spawn(sink, flush_cancel.clone());

            // A dump in progress finishes before the scheduler returns
            let stop = CancellationToken::new();
            tokio::spawn({
                let stop = stop.clone();
                async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Could not listen for shutdown signal");
                        return;
                    }
                    tracing::info!("Shutdown signal received");
                    stop.cancel();
                }
            });

            scheduler.run(stop).await;

            flush_cancel.cancel();
            flusher.await?;
        }
        Command::Backup => {
            let sink = event_sink(&config)?;
            let telemetry = EventBatcher::new(BatcherConfig::default());
            let report = scheduler(&config, telemetry.clone())?.run_once().await;
            telemetry.flush(sink.as_ref()).await;

            let report = report?;
            println!("{} ({} bytes)", report.backup.path.display(), report.backup.size);
            for path in report.pruned {
                println!("pruned {}", path.display());
            }
        }
        Command::Restore { file, yes } => {
            if !yes {
                anyhow::bail!(
                    "Restoring replaces the current database. Re-run with --yes to confirm."
                );
            }
            restore_backup(&runner(&config)?, &file).await?;
            println!("restored {}", file.display());
        }
        Command::List => {
            let backups = list_backups(&config.backup_dir).await?;
            if backups.is_empty() {
                println!("no backups in {}", config.backup_dir.display());
            }
            for backup in backups {
                println!(
                    "{}  {:>12}  {}",
                    backup.created_at.to_rfc3339(),
                    backup.size,
                    backup.name
                );
            }
        }
    }

    Ok(())
}
