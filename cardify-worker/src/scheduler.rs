/// Scheduled backups
///
/// Runs a dump on a fixed interval, starting immediately, then prunes old
/// dumps. Each run is reported as a telemetry event: `backup.completed`
/// (action) or `backup.failed` (error).
///
/// # Example
///
/// ```no_run
/// use cardify_shared::telemetry::{BatcherConfig, EventBatcher};
/// use cardify_worker::backup::PgToolsRunner;
/// use cardify_worker::scheduler::{BackupScheduler, SchedulerConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let runner = Arc::new(PgToolsRunner::new("postgres://localhost/cardify", "pg_dump", "pg_restore"));
/// let scheduler = BackupScheduler::new(
///     runner,
///     SchedulerConfig {
///         backup_dir: "./backups".into(),
///         interval: Duration::from_secs(86_400),
///         retention: 7,
///     },
///     EventBatcher::new(BatcherConfig::default()),
/// );
///
/// let cancel = CancellationToken::new();
/// scheduler.run(cancel).await;
/// # }
/// ```

use crate::backup::{create_backup, prune_backups, BackupError, BackupInfo, BackupRunner};
use cardify_shared::telemetry::{AnalyticsEvent, EventBatcher, EventKind};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub backup_dir: PathBuf,
    pub interval: Duration,

    /// Dumps kept after each run
    pub retention: usize,
}

/// Outcome of one successful run
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub backup: BackupInfo,
    pub pruned: Vec<PathBuf>,
}

pub struct BackupScheduler {
    runner: Arc<dyn BackupRunner>,
    config: SchedulerConfig,
    telemetry: EventBatcher,
}

impl BackupScheduler {
    pub fn new(runner: Arc<dyn BackupRunner>, config: SchedulerConfig, telemetry: EventBatcher) -> Self {
        Self {
            runner,
            config,
            telemetry,
        }
    }

    /// One dump plus pruning
    ///
    /// Pruning only happens after a successful dump, so a failing database
    /// never eats into the kept history.
    pub async fn run_once(&self) -> Result<BackupReport, BackupError> {
        let started = tokio::time::Instant::now();

        let result = async {
            let backup = create_backup(self.runner.as_ref(), &self.config.backup_dir, Utc::now()).await?;
            let pruned = prune_backups(&self.config.backup_dir, self.config.retention).await?;
            Ok::<_, BackupError>(BackupReport { backup, pruned })
        }
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => {
                tracing::info!(
                    file = %report.backup.name,
                    size = report.backup.size,
                    pruned = report.pruned.len(),
                    elapsed_ms,
                    "Backup finished"
                );
                self.telemetry.track(
                    AnalyticsEvent::new(EventKind::Action, "backup.completed")
                        .with_property("file", report.backup.name.clone())
                        .with_property("bytes", report.backup.size)
                        .with_property("pruned", report.pruned.len())
                        .with_property("elapsedMs", elapsed_ms),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, elapsed_ms, "Backup failed");
                self.telemetry.track(
                    AnalyticsEvent::new(EventKind::Error, "backup.failed")
                        .with_property("error", e.to_string())
                        .with_property("elapsedMs", elapsed_ms),
                );
            }
        }

        result
    }

    /// Runs until `cancel` fires
    ///
    /// A run already in progress is finished before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            dir = %self.config.backup_dir.display(),
            interval_secs = self.config.interval.as_secs(),
            retention = self.config.retention,
            "Backup scheduler starting"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Failures are already logged and reported
                    let _ = self.run_once().await;
                }
            }
        }

        tracing::info!("Backup scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{list_backups, tests::FakeRunner};
    use cardify_shared::telemetry::BatcherConfig;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn scheduler(runner: Arc<FakeRunner>, dir: &TempDir, interval: Duration) -> BackupScheduler {
        BackupScheduler::new(
            runner,
            SchedulerConfig {
                backup_dir: dir.path().to_path_buf(),
                interval,
                retention: 2,
            },
            EventBatcher::new(BatcherConfig {
                max_batch_size: 100,
                ..BatcherConfig::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_run_once_reports_success() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let scheduler = scheduler(runner, &dir, Duration::from_secs(3600));

        let report = scheduler.run_once().await.unwrap();

        assert!(report.pruned.is_empty());
        assert!(report.backup.path.exists());
        assert_eq!(scheduler.telemetry.pending(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_existing_backups() {
        let dir = TempDir::new().unwrap();

        let good = scheduler(Arc::new(FakeRunner::default()), &dir, Duration::from_secs(3600));
        good.run_once().await.unwrap();

        let bad = scheduler(Arc::new(FakeRunner::failing()), &dir, Duration::from_secs(3600));
        assert!(bad.run_once().await.is_err());
        assert_eq!(bad.telemetry.pending(), 1);

        assert_eq!(list_backups(dir.path()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_repeats_and_prunes_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let scheduler = Arc::new(scheduler(runner.clone(), &dir, Duration::from_millis(20)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while runner.dumps.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler should keep dumping");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();

        let dumps = runner.dumps.load(Ordering::SeqCst);
        assert!(dumps >= 4);
        assert_eq!(list_backups(dir.path()).await.unwrap().len(), 2);
        assert_eq!(scheduler.telemetry.pending(), dumps);
    }
}
