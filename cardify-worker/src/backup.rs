/// Database dumps and restores
///
/// Dumps are PostgreSQL custom-format archives named
/// `cardify-<UTC timestamp>.dump`, written next to each other in one
/// directory. A dump is written under a `.partial` name and renamed once the
/// tool succeeds, so listing and pruning only ever see complete files.
///
/// # Example
///
/// ```no_run
/// use cardify_worker::backup::{create_backup, PgToolsRunner};
/// use chrono::Utc;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), cardify_worker::backup::BackupError> {
/// let runner = PgToolsRunner::new("postgres://localhost/cardify", "pg_dump", "pg_restore");
/// let info = create_backup(&runner, Path::new("./backups"), Utc::now()).await?;
/// println!("wrote {} ({} bytes)", info.name, info.size);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

const PREFIX: &str = "cardify-";
const EXTENSION: &str = ".dump";
const PARTIAL_SUFFIX: &str = ".partial";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Longest stderr excerpt kept in an error
const STDERR_LIMIT: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Backup file not found: {0}")]
    NotFound(PathBuf),
}

/// Performs the actual dump and restore
#[async_trait]
pub trait BackupRunner: Send + Sync {
    /// Writes a complete dump to `target`
    async fn dump(&self, target: &Path) -> Result<(), BackupError>;

    /// Loads `source` into the database, replacing existing objects
    async fn restore(&self, source: &Path) -> Result<(), BackupError>;
}

/// Shells out to `pg_dump` and `pg_restore`
pub struct PgToolsRunner {
    database_url: String,
    pg_dump: String,
    pg_restore: String,
}

impl PgToolsRunner {
    pub fn new(
        database_url: impl Into<String>,
        pg_dump: impl Into<String>,
        pg_restore: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            pg_dump: pg_dump.into(),
            pg_restore: pg_restore.into(),
        }
    }

    fn dump_command(&self, target: &Path) -> Command {
        let mut cmd = Command::new(&self.pg_dump);
        cmd.arg("--format=custom")
            .arg("--no-owner")
            .arg("--file")
            .arg(target)
            .arg("--dbname")
            .arg(&self.database_url);
        cmd
    }

    fn restore_command(&self, source: &Path) -> Command {
        let mut cmd = Command::new(&self.pg_restore);
        cmd.arg("--clean")
            .arg("--if-exists")
            .arg("--no-owner")
            .arg("--single-transaction")
            .arg("--dbname")
            .arg(&self.database_url)
            .arg(source);
        cmd
    }
}

async fn run_tool(tool: &str, mut cmd: Command) -> Result<(), BackupError> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| BackupError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let excerpt = match stderr.char_indices().nth(STDERR_LIMIT) {
        Some((cut, _)) => &stderr[..cut],
        None => stderr,
    };

    Err(BackupError::ToolFailed {
        tool: tool.to_string(),
        status: output.status.to_string(),
        stderr: excerpt.to_string(),
    })
}

#[async_trait]
impl BackupRunner for PgToolsRunner {
    async fn dump(&self, target: &Path) -> Result<(), BackupError> {
        run_tool(&self.pg_dump, self.dump_command(target)).await
    }

    async fn restore(&self, source: &Path) -> Result<(), BackupError> {
        run_tool(&self.pg_restore, self.restore_command(source)).await
    }
}

/// A complete dump file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// `cardify-20261019T101500123Z.dump` for that instant
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", PREFIX, at.format(TIMESTAMP_FORMAT), EXTENSION)
}

/// Timestamp encoded in a dump file name; `None` for anything else
pub fn parse_backup_file_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Dump files in `dir`, newest first
///
/// Other files, including unfinished dumps, are ignored. A missing
/// directory has no backups.
pub async fn list_backups(dir: &Path) -> Result<Vec<BackupInfo>, BackupError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut backups = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(created_at) = parse_backup_file_name(&name) else {
            continue;
        };

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        backups.push(BackupInfo {
            path: entry.path(),
            name,
            created_at,
            size: metadata.len(),
        });
    }

    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(backups)
}

/// Deletes all but the newest `retention` dumps
///
/// Returns the removed paths.
pub async fn prune_backups(dir: &Path, retention: usize) -> Result<Vec<PathBuf>, BackupError> {
    let backups = list_backups(dir).await?;
    let mut removed = Vec::new();

    for stale in backups.into_iter().skip(retention) {
        tokio::fs::remove_file(&stale.path).await?;
        tracing::info!(file = %stale.name, "Pruned old backup");
        removed.push(stale.path);
    }

    Ok(removed)
}

/// Dumps the database into `dir` with a name stamped `at`
pub async fn create_backup(
    runner: &dyn BackupRunner,
    dir: &Path,
    at: DateTime<Utc>,
) -> Result<BackupInfo, BackupError> {
    tokio::fs::create_dir_all(dir).await?;

    let name = backup_file_name(at);
    let path = dir.join(&name);
    let partial = dir.join(format!("{}{}", name, PARTIAL_SUFFIX));

    tracing::info!(file = %name, "Starting database dump");
    if let Err(e) = runner.dump(&partial).await {
        if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file = %partial.display(), error = %cleanup, "Could not remove partial dump");
            }
        }
        return Err(e);
    }

    tokio::fs::rename(&partial, &path).await?;
    let size = tokio::fs::metadata(&path).await?.len();
    tracing::info!(file = %name, size, "Database dump complete");

    Ok(BackupInfo {
        path,
        name,
        created_at: at,
        size,
    })
}

/// Restores the database from `file`
pub async fn restore_backup(runner: &dyn BackupRunner, file: &Path) -> Result<(), BackupError> {
    if !tokio::fs::try_exists(file).await? {
        return Err(BackupError::NotFound(file.to_path_buf()));
    }

    tracing::warn!(file = %file.display(), "Restoring database from backup");
    runner.restore(file).await?;
    tracing::info!(file = %file.display(), "Restore complete");
    Ok(())
}
