/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: Database to dump and restore (required by `run`,
///   `backup` and `restore`)
/// - `BACKUP_DIR`: Where dump files live (default: `./backups`)
/// - `BACKUP_INTERVAL_SECS`: Time between scheduled dumps (default: 86400)
/// - `BACKUP_RETENTION`: Dump files kept after pruning (default: 7)
/// - `PG_DUMP_BIN` / `PG_RESTORE_BIN`: Tool paths (default: looked up on `PATH`)
/// - `ANALYTICS_URL`: Collector for backup events; logged locally when unset

use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Read through [`WorkerConfig::database_url`]
    pub database_url: Option<String>,
    pub backup_dir: PathBuf,
    pub interval: Duration,

    /// Always at least 1
    pub retention: usize,

    pub pg_dump_bin: String,
    pub pg_restore_bin: String,
    pub analytics_url: Option<String>,
}

fn var_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());

        let interval_secs: u64 = var_or("BACKUP_INTERVAL_SECS", 86_400)?;
        if interval_secs == 0 {
            anyhow::bail!("BACKUP_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            database_url,
            backup_dir: PathBuf::from(
                env::var("BACKUP_DIR").unwrap_or_else(|_| "./backups".to_string()),
            ),
            interval: Duration::from_secs(interval_secs),
            retention: var_or("BACKUP_RETENTION", 7usize)?.max(1),
            pg_dump_bin: env::var("PG_DUMP_BIN").unwrap_or_else(|_| "pg_dump".to_string()),
            pg_restore_bin: env::var("PG_RESTORE_BIN").unwrap_or_else(|_| "pg_restore".to_string()),
            analytics_url: env::var("ANALYTICS_URL").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    /// The database to dump or restore
    ///
    /// # Errors
    ///
    /// Fails when `DATABASE_URL` is unset; `list` never asks for it.
    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))
    }
}
