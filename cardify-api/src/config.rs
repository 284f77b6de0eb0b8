/// Configuration management for the API server
///
/// Loaded from environment variables (a `.env` file is honored).
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `JWT_SECRET`: HS256 signing key, at least 32 characters (required)
/// - `API_HOST` / `API_PORT`: Bind address (default: 0.0.0.0:8080)
/// - `CORS_ORIGINS`: Comma-separated origins, `*` for any (default: `*`)
/// - `PRODUCTION`: Enables HSTS (default: false)
/// - `RATE_LIMIT_PER_MINUTE`: Requests per caller per minute (default: 120)
/// - `TRUSTED_PROXIES`: Comma-separated proxy IPs whose `X-Forwarded-For`
///   is believed (default: none)
/// - `REDIS_URL`: Persistent cache tier; memory only when unset
/// - `CACHE_MAX_ENTRIES`: Memory tier capacity (default: 500)
/// - `CACHE_TTL_SECS`: Default cache TTL (default: 300)
/// - `ANALYTICS_BATCH_SIZE`: Events per telemetry batch (default: 10)
/// - `ANALYTICS_FLUSH_SECS`: Telemetry flush interval (default: 30)
///
/// # Example
///
/// ```no_run
/// use cardify_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use anyhow::Context;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub cache: CacheSettings,
    pub analytics: AnalyticsSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `["*"]` allows any
    pub cors_origins: Vec<String>,

    /// Production mode turns on HSTS
    pub production: bool,

    /// Token bucket size and refill per minute, per caller
    pub rate_limit_per_minute: u32,

    /// Peers allowed to report the client address in `X-Forwarded-For`
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    pub max_entries: usize,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

/// Reads `name`, falling back to `default` when unset
fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable is required", name))
}

/// Splits a comma-separated origin list, dropping blanks
/// Parses a comma-separated IP list
pub fn parse_proxies(raw: &str) -> anyhow::Result<Vec<IpAddr>> {
    parse_origins(raw)
        .iter()
        .map(|ip| {
            ip.parse()
                .with_context(|| format!("TRUSTED_PROXIES entry {:?} is not an IP address", ip))
        })
        .collect()
}

pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value doesn't
    /// parse, or `JWT_SECRET` is shorter than 32 characters.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let cors_origins = parse_origins(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()));

        Ok(Self {
            api: ApiConfig {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("API_PORT", 8080)?,
                cors_origins,
                production: var_or("PRODUCTION", false)?,
                rate_limit_per_minute: var_or("RATE_LIMIT_PER_MINUTE", 120)?,
                trusted_proxies: parse_proxies(&env::var("TRUSTED_PROXIES").unwrap_or_default())?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig { secret: jwt_secret },
            cache: CacheSettings {
                redis_url: env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
                max_entries: var_or("CACHE_MAX_ENTRIES", 500)?,
                ttl: Duration::from_secs(var_or("CACHE_TTL_SECS", 300)?),
            },
            analytics: AnalyticsSettings {
                batch_size: var_or("ANALYTICS_BATCH_SIZE", 10)?,
                flush_interval: Duration::from_secs(var_or("ANALYTICS_FLUSH_SECS", 30)?),
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.api.cors_origins.iter().any(|o| o == "*")
    }
}
