//! # Database Configuration
//!
//! Pool, commit and paging settings, built in code or loaded from
//! environment variables with fallback to defaults.
//!
//! ## Environment Variables
//! | Variable                          | Default        |
//! |-----------------------------------|----------------|
//! | `QUARRY_DB_PATH`                  | `./quarry.db`  |
//! | `QUARRY_DB_MAX_CONNECTIONS`       | `5`            |
//! | `QUARRY_DB_MIN_CONNECTIONS`       | `1`            |
//! | `QUARRY_DB_CONNECT_TIMEOUT_SECS`  | `30`           |
//! | `QUARRY_DB_RUN_MIGRATIONS`        | `true`         |
//! | `QUARRY_COMMIT_RETRIES`           | `3`            |
//! | `QUARRY_COMMIT_BACKOFF_MS`        | `50`           |
//! | `QUARRY_MAX_PAGE_SIZE`            | `100`          |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Path value that selects a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Database configuration.
///
/// ## Example
/// ```rust
/// use quarry_db::DbConfig;
///
/// let config = DbConfig::new("/path/to/quarry.db")
///     .max_connections(5)
///     .min_connections(1)
///     .commit_retries(5);
/// assert_eq!(config.commit_retries, 5);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or [`IN_MEMORY_PATH`].
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Every live unit of work holds one.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps idle
    /// connections open (required for in-memory databases).
    /// Default: 10 minutes
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,

    /// How many times a commit retries when the database is busy.
    /// Default: 3
    pub commit_retries: u32,

    /// First delay between commit retries; doubles on every attempt.
    /// Default: 50 ms
    pub commit_backoff: Duration,

    /// Largest page a `QueryRequest` may ask for.
    /// Default: 100
    pub max_page_size: u32,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// ## Arguments
    /// * `path` - Path to the SQLite database file. Will be created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
            commit_retries: 3,
            commit_backoff: Duration::from_millis(50),
            max_page_size: 100,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Sets the number of busy retries per commit.
    pub fn commit_retries(mut self, retries: u32) -> Self {
        self.commit_retries = retries;
        self
    }

    /// Sets the first busy-retry delay.
    pub fn commit_backoff(mut self, backoff: Duration) -> Self {
        self.commit_backoff = backoff;
        self
    }

    /// Sets the page size cap for query requests.
    pub fn max_page_size(mut self, max: u32) -> Self {
        self.max_page_size = max;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// Every connection of the pool sees the same database, so several
    /// units of work can be open at once. The database disappears with the
    /// pool.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 4,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
            commit_retries: 3,
            commit_backoff: Duration::from_millis(10),
            max_page_size: 100,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = lookup("QUARRY_DB_PATH").unwrap_or_else(|| "./quarry.db".to_string());
        let defaults = DbConfig::new(path);

        let config = DbConfig {
            max_connections: parse_or(
                &lookup,
                "QUARRY_DB_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            min_connections: parse_or(
                &lookup,
                "QUARRY_DB_MIN_CONNECTIONS",
                defaults.min_connections,
            )?,
            connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "QUARRY_DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            run_migrations: parse_or(&lookup, "QUARRY_DB_RUN_MIGRATIONS", defaults.run_migrations)?,
            commit_retries: parse_or(&lookup, "QUARRY_COMMIT_RETRIES", defaults.commit_retries)?,
            commit_backoff: Duration::from_millis(parse_or(
                &lookup,
                "QUARRY_COMMIT_BACKOFF_MS",
                defaults.commit_backoff.as_millis() as u64,
            )?),
            max_page_size: parse_or(&lookup, "QUARRY_MAX_PAGE_SIZE", defaults.max_page_size)?,
            ..defaults
        };

        if config.max_connections == 0 {
            return Err(ConfigError::InvalidValue("QUARRY_DB_MAX_CONNECTIONS".to_string()));
        }
        if config.min_connections > config.max_connections {
            return Err(ConfigError::InvalidValue("QUARRY_DB_MIN_CONNECTIONS".to_string()));
        }
        if config.max_page_size == 0 {
            return Err(ConfigError::InvalidValue("QUARRY_MAX_PAGE_SIZE".to_string()));
        }

        Ok(config)
    }
}

fn parse_or<V: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: V,
) -> Result<V, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .commit_backoff(Duration::from_millis(5));

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.commit_backoff, Duration::from_millis(5));
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = DbConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_path, PathBuf::from("./quarry.db"));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.commit_retries, 3);
        assert_eq!(config.max_page_size, 100);
        assert!(config.run_migrations);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = DbConfig::from_lookup(lookup(&[
            ("QUARRY_DB_PATH", "/var/lib/quarry.db"),
            ("QUARRY_DB_MAX_CONNECTIONS", "8"),
            ("QUARRY_DB_RUN_MIGRATIONS", "false"),
            ("QUARRY_COMMIT_BACKOFF_MS", "250"),
            ("QUARRY_MAX_PAGE_SIZE", " 50 "),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/quarry.db"));
        assert_eq!(config.max_connections, 8);
        assert!(!config.run_migrations);
        assert_eq!(config.commit_backoff, Duration::from_millis(250));
        assert_eq!(config.max_page_size, 50);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err =
            DbConfig::from_lookup(lookup(&[("QUARRY_COMMIT_RETRIES", "many")])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for QUARRY_COMMIT_RETRIES");

        let err = DbConfig::from_lookup(lookup(&[
            ("QUARRY_DB_MAX_CONNECTIONS", "2"),
            ("QUARRY_DB_MIN_CONNECTIONS", "3"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue(key) if key == "QUARRY_DB_MIN_CONNECTIONS"
        ));
    }
}
