//! Service configuration
//!
//! Loaded from a TOML file, then overridden by environment variables:
//!
//! - `USAGE_STATS_CONFIG`: explicit path of the TOML file
//! - `CONFIG_DIR`: directory searched for `usage-stats.toml` when no explicit path is set
//! - `USAGE_STATS_CACHE_CAPACITY`: maximum cached query results (default: 100)
//! - `USAGE_STATS_CACHE_TTL_SECS`: staleness bound of cached results (default: 1800)
//! - `USAGE_STATS_PERSISTENCE_TIMEOUT_MS`: bound on each repository call (default: 60000)
//! - `USAGE_STATS_DATA_PATH`: JSON snapshot file; unset keeps counters in memory
//! - `USAGE_STATS_LOG_LEVEL`: default log level when `RUST_LOG` is unset (default: info)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "usage-stats.toml";

#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io { path: PathBuf, source: std::io::Error },
    /// Config file is not valid TOML for this schema
    Parse { path: PathBuf, source: toml::de::Error },
    /// Environment override could not be parsed
    Env { var: &'static str, value: String },
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "cannot parse config {}: {}", path.display(), source)
            }
            ConfigError::Env { var, value } => write!(f, "invalid value for {}: {:?}", var, value),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
    pub log: LogConfig,
}

/// Query cache bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached query results (default: 100)
    pub capacity: usize,
    /// Staleness bound for cached results (default: 30 minutes)
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
    /// How often expired entries are dropped in the background (default: 60s)
    #[serde(rename = "sweep_interval_secs", with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 100,
            ttl: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Bound on each repository call (default: 60s)
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    /// JSON snapshot file; `None` keeps counters in memory only
    pub data_path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            timeout: Duration::from_secs(60),
            data_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl StatsConfig {
    /// Configuration for tests (tiny cache, short TTL, short timeout)
    pub fn test() -> Self {
        StatsConfig {
            cache: CacheConfig {
                capacity: 8,
                ttl: Duration::from_secs(1),
                sweep_interval: Duration::from_millis(100),
            },
            persistence: PersistenceConfig {
                timeout: Duration::from_millis(200),
                data_path: None,
            },
            log: LogConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (if any) + environment overrides, validated
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::locate() {
            Some(path) => {
                info!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("USAGE_STATS_CONFIG") {
            return Some(PathBuf::from(path));
        }
        let candidate = PathBuf::from(std::env::var("CONFIG_DIR").ok()?).join(CONFIG_FILE_NAME);
        candidate.exists().then_some(candidate)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var, value })
        }

        if let Some(v) = lookup("USAGE_STATS_CACHE_CAPACITY") {
            self.cache.capacity = parse("USAGE_STATS_CACHE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("USAGE_STATS_CACHE_TTL_SECS") {
            self.cache.ttl = Duration::from_secs(parse("USAGE_STATS_CACHE_TTL_SECS", v)?);
        }
        if let Some(v) = lookup("USAGE_STATS_PERSISTENCE_TIMEOUT_MS") {
            self.persistence.timeout =
                Duration::from_millis(parse("USAGE_STATS_PERSISTENCE_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("USAGE_STATS_DATA_PATH") {
            self.persistence.data_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("USAGE_STATS_LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be >= 1".to_string()));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::Invalid("cache.ttl_secs must be >= 1".to_string()));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cache.sweep_interval_secs must be >= 1".to_string(),
            ));
        }
        if self.persistence.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "persistence.timeout_ms must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = StatsConfig::default();
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.cache.ttl, Duration::from_secs(1800));
        assert_eq!(config.persistence.timeout, Duration::from_secs(60));
        assert!(config.persistence.data_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: StatsConfig = toml::from_str(
            r#"
            [cache]
            ttl_secs = 60

            [persistence]
            data_path = "/var/lib/usage-stats/server.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(
            config.persistence.data_path,
            Some(PathBuf::from("/var/lib/usage-stats/server.json"))
        );
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[cache]\ncapacity = 10\n\n[persistence]\ntimeout_ms = 250\n\n[log]\njson = true\n",
        )
        .unwrap();

        let config = StatsConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.persistence.timeout, Duration::from_millis(250));
        assert!(config.log.json);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[cache]\ncapacity = \"many\"\n").unwrap();
        assert!(matches!(
            StatsConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("USAGE_STATS_CACHE_CAPACITY", "5"),
            ("USAGE_STATS_CACHE_TTL_SECS", "30"),
            ("USAGE_STATS_DATA_PATH", "/tmp/stats.json"),
        ]
        .into_iter()
        .collect();

        let mut config = StatsConfig::default();
        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.cache.capacity, 5);
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert_eq!(
            config.persistence.data_path,
            Some(PathBuf::from("/tmp/stats.json"))
        );
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = StatsConfig::default();
        let err = config
            .apply_env(|var| (var == "USAGE_STATS_CACHE_CAPACITY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "USAGE_STATS_CACHE_CAPACITY",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = StatsConfig::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = StatsConfig::default();
        config.persistence.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
