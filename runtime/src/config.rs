//! Runtime configuration.
//!
//! Values come from built-in defaults, then `~/.crawl-ingest/config.json` if
//! present, then `CRAWL_INGEST_*` environment variables. CLI flags are
//! applied last by the binary.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_HOME: &str = "CRAWL_INGEST_HOME";
pub const ENV_DB: &str = "CRAWL_INGEST_DB";
pub const ENV_USER_AGENT: &str = "CRAWL_INGEST_USER_AGENT";
pub const ENV_STAGING_TTL_SECS: &str = "CRAWL_INGEST_STAGING_TTL_SECS";
pub const ENV_CONCURRENCY: &str = "CRAWL_INGEST_CONCURRENCY";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "CRAWL_INGEST_REQUEST_TIMEOUT_SECS";

pub const DEFAULT_USER_AGENT: &str = "MindexBot";

/// Directory holding the config file and the default database.
pub fn ingest_home() -> PathBuf {
    if let Ok(p) = std::env::var(ENV_HOME) {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".crawl-ingest")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub db_path: PathBuf,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub staging_ttl_secs: u64,
    pub max_concurrent_flows: usize,
    /// Records per insert chunk.
    pub batch_size: usize,
    pub max_depth: usize,
    /// Keep staged payloads in memory instead of SQLite.
    pub memory_staging: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: ingest_home().join("ingest.db"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            staging_ttl_secs: 600,
            max_concurrent_flows: 8,
            batch_size: 5000,
            max_depth: 4,
            memory_staging: false,
        }
    }
}

impl IngestConfig {
    /// Defaults, then the home config file, then the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&ingest_home().join("config.json"))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read `path` over the defaults; a missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Override fields from environment variables looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(db) = lookup(ENV_DB) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(ua) = lookup(ENV_USER_AGENT) {
            self.user_agent = ua;
        }
        if let Some(v) = lookup(ENV_STAGING_TTL_SECS) {
            self.staging_ttl_secs = parse_env(ENV_STAGING_TTL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_CONCURRENCY) {
            self.max_concurrent_flows = parse_env(ENV_CONCURRENCY, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_env(ENV_REQUEST_TIMEOUT_SECS, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_flows == 0 {
            bail!("max_concurrent_flows must be at least 1");
        }
        if self.staging_ttl_secs == 0 {
            bail!("staging_ttl_secs must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent must not be empty");
        }
        Ok(())
    }

    pub fn staging_ttl(&self) -> Duration {
        Duration::from_secs(self.staging_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{key}={value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.staging_ttl(), Duration::from_secs(600));
        assert_eq!(config.batch_size, 5000);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"user_agent": "TestBot/2", "max_depth": 2}"#).unwrap();

        let config = IngestConfig::load_file(&path).unwrap();
        assert_eq!(config.user_agent, "TestBot/2");
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.max_concurrent_flows, 8);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::load_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DB, "/var/lib/ingest.db"),
            (ENV_CONCURRENCY, "16"),
            (ENV_STAGING_TTL_SECS, " 120 "),
        ]);
        let mut config = IngestConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/ingest.db"));
        assert_eq!(config.max_concurrent_flows, 16);
        assert_eq!(config.staging_ttl_secs, 120);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_env(|key| (key == ENV_CONCURRENCY).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CONCURRENCY));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = IngestConfig {
            max_concurrent_flows: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
        let config = IngestConfig {
            staging_ttl_secs: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
