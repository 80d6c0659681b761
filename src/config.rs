//! Configuration for lokiscope
//!
//! [`Config::load`] reads `~/.config/lokiscope/config.toml` (or an explicit
//! path). Every section and key is optional; anything left out falls back
//! to the built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use lokiscope_query::{DEFAULT_SELECTOR, LogcliStore, NoisePatterns};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub query: QueryConfig,
    pub noise: NoiseConfig,
}

/// `[store]` section: how to reach the log store
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Client executable
    pub command: String,
    /// Loki address, passed as `--addr`
    pub addr: Option<String>,
    /// Default result limit for one-shot queries
    pub limit: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            command: "logcli".to_string(),
            addr: None,
            limit: 100,
        }
    }
}

impl StoreConfig {
    pub fn client(&self) -> LogcliStore {
        let store = LogcliStore::new(&self.command);
        match &self.addr {
            Some(addr) => store.with_addr(addr),
            None => store,
        }
    }
}

/// `[query]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Stream selector every query starts from
    pub selector: String,
    /// Start of the time range when `--since` is not given
    pub since: Option<String>,
    /// Keep stream labels in the store output
    pub labels: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            selector: DEFAULT_SELECTOR.to_string(),
            since: None,
            labels: false,
        }
    }
}

/// `[noise]` section: regexes for the default exclusion terms
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseConfig {
    pub changelog: String,
    pub watcher: String,
    pub putlog: String,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            changelog: NoisePatterns::CHANGELOG.to_string(),
            watcher: NoisePatterns::WATCHER.to_string(),
            putlog: NoisePatterns::PUTLOG.to_string(),
        }
    }
}

impl NoiseConfig {
    pub fn patterns(&self) -> NoisePatterns {
        NoisePatterns {
            changelog: self.changelog.clone(),
            watcher: self.watcher.clone(),
            putlog: self.putlog.clone(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lokiscope").join("config.toml"))
    }

    /// Load from `path`, or from the default location
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.store.command, "logcli");
        assert_eq!(config.store.limit, 100);
        assert_eq!(config.query.selector, DEFAULT_SELECTOR);
        assert_eq!(config.noise.patterns(), NoisePatterns::default());
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
            [store]
            addr = "http://loki:3100"

            [query]
            selector = '{job="ring"}'
            since = "-2d"

            [noise]
            watcher = 'WATCHER:'
            "#,
        )
        .unwrap();
        assert_eq!(config.store.command, "logcli");
        assert_eq!(config.store.addr.as_deref(), Some("http://loki:3100"));
        assert_eq!(config.query.selector, r#"{job="ring"}"#);
        assert_eq!(config.query.since.as_deref(), Some("-2d"));
        assert_eq!(config.noise.watcher, "WATCHER:");
        assert_eq!(config.noise.changelog, NoisePatterns::CHANGELOG);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("[store]\nlimt = 5\n").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/lokiscope.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/lokiscope.toml"));
    }

    #[test]
    fn test_store_client_uses_addr() {
        let config = Config::parse("[store]\ncommand = \"/opt/logcli\"\naddr = \"http://l:3100\"\n")
            .unwrap();
        let store = config.store.client();
        assert_eq!(store.command(), "/opt/logcli");
    }
}
