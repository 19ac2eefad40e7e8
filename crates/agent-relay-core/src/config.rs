//! Relay configuration.
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`~/.config/agent-relay/config.toml`)
//! 3. Built-in defaults (lowest priority)

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{poll_loop::DEFAULT_POLL_INTERVAL, scroll::DEFAULT_SCROLL_THRESHOLD};

/// Service root used when nothing is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

const ENV_BASE_URL: &str = "AGENT_RELAY_URL";
const ENV_POLL_INTERVAL: &str = "AGENT_RELAY_POLL_INTERVAL_MS";
const ENV_SCROLL_THRESHOLD: &str = "AGENT_RELAY_SCROLL_THRESHOLD";
const ENV_REQUEST_TIMEOUT: &str = "AGENT_RELAY_REQUEST_TIMEOUT";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Root URL of the relay service; endpoint paths are appended to it.
    pub base_url: String,
    /// Cadence of the shell readiness probe.
    pub poll_interval: Duration,
    /// Auto-scroll threshold for log viewers.
    pub scroll_threshold: u32,
    /// Upper bound on a single HTTP call. `None` leaves latency to the service.
    pub request_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            scroll_threshold: DEFAULT_SCROLL_THRESHOLD,
            request_timeout: None,
        }
    }
}

/// On-disk shape; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    scroll_threshold: Option<u32>,
    request_timeout_secs: Option<u64>,
}

impl RelayConfig {
    /// Default config file path: `~/.config/agent-relay/config.toml`.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("agent-relay").join("config.toml"))
    }

    /// Load from the default path (if present) and the process environment.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed, or a
    /// value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match Self::config_path() {
            Some(path) => read_file_config(&path, true)?,
            None => FileConfig::default(),
        };
        resolve(file, |key| std::env::var(key).ok())
    }

    /// Load from an explicit file and the process environment.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or a value is out
    /// of range.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = read_file_config(path, false)?;
        resolve(file, |key| std::env::var(key).ok())
    }

    /// Build from TOML text with a custom environment lookup.
    ///
    /// # Errors
    /// Returns error if the text does not parse or a value is out of range.
    pub fn from_toml_str<F>(contents: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        resolve(file, env)
    }
}

fn read_file_config(path: &Path, optional: bool) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(FileConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn resolve<F>(file: FileConfig, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = RelayConfig::default();

    let base_url = env(ENV_BASE_URL)
        .or(file.base_url)
        .unwrap_or(defaults.base_url)
        .trim_end_matches('/')
        .to_string();
    if base_url.is_empty() {
        return Err(ConfigError::Invalid {
            key: "base_url",
            reason: "must not be empty".to_string(),
        });
    }

    let poll_interval_ms = match env(ENV_POLL_INTERVAL) {
        Some(raw) => parse_env(ENV_POLL_INTERVAL, &raw)?,
        None => file
            .poll_interval_ms
            .unwrap_or(u64::try_from(defaults.poll_interval.as_millis()).unwrap_or(1000)),
    };
    if poll_interval_ms == 0 {
        return Err(ConfigError::Invalid {
            key: "poll_interval_ms",
            reason: "must be greater than zero".to_string(),
        });
    }

    let scroll_threshold = match env(ENV_SCROLL_THRESHOLD) {
        Some(raw) => parse_env(ENV_SCROLL_THRESHOLD, &raw)?,
        None => file.scroll_threshold.unwrap_or(defaults.scroll_threshold),
    };

    let request_timeout_secs = match env(ENV_REQUEST_TIMEOUT) {
        Some(raw) => Some(parse_env(ENV_REQUEST_TIMEOUT, &raw)?),
        None => file.request_timeout_secs,
    };

    Ok(RelayConfig {
        base_url,
        poll_interval: Duration::from_millis(poll_interval_ms),
        scroll_threshold,
        request_timeout: request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    })
}

fn parse_env<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{raw:?}: {e}"),
    })
}
