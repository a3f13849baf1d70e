//! Configuration management for layerfetch.
//!
//! Configuration is read from `~/.config/layerfetch/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::app::RetrievalError;
use crate::cache::disk::DEFAULT_EXPIRY;
use crate::retriever::HttpConfig;
use crate::service::{DEFAULT_RETRY_BACKOFF, DEFAULT_WORKERS};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub cache: CacheConfig,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Retrievals allowed to run at once
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_attempts: 1,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Overrides the platform cache directory
    pub directory: Option<PathBuf>,
    pub expiry_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            expiry_secs: DEFAULT_EXPIRY.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Configured directory, or `~/.cache/layerfetch`.
    pub fn directory(&self) -> Result<PathBuf, ConfigError> {
        match self.directory {
            Some(ref dir) => Ok(dir.clone()),
            None => {
                let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoCacheDir)?;
                Ok(cache_dir.join("layerfetch"))
            }
        }
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Whole-request timeout applied to each retrieval
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: None,
        }
    }
}

impl HttpSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn to_http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/layerfetch/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("layerfetch").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# layerfetch configuration

[service]
# Maximum number of retrievals running at once
workers = 10

# Tries per retrieval for transient failures (5xx, timeouts, connection
# errors). 1 disables retrying.
max_attempts = 1

# Delay before the first retry; grows linearly with each attempt
retry_backoff_ms = 500

[cache]
enabled = true

# Where cached bodies are kept. Defaults to the platform cache directory.
# directory = "/var/cache/layerfetch"

# Entries older than this are revalidated with the source (seconds)
expiry_secs = 86400

[http]
# Whole-request timeout (seconds)
timeout_secs = 30

# TCP connect timeout (seconds)
connect_timeout_secs = 10

# user_agent = "layerfetch"
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine cache directory")]
    NoCacheDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl From<ConfigError> for RetrievalError {
    fn from(e: ConfigError) -> Self {
        RetrievalError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let config: Config = toml::from_str(Config::default_config_content())
            .expect("Default config should be valid TOML");

        assert_eq!(config.service.workers, DEFAULT_WORKERS);
        assert_eq!(config.service.max_attempts, 1);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.expiry(), DEFAULT_EXPIRY);
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[service]
max_attempts = 4

[cache]
directory = "/tmp/layers"
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.service.max_attempts, 4);
        assert_eq!(config.service.workers, DEFAULT_WORKERS);
        assert_eq!(config.cache.directory().unwrap(), PathBuf::from("/tmp/layers"));
        assert_eq!(config.http.connect_timeout_secs, 10);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.service.retry_backoff_ms, 500);
        assert!(config.http.user_agent.is_none());
        assert!(config
            .http
            .to_http_config()
            .user_agent
            .starts_with("layerfetch/"));
    }

    #[test]
    fn test_user_agent_override() {
        let config: Config = toml::from_str("[http]\nuser_agent = \"atlas/2\"\n").unwrap();
        let http = config.http.to_http_config();
        assert_eq!(http.user_agent, "atlas/2");
        assert_eq!(http.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.service.workers, DEFAULT_WORKERS);

        // Second load parses the file just written
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.cache.expiry_secs, config.cache.expiry_secs);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[service]\nworkers = \"many\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
