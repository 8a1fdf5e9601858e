//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! The config is built once at start-up and handed to the engine's
//! constructors; nothing in the library reads it globally.

use crate::api::DispatchPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Backends in priority order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dispatch: DispatchPolicy,

    /// Per-backend fetch deadline; 0 disables it
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
}

fn default_fetch_timeout() -> u64 {
    10_000 // 10 seconds
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchPolicy::default(),
            fetch_timeout_ms: default_fetch_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        match self.fetch_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// One fixture-backed backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendConfig {
    pub name: String,

    /// JSON fixture file; relative paths resolve against the config file
    pub fixture: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        if let Some(base) = path.parent() {
            for backend in &mut config.backends {
                if backend.fixture.is_relative() {
                    backend.fixture = base.join(&backend.fixture);
                }
            }
        }

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("metrics-query").join("config.toml")),
            Some(PathBuf::from("/etc/metrics-query/config.toml")),
            Some(PathBuf::from("./metrics-query.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to load config");
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dispatch) = lookup("METRICS_QUERY_DISPATCH") {
            match DispatchPolicy::from_str(&dispatch) {
                Some(policy) => self.engine.dispatch = policy,
                None => tracing::warn!(value = %dispatch, "Ignoring unknown dispatch policy"),
            }
        }
        if let Some(timeout) = lookup("METRICS_QUERY_FETCH_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.engine.fetch_timeout_ms = ms;
            }
        }

        if let Some(level) = lookup("METRICS_QUERY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("METRICS_QUERY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# metrics-query Configuration
#
# Environment variables override these settings:
# - METRICS_QUERY_DISPATCH
# - METRICS_QUERY_FETCH_TIMEOUT_MS
# - METRICS_QUERY_LOG_LEVEL
# - METRICS_QUERY_LOG_FORMAT

[engine]
# How backends are consulted: sequential (first success wins)
# or parallel (fan out, merge successes slot by slot)
dispatch = "sequential"

# Deadline for a single backend fetch (ms), 0 to disable
fetch_timeout_ms = 10000

# Backends in priority order. Each serves a JSON fixture:
# { "metrics": { "cpu.load": [ { "tags": { "host": "web1" }, "points": [[0, 0.5]] } ] } }
#
# [[backends]]
# name = "primary"
# fixture = "primary.json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.dispatch, DispatchPolicy::Sequential);
        assert_eq!(config.engine.fetch_timeout(), Some(Duration::from_secs(10)));
        assert!(config.backends.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.engine.dispatch, DispatchPolicy::Sequential);
        assert_eq!(config.engine.fetch_timeout_ms, 10_000);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_file_resolves_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[engine]
dispatch = "parallel"
fetch_timeout_ms = 0

[[backends]]
name = "primary"
fixture = "primary.json"

[[backends]]
name = "archive"
fixture = "/srv/archive.json"
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.engine.dispatch, DispatchPolicy::Parallel);
        assert_eq!(config.engine.fetch_timeout(), None);
        assert_eq!(
            config.backends,
            vec![
                BackendConfig {
                    name: "primary".to_string(),
                    fixture: dir.path().join("primary.json"),
                },
                BackendConfig {
                    name: "archive".to_string(),
                    fixture: PathBuf::from("/srv/archive.json"),
                },
            ]
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/metrics-query.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[engine]\ndispatch = \"broadcast\"\n").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("METRICS_QUERY_DISPATCH", "Parallel"),
            ("METRICS_QUERY_FETCH_TIMEOUT_MS", "250"),
            ("METRICS_QUERY_LOG_LEVEL", "debug"),
            ("METRICS_QUERY_LOG_FORMAT", "json"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.dispatch, DispatchPolicy::Parallel);
        assert_eq!(config.engine.fetch_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "METRICS_QUERY_DISPATCH" => Some("broadcast".to_string()),
            "METRICS_QUERY_FETCH_TIMEOUT_MS" => Some("soon".to_string()),
            _ => None,
        });

        assert_eq!(config.engine.dispatch, DispatchPolicy::Sequential);
        assert_eq!(config.engine.fetch_timeout_ms, 10_000);
    }
}
