use crate::intent::InterruptPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "respawn.toml";

/// Top-level configuration loaded from respawn.toml.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub debounce: DebounceConfig,
    pub shutdown: ShutdownConfig,
    pub respawn: RespawnConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub window_ms: u64,
    pub shutdown_threshold: u32,
    pub kill_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Delay between the graceful stop on cancellation and the forced kill.
    pub grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RespawnConfig {
    /// Runs shorter than this count as a crash loop.
    pub min_uptime_ms: u64,
    /// Pause before respawning after a crash-loop run.
    pub crash_delay_ms: u64,
}

// --- Default implementations ---

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: 200,
            shutdown_threshold: 2,
            kill_threshold: 5,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_ms: 3000 }
    }
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            min_uptime_ms: 1000,
            crash_delay_ms: 1000,
        }
    }
}

impl DebounceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn policy(&self) -> InterruptPolicy {
        InterruptPolicy {
            shutdown_threshold: self.shutdown_threshold,
            kill_threshold: self.kill_threshold,
        }
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl RespawnConfig {
    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    pub fn crash_delay(&self) -> Duration {
        Duration::from_millis(self.crash_delay_ms)
    }
}

impl SupervisorConfig {
    /// Reject settings the coordinator cannot interpret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.debounce;
        if d.window_ms == 0 {
            return Err(ConfigError::Invalid(
                "debounce.window_ms must be greater than zero".to_string(),
            ));
        }
        if d.shutdown_threshold < 2 {
            return Err(ConfigError::Invalid(format!(
                "debounce.shutdown_threshold must be at least 2 (got {})",
                d.shutdown_threshold
            )));
        }
        if d.kill_threshold <= d.shutdown_threshold {
            return Err(ConfigError::Invalid(format!(
                "debounce.kill_threshold ({}) must be greater than shutdown_threshold ({})",
                d.kill_threshold, d.shutdown_threshold
            )));
        }
        Ok(())
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read (or an explicit path is missing).
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not valid TOML for `SupervisorConfig`.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Load and validate configuration from `path`.
///
/// A missing file falls back to defaults unless `required` is set (the user
/// named the file explicitly).
pub fn load_config(path: &Path, required: bool) -> Result<SupervisorConfig, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            SupervisorConfig::default()
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = SupervisorConfig::default();
        assert_eq!(config.debounce.window(), Duration::from_millis(200));
        assert_eq!(config.debounce.policy(), InterruptPolicy::default());
        assert_eq!(config.shutdown.grace(), Duration::from_secs(3));
        assert_eq!(config.respawn.min_uptime(), Duration::from_secs(1));
        assert_eq!(config.respawn.crash_delay(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join(DEFAULT_CONFIG_FILE), false).unwrap();
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempdir().unwrap();
        let err = load_config(&dir.path().join("custom.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[shutdown]\ngrace_ms = 500\n").unwrap();

        let config = load_config(&path, false).unwrap();
        assert_eq!(config.shutdown.grace_ms, 500);
        assert_eq!(config.debounce, DebounceConfig::default());
        assert_eq!(config.respawn, RespawnConfig::default());
    }

    #[test]
    fn test_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[debounce]
window_ms = 350
shutdown_threshold = 3
kill_threshold = 7

[shutdown]
grace_ms = 10000

[respawn]
min_uptime_ms = 5000
crash_delay_ms = 2500
"#,
        )
        .unwrap();

        let config = load_config(&path, true).unwrap();
        assert_eq!(config.debounce.window_ms, 350);
        assert_eq!(config.debounce.policy().kill_threshold, 7);
        assert_eq!(config.shutdown.grace(), Duration::from_secs(10));
        assert_eq!(config.respawn.crash_delay(), Duration::from_millis(2500));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[debounce\nwindow_ms = ").unwrap();

        let err = load_config(&path, false).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = SupervisorConfig::default();
        config.debounce.window_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_thresholds_out_of_order_rejected() {
        let mut config = SupervisorConfig::default();
        config.debounce.kill_threshold = 2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("kill_threshold"));

        config.debounce.shutdown_threshold = 1;
        config.debounce.kill_threshold = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shutdown_threshold"));
    }

    #[test]
    fn test_invalid_values_in_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[debounce]\nshutdown_threshold = 6\n").unwrap();

        let err = load_config(&path, false).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
