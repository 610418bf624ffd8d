//! Daemon configuration.
//!
//! Configuration is validated at load time, with sensible defaults and
//! clear error messages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root directory for all persistent daemon state.
    pub root: PathBuf,

    /// Storage backend used for writable layers. Containers created with a
    /// different driver are ignored at restore.
    #[serde(default = "default_graph_driver")]
    pub graph_driver: String,

    /// Restart containers whose restart policy asks for it at boot.
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// How long a restarting container waits for each of its linked
    /// containers to come up first.
    #[serde(default = "default_restart_wait_timeout")]
    #[serde(with = "humantime_serde")]
    pub restart_wait_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL when the daemon shuts down.
    #[serde(default = "default_shutdown_timeout")]
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Directory for execution driver runtime state.
    #[serde(default)]
    pub exec_root: Option<PathBuf>,
}

fn default_graph_driver() -> String {
    "vfs".to_string()
}

fn default_true() -> bool {
    true
}

fn default_restart_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

impl DaemonConfig {
    /// Creates a configuration rooted at `root` with default settings.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            graph_driver: default_graph_driver(),
            auto_restart: default_true(),
            restart_wait_timeout: default_restart_wait_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            exec_root: None,
        }
    }

    /// Sets the graph driver.
    #[must_use]
    pub fn with_graph_driver(mut self, driver: impl Into<String>) -> Self {
        self.graph_driver = driver.into();
        self
    }

    /// Enables or disables boot-time auto-restart.
    #[must_use]
    pub const fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    /// Sets the per-link wait during boot-time restart.
    #[must_use]
    pub const fn with_restart_wait_timeout(mut self, timeout: Duration) -> Self {
        self.restart_wait_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(DaemonError::config("root cannot be empty"));
        }
        if self.graph_driver.is_empty() {
            return Err(DaemonError::config("graph_driver cannot be empty"));
        }
        if !self
            .graph_driver
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DaemonError::config(
                "graph_driver must contain only alphanumeric characters, hyphens, and underscores",
            ));
        }
        if self.restart_wait_timeout.is_zero() {
            return Err(DaemonError::config(
                "restart_wait_timeout must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DaemonError::config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DaemonError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding one subdirectory per container.
    #[must_use]
    pub fn repository(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// File backing the name graph.
    #[must_use]
    pub fn graph_path(&self) -> PathBuf {
        self.root.join("linkgraph.json")
    }

    /// Directory holding named volumes.
    #[must_use]
    pub fn volumes_root(&self) -> PathBuf {
        self.root.join("volumes")
    }

    /// Directory holding writable layers for the configured driver.
    #[must_use]
    pub fn layers_root(&self) -> PathBuf {
        self.root.join(&self.graph_driver)
    }

    /// Directory for execution driver state.
    #[must_use]
    pub fn exec_root(&self) -> PathBuf {
        self.exec_root
            .clone()
            .unwrap_or_else(|| self.root.join("exec"))
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = DaemonConfig::new("/var/lib/harbord");
        assert_eq!(config.graph_driver, "vfs");
        assert!(config.auto_restart);
        assert_eq!(config.restart_wait_timeout, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert!(config.exec_root.is_none());
    }

    #[test]
    fn test_derived_paths() {
        let config = DaemonConfig::new("/var/lib/harbord").with_graph_driver("overlay2");
        assert_eq!(config.repository(), PathBuf::from("/var/lib/harbord/containers"));
        assert_eq!(config.graph_path(), PathBuf::from("/var/lib/harbord/linkgraph.json"));
        assert_eq!(config.volumes_root(), PathBuf::from("/var/lib/harbord/volumes"));
        assert_eq!(config.layers_root(), PathBuf::from("/var/lib/harbord/overlay2"));
        assert_eq!(config.exec_root(), PathBuf::from("/var/lib/harbord/exec"));
    }

    #[test]
    fn test_validate() {
        assert!(DaemonConfig::new("/tmp/h").validate().is_ok());
        assert!(DaemonConfig::new("").validate().is_err());
        assert!(DaemonConfig::new("/tmp/h").with_graph_driver("").validate().is_err());
        assert!(
            DaemonConfig::new("/tmp/h")
                .with_graph_driver("../escape")
                .validate()
                .is_err()
        );
        assert!(
            DaemonConfig::new("/tmp/h")
                .with_restart_wait_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(
            &path,
            r#"
root = "/srv/harbord"
graph_driver = "overlay2"
auto_restart = false
restart_wait_timeout = "2s 500ms"
shutdown_timeout = "30s"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/harbord"));
        assert_eq!(config.graph_driver, "overlay2");
        assert!(!config.auto_restart);
        assert_eq!(config.restart_wait_timeout, Duration::from_millis(2500));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(&path, "root = \"/srv/harbord\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.graph_driver, "vfs");
        assert!(config.auto_restart);
        assert_eq!(config.restart_wait_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DaemonConfig::load("/nonexistent/harbord.toml").unwrap_err();
        assert!(err.is_fatal());
    }
}
