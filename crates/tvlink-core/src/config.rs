/*!
 * Configuration management for tvlink.
 *
 * Configuration is layered: compiled-in defaults, then an optional file,
 * then environment variables (`TVLINK__SESSION__CONNECT_TIMEOUT_MS=...`).
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Cast adapter configuration
    #[serde(default)]
    pub cast: CastConfig,

    /// webOS pointer adapter configuration
    #[serde(default)]
    pub webos: WebOsConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_true")]
    pub with_target: bool,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on the transport handshake in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on graceful teardown in milliseconds; exceeding it forces `Idle`
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    /// Per-command bound in milliseconds overriding the adapter's own (0 keeps the adapter's)
    #[serde(default)]
    pub command_timeout_ms: u64,

    /// Reconnect policy override; when absent the adapter's policy applies
    #[serde(default)]
    pub reconnect: Option<ReconnectConfig>,

    /// Capacity of the per-session event channels
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Reconnect policy override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Whether the session reconnects by itself after a transport loss
    #[serde(default)]
    pub automatic: bool,

    /// Maximum number of reconnect attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first attempt in milliseconds; doubles per attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the delay between attempts in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Cast adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastConfig {
    /// Receiver application started for media sessions
    #[serde(default = "default_receiver_app_id")]
    pub receiver_app_id: String,

    /// Bound on a single session API call in milliseconds
    #[serde(default = "default_cast_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// webOS pointer adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebOsConfig {
    /// Port of the TV's pointer input socket when no socket URL was discovered
    #[serde(default = "default_pointer_port")]
    pub pointer_port: u16,

    /// Path of the pointer input socket when no socket URL was discovered
    #[serde(default = "default_pointer_path")]
    pub pointer_path: String,
}

impl SessionConfig {
    /// Handshake bound as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Teardown bound as a duration
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Command bound override, if any
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            command_timeout_ms: 0,
            reconnect: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            automatic: false,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            receiver_app_id: default_receiver_app_id(),
            command_timeout_ms: default_cast_command_timeout_ms(),
        }
    }
}

impl Default for WebOsConfig {
    fn default() -> Self {
        Self {
            pointer_port: default_pointer_port(),
            pointer_path: default_pointer_path(),
        }
    }
}

fn default_app_name() -> String {
    "tvlink".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_disconnect_timeout_ms() -> u64 {
    3_000
}

fn default_event_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

// Default Media Receiver
fn default_receiver_app_id() -> String {
    "CC1AD845".to_string()
}

fn default_cast_command_timeout_ms() -> u64 {
    10_000
}

fn default_pointer_port() -> u16 {
    3000
}

fn default_pointer_path() -> String {
    "/resources/pointer".to_string()
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            return Ok(config);
        }

        let defaults = ConfigLib::try_from(&Config::default())
            .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?;
        let mut builder = ConfigLib::builder().add_source(defaults);

        if let Some(config_file) = self.config_file {
            if Path::new(&config_file).exists() {
                debug!("Loading configuration from {}", config_file);
                builder = builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "tvlink");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.command_timeout(), None);
        assert!(config.session.reconnect.is_none());
        assert_eq!(config.cast.receiver_app_id, "CC1AD845");
        assert_eq!(config.webos.pointer_port, 3000);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.app_name, "tvlink");
        assert_eq!(config.session.disconnect_timeout_ms, 3_000);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("tvlink.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [session]
                connect_timeout_ms = 2500
                command_timeout_ms = 750

                [session.reconnect]
                automatic = true
                max_attempts = 5

                [cast]
                receiver_app_id = "ABCDEF12"
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.session.connect_timeout_ms, 2500);
        assert_eq!(config.session.command_timeout(), Some(Duration::from_millis(750)));
        let reconnect = config.session.reconnect.expect("reconnect section");
        assert!(reconnect.automatic);
        assert_eq!(reconnect.max_attempts, 5);
        assert_eq!(reconnect.base_delay_ms, 500);
        assert_eq!(config.cast.receiver_app_id, "ABCDEF12");
        assert_eq!(config.logging.level, "info");

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_uses_defaults() -> Result<()> {
        let config = ConfigBuilder::new()
            .with_config_file("/nonexistent/tvlink.toml")
            .build()?;
        assert_eq!(config.session.connect_timeout_ms, 10_000);
        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("TVLINKTEST__SESSION__DISCONNECT_TIMEOUT_MS", "1200");
        env::set_var("TVLINKTEST__LOGGING__LEVEL", "trace");

        let config = ConfigBuilder::new()
            .with_environment_prefix("tvlinktest")
            .build()?;

        assert_eq!(config.session.disconnect_timeout_ms, 1200);
        assert_eq!(config.logging.level, "trace");

        env::remove_var("TVLINKTEST__SESSION__DISCONNECT_TIMEOUT_MS");
        env::remove_var("TVLINKTEST__LOGGING__LEVEL");

        Ok(())
    }

    #[test]
    fn test_override_with() -> Result<()> {
        let mut custom = Config::default();
        custom.session.connect_timeout_ms = 1;
        let config = ConfigBuilder::new().override_with(custom).build()?;
        assert_eq!(config.session.connect_timeout_ms, 1);
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.app_name, "tvlink");
    }
}
