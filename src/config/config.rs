//! Configuration for the failure pipeline
//!
//! Loaded from a TOML file. Every field has a default so an empty file, or
//! no file at all, yields a working debug-free configuration that logs
//! reports instead of mailing them.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub application: ApplicationConfig,
    pub notification: NotificationConfig,
}

/// Facts about the application being watched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Display name used in report subjects
    pub name: String,
    /// Debug deployments never send notifications
    pub debug: bool,
    /// Host identifier attached to every record
    pub server_name: Option<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "application".to_string(),
            debug: false,
            server_name: None,
        }
    }
}

/// Where and how often reports are sent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Address that receives every report
    pub recipient: String,
    /// Length of one aggregation window
    pub window_seconds: u64,
    pub transport: TransportConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            recipient: "root@localhost".to_string(),
            window_seconds: 300,
            transport: TransportConfig::default(),
        }
    }
}

/// Mail transport selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Write reports to the log
    #[default]
    Log,
    /// Pipe reports into a sendmail-compatible binary
    Sendmail {
        #[serde(default = "default_sendmail_path")]
        path: PathBuf,
        #[serde(default)]
        from: Option<String>,
    },
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

/// Environment variable that forces debug mode on or off
pub const ENV_DEBUG: &str = "FAILMAIL_DEBUG";
/// Environment variable that overrides the recipient
pub const ENV_RECIPIENT: &str = "FAILMAIL_RECIPIENT";
/// Environment variable that overrides the application name
pub const ENV_APPLICATION_NAME: &str = "FAILMAIL_APPLICATION_NAME";

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file can't be read, a TOML
    /// error if it can't be parsed, or `ConfigError::ValidationError` if a
    /// value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` when the debug override isn't a
    /// boolean, or a validation error when the result is invalid.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.application.debug = parse_bool(&debug).ok_or_else(|| {
                ConfigError::ParseError(format!("{} must be a boolean, got '{}'", ENV_DEBUG, debug))
            })?;
        }
        if let Some(recipient) = lookup(ENV_RECIPIENT) {
            self.notification.recipient = recipient;
        }
        if let Some(name) = lookup(ENV_APPLICATION_NAME) {
            self.application.name = name;
        }
        self.validate()
    }

    /// Check values that serde can't
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification.window_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "notification.window_seconds must be greater than zero".to_string(),
            ));
        }

        if self.application.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "application.name must not be empty".to_string(),
            ));
        }

        // The recipient only matters when reports are actually sent
        if !self.application.debug {
            let recipient = self.notification.recipient.trim();
            if recipient.is_empty() || !recipient.contains('@') {
                return Err(ConfigError::ValidationError(format!(
                    "notification.recipient is not a mail address: '{}'",
                    self.notification.recipient
                )));
            }
        }

        Ok(())
    }

    /// Aggregation window as a `Duration`
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.notification.window_seconds)
    }

    /// Whether reports are sent at all
    pub fn notifications_enabled(&self) -> bool {
        !self.application.debug
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
