//! Client configuration.
//!
//! Searches for a config file in order:
//!
//! 1. Explicit path (e.g. `--config`)
//! 2. `RCON_CONFIG` environment variable
//! 3. `<config dir>/jsonapi-rcon/config.json`
//!
//! Falls back to built-in defaults if no file is found. Every field is
//! optional in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::rcon::auth::Credentials;
use crate::rcon::correlator::COMMAND_TIMEOUT;
use crate::rcon::supervisor::RECONNECT_DELAY;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "RCON_CONFIG";

/// Settings for one RCON client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub salt: String,

    // Timing
    pub command_timeout_ms: u64,
    pub reconnect_delay_ms: u64,

    // Behavior on connection loss
    /// Fail commands still waiting on a connection when it closes, instead
    /// of letting them run into their timeout.
    pub fail_pending_on_close: bool,
    /// Send every active subscription again on each new connection.
    pub resubscribe_on_reconnect: bool,

    /// Start connecting as soon as the client is built.
    pub connect_on_start: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 20059,
            username: String::new(),
            password: String::new(),
            salt: String::new(),
            command_timeout_ms: COMMAND_TIMEOUT.as_millis() as u64,
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            fail_pending_on_close: true,
            resubscribe_on_reconnect: true,
            connect_on_start: true,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials())
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("fail_pending_on_close", &self.fail_pending_on_close)
            .field("resubscribe_on_reconnect", &self.resubscribe_on_reconnect)
            .field("connect_on_start", &self.connect_on_start)
            .finish()
    }
}

impl ClientConfig {
    /// Create a config for a server with the given credentials.
    pub fn new(host: &str, port: u16, credentials: Credentials) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: credentials.username,
            password: credentials.password,
            salt: credentials.salt,
            ..Default::default()
        }
    }

    /// Load from the first config file found, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly configured file (argument or
    /// `RCON_CONFIG`) is missing, or if any found file is not valid JSON.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            tracing::info!("Using config from {}: {}", CONFIG_ENV, path);
            return Self::from_file(Path::new(&path));
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Using config at {}", path.display());
                Self::from_file(&path)
            }
            _ => {
                tracing::debug!("No config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password, &self.salt)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Set both fixed delays.
    pub fn with_timing(mut self, command_timeout: Duration, reconnect_delay: Duration) -> Self {
        self.command_timeout_ms = command_timeout.as_millis() as u64;
        self.reconnect_delay_ms = reconnect_delay.as_millis() as u64;
        self
    }
}

/// Default config file location for this platform.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jsonapi-rcon").join("config.json"))
}
