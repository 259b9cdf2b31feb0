//! Collector configuration.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. a TOML file (first CLI argument or `BUSRELAY_CONFIG`)
//! 3. environment variables, including a `.env` in the working directory

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use busrelay_collector::{BatchConfig, CollectorConfig, SerialSettings};
use busrelay_uplink::{LinkConfig, ReconnectConfig};

/// Collector configuration. Durations are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial device the ESP32 is attached to.
    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Pause between serial polls.
    #[serde(default = "default_read_interval")]
    pub read_interval: f64,

    /// Wait after opening the port while the board resets.
    #[serde(default = "default_serial_settle_delay")]
    pub serial_settle_delay: f64,

    #[serde(default = "default_server_ws_url")]
    pub server_ws_url: String,

    #[serde(default = "default_true")]
    pub batch_enabled: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_timeout")]
    pub batch_timeout: f64,

    #[serde(default = "default_base_reconnect_delay")]
    pub ws_base_reconnect_delay: f64,

    #[serde(default = "default_max_reconnect_delay")]
    pub ws_max_reconnect_delay: f64,

    #[serde(default = "default_ping_interval")]
    pub ws_ping_interval: u64,

    #[serde(default = "default_ping_timeout")]
    pub ws_ping_timeout: u64,

    /// Block startup until the server accepts a connection.
    #[serde(default)]
    pub wait_for_server: bool,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".into()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_interval() -> f64 {
    0.01
}

fn default_serial_settle_delay() -> f64 {
    2.0
}

fn default_server_ws_url() -> String {
    "ws://localhost:8000/ws".into()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_timeout() -> f64 {
    2.0
}

fn default_base_reconnect_delay() -> f64 {
    1.0
}

fn default_max_reconnect_delay() -> f64 {
    30.0
}

fn default_ping_interval() -> u64 {
    10
}

fn default_ping_timeout() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_interval: default_read_interval(),
            serial_settle_delay: default_serial_settle_delay(),
            server_ws_url: default_server_ws_url(),
            batch_enabled: default_true(),
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
            ws_base_reconnect_delay: default_base_reconnect_delay(),
            ws_max_reconnect_delay: default_max_reconnect_delay(),
            ws_ping_interval: default_ping_interval(),
            ws_ping_timeout: default_ping_timeout(),
            wait_for_server: false,
        }
    }
}

impl Config {
    /// Loads the file (if any), applies process environment overrides and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file read");
        Ok(config)
    }

    /// Overrides fields from variables such as `SERIAL_PORT` or `BATCH_SIZE`.
    /// A set but unparseable variable is an error.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("SERIAL_PORT") {
            self.serial_port = port;
        }
        if let Some(url) = lookup("SERVER_WS_URL") {
            self.server_ws_url = url;
        }
        override_from(&lookup, "BAUD_RATE", &mut self.baud_rate)?;
        override_from(&lookup, "READ_INTERVAL", &mut self.read_interval)?;
        override_from(&lookup, "SERIAL_SETTLE_DELAY", &mut self.serial_settle_delay)?;
        override_bool(&lookup, "BATCH_ENABLED", &mut self.batch_enabled)?;
        override_from(&lookup, "BATCH_SIZE", &mut self.batch_size)?;
        override_from(&lookup, "BATCH_TIMEOUT", &mut self.batch_timeout)?;
        override_from(
            &lookup,
            "WS_BASE_RECONNECT_DELAY",
            &mut self.ws_base_reconnect_delay,
        )?;
        override_from(
            &lookup,
            "WS_MAX_RECONNECT_DELAY",
            &mut self.ws_max_reconnect_delay,
        )?;
        override_from(&lookup, "WS_PING_INTERVAL", &mut self.ws_ping_interval)?;
        override_from(&lookup, "WS_PING_TIMEOUT", &mut self.ws_ping_timeout)?;
        override_bool(&lookup, "WAIT_FOR_SERVER", &mut self.wait_for_server)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.serial_port.trim().is_empty() {
            bail!("serial_port must not be empty");
        }
        if self.baud_rate == 0 {
            bail!("baud_rate must be positive");
        }
        if !(self.server_ws_url.starts_with("ws://") || self.server_ws_url.starts_with("wss://"))
        {
            bail!("server_ws_url must be a ws:// or wss:// URL, got {}", self.server_ws_url);
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        non_negative("read_interval", self.read_interval)?;
        non_negative("serial_settle_delay", self.serial_settle_delay)?;
        positive("batch_timeout", self.batch_timeout)?;
        positive("ws_base_reconnect_delay", self.ws_base_reconnect_delay)?;
        positive("ws_max_reconnect_delay", self.ws_max_reconnect_delay)?;
        if self.ws_max_reconnect_delay < self.ws_base_reconnect_delay {
            bail!(
                "ws_max_reconnect_delay ({}) is below ws_base_reconnect_delay ({})",
                self.ws_max_reconnect_delay,
                self.ws_base_reconnect_delay
            );
        }
        if self.ws_ping_interval == 0 || self.ws_ping_timeout == 0 {
            bail!("ws_ping_interval and ws_ping_timeout must be at least 1 second");
        }
        Ok(())
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            path: self.serial_port.clone(),
            baud_rate: self.baud_rate,
            settle_delay: secs(self.serial_settle_delay),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        let mut link = LinkConfig::new(self.server_ws_url.clone());
        link.ping_interval = Duration::from_secs(self.ws_ping_interval);
        link.ping_timeout = Duration::from_secs(self.ws_ping_timeout);
        link.reconnect = ReconnectConfig {
            base_delay: secs(self.ws_base_reconnect_delay),
            max_delay: secs(self.ws_max_reconnect_delay),
            ..ReconnectConfig::default()
        };
        link
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            enabled: self.batch_enabled,
            size: self.batch_size,
            timeout: secs(self.batch_timeout),
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            poll_interval: secs(self.read_interval),
            wait_for_server: self.wait_for_server,
        }
    }
}

/// Only called on values that passed [`Config::validate`].
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn positive(name: &str, value: f64) -> anyhow::Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a positive number of seconds, got {value}");
    }
    fits_duration(name, value)
}

fn non_negative(name: &str, value: f64) -> anyhow::Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("{name} must not be negative, got {value}");
    }
    fits_duration(name, value)
}

fn fits_duration(name: &str, value: f64) -> anyhow::Result<()> {
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .with_context(|| format!("{name} = {value} seconds is out of range"))
}

fn override_from<T, F>(lookup: &F, key: &str, target: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))?;
    }
    Ok(())
}

fn override_bool<F>(lookup: &F, key: &str, target: &mut bool) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => bail!("invalid {key}={raw:?}: expected true or false"),
        };
    }
    Ok(())
}
