//! Server configuration: defaults, optional TOML file, then environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use busrelay_hub::{PingSettings, ServerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Dashboard directory. Served only when it exists.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default = "default_ping_interval")]
    pub ws_ping_interval: u64,

    #[serde(default = "default_ping_timeout")]
    pub ws_ping_timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
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
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            ws_ping_interval: default_ping_interval(),
            ws_ping_timeout: default_ping_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides from `HOST`, `PORT`, `STATIC_DIR`, `WS_PING_INTERVAL` and
    /// `WS_PING_TIMEOUT`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.static_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("PORT") {
            self.port = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT={raw:?}"))?;
        }
        if let Some(raw) = lookup("WS_PING_INTERVAL") {
            self.ws_ping_interval = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid WS_PING_INTERVAL={raw:?}"))?;
        }
        if let Some(raw) = lookup("WS_PING_TIMEOUT") {
            self.ws_ping_timeout = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid WS_PING_TIMEOUT={raw:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.ws_ping_interval == 0 || self.ws_ping_timeout == 0 {
            bail!("ws_ping_interval and ws_ping_timeout must be at least 1 second");
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        let static_dir = if self.static_dir.is_dir() {
            Some(self.static_dir.clone())
        } else {
            tracing::warn!(
                dir = %self.static_dir.display(),
                "static directory not found, dashboard disabled"
            );
            None
        };

        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            static_dir,
            ping: PingSettings {
                interval: Duration::from_secs(self.ws_ping_interval),
                timeout: Duration::from_secs(self.ws_ping_timeout),
            },
            ..ServerConfig::default()
        }
    }
}
