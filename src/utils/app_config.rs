/// Application configuration management
/// Stores settings in ~/.config/aperture/config.toml
///
/// Precedence, lowest first: built-in defaults, the config file, environment
/// variables (including a `.env` file loaded at startup), CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hub::{ProducerSettings, SessionSettings};
use crate::utils::constants::*;
use crate::utils::helpers::humantime_duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub hub: HubSection,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub static_path: PathBuf,
    /// Serve generated telemetry instead of reading the host and Docker
    pub demo_mode: bool,
    pub cors: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            static_path: PathBuf::from(DEFAULT_STATIC_PATH),
            demo_mode: false,
            cors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    #[serde(with = "humantime_duration")]
    pub system_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub container_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub source_timeout: Duration,
    pub send_queue_capacity: usize,
    #[serde(with = "humantime_duration")]
    pub ping_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub pong_wait: Duration,
    #[serde(with = "humantime_duration")]
    pub write_wait: Duration,
    pub max_message_size: usize,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            system_interval: SYSTEM_STATS_INTERVAL,
            container_interval: CONTAINER_STATS_INTERVAL,
            source_timeout: SOURCE_TIMEOUT,
            send_queue_capacity: SEND_QUEUE_CAPACITY,
            ping_interval: PING_INTERVAL,
            pong_wait: PONG_WAIT,
            write_wait: WRITE_WAIT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl AppConfig {
    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine the user config directory")?
            .join(APP_NAME);

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    /// Load configuration from a specific file, falling back to defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to the given file, creating parent directories
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Overlay settings from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay settings from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {}", port))?;
        }

        if let Some(host) = lookup("APERTURE_HOST") {
            self.server.host = host;
        }

        if let Some(path) = lookup("STATIC_PATH") {
            self.server.static_path = PathBuf::from(path);
        }

        if let Some(debug) = lookup("DEBUG_MODE") {
            self.server.demo_mode = debug.trim().eq_ignore_ascii_case("true");
        }

        if let Some(level) = lookup("APERTURE_LOG") {
            self.log.level = level;
        }

        Ok(())
    }

    /// Validate configuration, returning human-readable problems
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let hub = &self.hub;

        if self.server.port == 0 {
            errors.push("server.port must not be 0".to_string());
        }

        for (name, value) in [
            ("hub.system_interval", hub.system_interval),
            ("hub.container_interval", hub.container_interval),
            ("hub.source_timeout", hub.source_timeout),
            ("hub.ping_interval", hub.ping_interval),
            ("hub.pong_wait", hub.pong_wait),
            ("hub.write_wait", hub.write_wait),
        ] {
            if value.is_zero() {
                errors.push(format!("{} must be greater than zero", name));
            }
        }

        if hub.send_queue_capacity == 0 {
            errors.push("hub.send_queue_capacity must be at least 1".to_string());
        }

        if hub.max_message_size == 0 {
            errors.push("hub.max_message_size must be at least 1".to_string());
        }

        if hub.ping_interval >= hub.pong_wait {
            errors.push(format!(
                "hub.ping_interval ({}) must be shorter than hub.pong_wait ({})",
                humantime::format_duration(hub.ping_interval),
                humantime::format_duration(hub.pong_wait)
            ));
        }

        errors
    }

    /// Settings for WebSocket sessions
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            queue_capacity: self.hub.send_queue_capacity,
            ping_interval: self.hub.ping_interval,
            pong_wait: self.hub.pong_wait,
            write_wait: self.hub.write_wait,
            max_message_size: self.hub.max_message_size,
        }
    }

    /// Settings for the two telemetry producers
    pub fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            system_interval: self.hub.system_interval,
            container_interval: self.hub.container_interval,
            source_timeout: self.hub.source_timeout,
        }
    }
}
