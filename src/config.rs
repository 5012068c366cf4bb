use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn, Level};

use crate::topic::{effective_template, DEFAULT_TOPIC_TEMPLATE};

pub const DEFAULT_ROOM: &str = "Incubator Future";
pub const DEFAULT_BROKER: &str = "mqtt://127.0.0.1:1883";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_PING_URL: &str = "https://teams.microsoft.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing or invalid.")]
    MissingOrInvalid(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Config store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config store is not valid TOML: {0}")]
    Decode(#[from] toml::de::Error),
    #[error("Config could not be encoded: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Process level settings, read once from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub hostname_override: Option<String>,
    pub default_credentials: Option<Credentials>,
    pub reconnect_interval_ms: u64,
    pub reconnect_max_ms: u64,
    pub ping_url: String,
    pub ping_interval_ms: u64,
    pub log_level: Level,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_ms = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::ParsingError(format!("{} must be a valid number", key))),
                None => Ok(default),
            }
        };

        let log_level = match lookup("LOG_LEVEL") {
            Some(raw) => raw
                .trim()
                .parse::<Level>()
                .map_err(|_| ConfigError::MissingOrInvalid("LOG_LEVEL".to_string()))?,
            None => Level::INFO,
        };

        let settings = Self {
            config_path: lookup("ROOM_DISPLAY_CONFIG")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            hostname_override: lookup("ROOM_DISPLAY_HOSTNAME").filter(|h| !h.trim().is_empty()),
            default_credentials: Credentials::from_parts(
                lookup("MQTT_DEFAULT_USERNAME").as_deref(),
                lookup("MQTT_DEFAULT_PASSWORD").as_deref(),
            ),
            reconnect_interval_ms: parse_ms("MQTT_RECONNECT_INTERVAL_MS", 1_000)?,
            reconnect_max_ms: parse_ms("MQTT_RECONNECT_MAX_MS", 60_000)?,
            ping_url: lookup("PING_URL")
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PING_URL.to_string()),
            ping_interval_ms: parse_ms("PING_INTERVAL_MS", 5_000)?,
            log_level,
        };

        settings.validate_timeouts()?;
        Ok(settings)
    }

    /// Validate timeout values and other critical configurations.
    fn validate_timeouts(&self) -> Result<(), ConfigError> {
        const MIN_TIMEOUT: u64 = 100;
        const MAX_TIMEOUT: u64 = 1_000_000;

        if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&self.reconnect_interval_ms) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_RECONNECT_INTERVAL_MS must be between {} and {} ms",
                MIN_TIMEOUT, MAX_TIMEOUT
            )));
        }
        if self.reconnect_max_ms < self.reconnect_interval_ms {
            return Err(ConfigError::ParsingError(
                "MQTT_RECONNECT_MAX_MS must not be below MQTT_RECONNECT_INTERVAL_MS".to_string(),
            ));
        }
        if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&self.ping_interval_ms) {
            return Err(ConfigError::ParsingError(format!(
                "PING_INTERVAL_MS must be between {} and {} ms",
                MIN_TIMEOUT, MAX_TIMEOUT
            )));
        }

        Ok(())
    }

    /// OS host name unless overridden.
    pub fn hostname(&self) -> String {
        if let Some(name) = &self.hostname_override {
            return name.clone();
        }
        match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("Could not read host name, using 'localhost': {}", e);
                "localhost".to_string()
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both parts must be non-blank, otherwise there are no credentials.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.trim().is_empty() && !p.trim().is_empty() => Some(Self {
                username: u.to_string(),
                password: p.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What the ingestion needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub broker: String,
    pub topic_template: String,
    pub credentials: Option<Credentials>,
}

/// The persisted room configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub room: String,
    pub broker: String,
    #[serde(rename = "topicTemplate")]
    pub topic_template: String,
    #[serde(rename = "mqttUsername", skip_serializing_if = "Option::is_none")]
    pub mqtt_username: Option<String>,
    #[serde(rename = "mqttPassword", skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,
    /// Keys this version does not know about, kept across rewrites.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            broker: DEFAULT_BROKER.to_string(),
            topic_template: DEFAULT_TOPIC_TEMPLATE.to_string(),
            mqtt_username: None,
            mqtt_password: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Partial update sent by the display surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub room: Option<String>,
    pub broker: Option<String>,
    #[serde(rename = "topicTemplate")]
    pub topic_template: Option<String>,
    #[serde(rename = "mqttUsername")]
    pub mqtt_username: Option<String>,
    #[serde(rename = "mqttPassword")]
    pub mqtt_password: Option<String>,
}

impl AppConfig {
    /// Returns a new config with every field present in `patch` replaced.
    pub fn merge(&self, patch: ConfigPatch) -> Self {
        let mut merged = self.clone();
        if let Some(room) = patch.room {
            merged.room = room;
        }
        if let Some(broker) = patch.broker {
            merged.broker = broker;
        }
        if let Some(template) = patch.topic_template {
            merged.topic_template = template;
        }
        if let Some(username) = patch.mqtt_username {
            merged.mqtt_username = Some(username);
        }
        if let Some(password) = patch.mqtt_password {
            merged.mqtt_password = Some(password);
        }
        merged
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            broker: self.broker.trim().to_string(),
            topic_template: effective_template(Some(&self.topic_template)).to_string(),
            credentials: Credentials::from_parts(
                self.mqtt_username.as_deref(),
                self.mqtt_password.as_deref(),
            ),
        }
    }
}

/// File backed store for [`AppConfig`]. The file is always rewritten in full.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config, seeding the file with defaults on first run.
    /// Any failure is logged and answered with the defaults.
    pub fn load(&self) -> AppConfig {
        match self.try_load() {
            Ok(config) => config,
            Err(e) => {
                error!("Config load error ({}): {}", self.path.display(), e);
                AppConfig::default()
            }
        }
    }

    pub fn try_load(&self) -> Result<AppConfig, ConfigError> {
        if !self.path.exists() {
            info!("No config at {}, writing defaults.", self.path.display());
            self.save(&AppConfig::default())?;
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let encoded = toml::to_string(config)?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}
