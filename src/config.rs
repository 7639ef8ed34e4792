//! Hub configuration
//!
//! Loaded once at startup from a JSON file plus a few environment overrides,
//! then shared read-only with every room. Defaults follow the deployed
//! satellite setup: streaming on, base room `base`, three stock models.

use crate::agent::RoomConfig;
use crate::engine::DEFAULT_WINDOW_SIZE;
use crate::filter::FilterSettings;
use crate::frame::MIN_CONTAINER_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_PATH_ENV: &str = "WAKEWORD_HUB_CONFIG";

/// Config file used when neither `--config` nor the environment names one
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const BASE_ROOM_ENV: &str = "WAKEWORD_HUB_BASE_ROOM";
pub const STREAMING_ENV: &str = "WAKEWORD_HUB_STREAMING";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadFile { path: PathBuf, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },

    #[error("No rooms configured")]
    NoRooms,
}

/// Control bus endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,

    /// Largest MQTT packet accepted or sent; tone playback carries whole WAV files
    pub max_packet_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "wakeword-hub".to_string(),
            max_packet_size: 1024 * 1024,
        }
    }
}

/// Audio ingress settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Address every room socket binds on
    pub bind_host: IpAddr,

    /// Sample rate the classifier expects
    pub sample_rate: u32,

    /// Receive buffer size; must fit the largest audio container
    pub max_datagram_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sample_rate: 16000,
            max_datagram_size: 8192,
        }
    }
}

/// Wake-word detection settings shared by every room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Enabled model ids
    pub models: Vec<String>,

    /// Analysis window in samples
    pub window_size: usize,

    pub activation_threshold: f32,
    pub deactivation_threshold: f32,

    /// Number of window scores in the moving average
    pub activation_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let filter = FilterSettings::default();
        Self {
            models: ["alexa", "hey_mycroft", "hey_jarvis"].map(String::from).to_vec(),
            window_size: DEFAULT_WINDOW_SIZE,
            activation_threshold: filter.activation_threshold,
            deactivation_threshold: filter.deactivation_threshold,
            activation_samples: filter.activation_samples,
        }
    }
}

impl DetectionConfig {
    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            activation_samples: self.activation_samples,
            activation_threshold: self.activation_threshold,
            deactivation_threshold: self.deactivation_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Room name (site id) to UDP listen port
    pub rooms: BTreeMap<String, u16>,

    /// Room that receives forwarded tone playback
    pub base_room: String,

    /// Keep streaming the active room's audio after its session ends
    pub streaming_enabled: bool,

    pub bus: BusConfig,
    pub audio: AudioConfig,
    pub detection: DetectionConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            rooms: BTreeMap::new(),
            base_room: "base".to_string(),
            streaming_enabled: true,
            bus: BusConfig::default(),
            audio: AudioConfig::default(),
            detection: DetectionConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::from_json(&contents)
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `path`, else `$WAKEWORD_HUB_CONFIG`, else `config.json`, then
    /// apply environment overrides. Falls back to defaults if no file exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        let mut config = if path.exists() {
            info!("Loading config from: {}", path.display());
            Self::from_file(&path)?
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_room) = lookup(BASE_ROOM_ENV) {
            self.base_room = base_room;
        }

        if let Some(streaming) = lookup(STREAMING_ENV) {
            self.streaming_enabled = streaming.parse().map_err(|_| ConfigError::InvalidValue {
                field: STREAMING_ENV.to_string(),
                message: format!("expected true or false, got {:?}", streaming),
            })?;
        }

        Ok(())
    }

    /// Reject unusable values; warn about degenerate ones
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rooms.is_empty() {
            return Err(ConfigError::NoRooms);
        }

        let detection = &self.detection;
        for (field, value) in [
            ("detection.activation_threshold", detection.activation_threshold),
            ("detection.deactivation_threshold", detection.deactivation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be between 0.0 and 1.0, got {}", value),
                });
            }
        }

        if detection.activation_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "detection.activation_samples".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if detection.window_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "detection.window_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.audio.max_datagram_size < MIN_CONTAINER_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_datagram_size".to_string(),
                message: format!("must be at least {} bytes", MIN_CONTAINER_SIZE),
            });
        }

        if !detection.filter_settings().has_hysteresis() {
            warn!(
                "deactivation_threshold {} is not below activation_threshold {}; detections will chatter",
                detection.deactivation_threshold, detection.activation_threshold
            );
        }

        if detection.models.is_empty() {
            warn!("No wake-word models enabled; rooms will never detect");
        }

        if !self.rooms.contains_key(&self.base_room) {
            warn!("Base room {:?} is not a configured room", self.base_room);
        }

        Ok(())
    }

    /// Rooms in name order
    pub fn room_configs(&self) -> Vec<RoomConfig> {
        self.rooms
            .iter()
            .map(|(name, &port)| RoomConfig { name: name.clone(), port })
            .collect()
    }

    pub fn listen_addr(&self, room: &RoomConfig) -> SocketAddr {
        SocketAddr::new(self.audio.bind_host, room.port)
    }

    /// Sample buffer capacity: one window plus the largest frame, and never
    /// less than four windows
    pub fn buffer_capacity(&self) -> usize {
        let window = self.detection.window_size;
        (window + self.audio.max_datagram_size / 2).max(window * 4)
    }
}
