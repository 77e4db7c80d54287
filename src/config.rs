//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Linux: ~/.config/cloze-minder/config.toml
//! - macOS: ~/Library/Application Support/cloze-minder/config.toml
//!
//! The config file is human-readable and editable. Settings are loaded once
//! at startup; there is no runtime reload.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem layout (media root and per-kind subdirectories).
    pub media: MediaConfig,
    /// External player connection.
    pub player: PlayerConfig,
    /// Capture/cut external tool settings.
    pub audio: AudioConfig,
    /// Controller and headphones device identification.
    pub devices: DeviceConfig,
    /// Path to the SQLite content store.
    pub database_path: PathBuf,
    /// Progress sampler interval, in seconds.
    pub progress_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            player: PlayerConfig::default(),
            audio: AudioConfig::default(),
            devices: DeviceConfig::default(),
            database_path: PathBuf::from("cloze-minder.db"),
            progress_interval_secs: 5,
        }
    }
}

/// Media root and per-kind subdirectories, all relative to `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub topics_dir: PathBuf,
    pub extracts_dir: PathBuf,
    pub items_dir: PathBuf,
    pub extract_extension: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/srv/audiofiles"),
            topics_dir: PathBuf::from("topics"),
            extracts_dir: PathBuf::from("extracts"),
            items_dir: PathBuf::from("items"),
            extract_extension: ".wav".to_string(),
        }
    }
}

impl MediaConfig {
    /// Absolute path to the topics directory.
    pub fn topics_path(&self) -> PathBuf {
        self.root.join(&self.topics_dir)
    }

    /// Absolute path to the extracts directory.
    pub fn extracts_path(&self) -> PathBuf {
        self.root.join(&self.extracts_dir)
    }

    /// Absolute path to the items directory.
    pub fn items_path(&self) -> PathBuf {
        self.root.join(&self.items_dir)
    }
}

/// External player connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6600,
        }
    }
}

/// Capture/cut external binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub recorder_bin: String,
    pub cut_bin: String,
    pub recording_sink: String,
    pub audio_daemon_restart_cmd: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            recorder_bin: "parecord".to_string(),
            cut_bin: "ffmpeg".to_string(),
            recording_sink: "default".to_string(),
            audio_daemon_restart_cmd: vec!["pulseaudio".to_string(), "-k".to_string()],
        }
    }
}

/// Controller and headphones identification, plus the keycode-to-logical-action map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub controller_address: String,
    pub controller_name: String,
    pub headphones_address: String,
    pub headphones_name: String,
    pub key_map: HashMap<String, String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            controller_address: String::new(),
            controller_name: "Wireless Controller".to_string(),
            headphones_address: String::new(),
            headphones_name: "Headphones".to_string(),
            key_map: HashMap::new(),
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cloze-minder"))
}

/// Get the full path to the config file.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk.
///
/// Returns default config if the file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk.
///
/// Creates the config directory if it doesn't exist, and writes atomically
/// (temp file then rename) so a crash mid-write never leaves a truncated file.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join("config.toml");

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDir(dir.clone(), e))?;

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}
