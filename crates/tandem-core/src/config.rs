//! Settings persistence for hosting applications
//!
//! Device choices, latency and gains survive restarts as a small YAML
//! file. Loading is lenient: a missing or unparsable file yields defaults
//! with a warning, never an error, so a broken config cannot keep audio
//! from starting.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, WASAPI,
/// CoreAudio, ...) so systems with several backends can pin a device on a
/// specific one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier; None = default host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Persisted player settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Main output device (None = system default)
    pub main_device: Option<DeviceId>,
    /// Linked output device (None = system default)
    pub linked_device: Option<DeviceId>,
    /// Preferred buffer size in frames (None = safe default)
    pub buffer_size: Option<u32>,
    /// Preferred sample rate (None = device default)
    pub sample_rate: Option<u32>,
    /// Signed inter-device latency in ms (positive delays Main)
    pub latency_ms: f32,
    /// Main output gain; negative inverts polarity
    pub main_gain: f32,
    /// Linked output gain; negative inverts polarity
    pub linked_gain: f32,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            main_device: None,
            linked_device: None,
            buffer_size: None,
            sample_rate: None,
            latency_ms: 0.0,
            main_gain: 1.0,
            linked_gain: 1.0,
        }
    }
}

/// Load configuration from a YAML file.
///
/// If the file doesn't exist, returns the default config. If the file
/// exists but is invalid, logs a warning and returns the default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories as
/// needed.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: saved to {:?}", path);
    Ok(())
}

/// Default config file path: `<platform config dir>/tandem/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
        .join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let settings: PlayerSettings = load_config(Path::new("/nonexistent/path/tandem.yaml"));
        assert_eq!(settings, PlayerSettings::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");

        let settings = PlayerSettings {
            main_device: Some(DeviceId::with_host("Scarlett 18i20", "ALSA")),
            linked_device: Some(DeviceId::new("HDMI Out")),
            buffer_size: Some(256),
            sample_rate: Some(48000),
            latency_ms: -12.0,
            main_gain: 0.8,
            linked_gain: -1.0,
        };

        save_config(&settings, &path).unwrap();
        let loaded: PlayerSettings = load_config(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "latency_ms: 25.0\n").unwrap();

        let loaded: PlayerSettings = load_config(&path);
        assert_eq!(loaded.latency_ms, 25.0);
        assert_eq!(loaded.main_gain, 1.0);
        assert!(loaded.main_device.is_none());
    }

    #[test]
    fn test_device_display_label() {
        assert_eq!(DeviceId::new("Speakers").display_label(), "Speakers");
        assert_eq!(
            DeviceId::with_host("Speakers", "WASAPI").display_label(),
            "[WASAPI] Speakers"
        );
    }

    #[test]
    fn test_default_config_path_includes_filename() {
        let path = default_config_path("settings.yaml");
        assert!(path.ends_with("settings.yaml"));
    }
}
