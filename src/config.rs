// src/config.rs

//! Configuration for the video display.
//!
//! Every section derives serde's `Deserialize` with `#[serde(default)]`, so a
//! configuration file only needs the keys it wants to change. The file is JSON
//! and is looked up through the `VIDEO_DISPLAY_CONFIG` environment variable.

use crate::display::messages::PixelFormat;
use anyhow::{Context, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "VIDEO_DISPLAY_CONFIG";

/// Process-wide configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Root of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub video: VideoConfig,
    pub performance: PerformanceConfig,
}

// --- Window Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Title of the display window.
    pub title: String,
    /// Center the window on screen when it is created.
    pub centered: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            title: "Drone video".to_string(),
            centered: true,
        }
    }
}

// --- Video Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Layout of the frames handed to `submit_frame`.
    pub pixel_format: PixelFormat,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            pixel_format: PixelFormat::Bgra8888,
        }
    }
}

// --- Performance Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Upper bound on one blocking backend wait. After it elapses the display
    /// thread re-checks for requests even if no wake event arrived.
    pub event_wait_timeout_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            event_wait_timeout_ms: 50,
        }
    }
}

impl Config {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load the file named by `VIDEO_DISPLAY_CONFIG`, or use defaults.
    pub fn from_env() -> Self {
        let Some(path) = std::env::var_os(CONFIG_PATH_ENV) else {
            info!("Configuration: {} not set, using defaults", CONFIG_PATH_ENV);
            return Config::default();
        };
        match Config::load(Path::new(&path)) {
            Ok(config) => {
                info!("Configuration loaded from {}", Path::new(&path).display());
                config
            }
            Err(e) => {
                warn!("Configuration: {:#}. Using defaults.", e);
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use test_log::test;

    fn scratch_file(contents: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "video-display-config-{}-{}.json",
            std::process::id(),
            nanos
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_match_the_drone_viewer() {
        let config = Config::default();
        assert_eq!(config.window.title, "Drone video");
        assert!(config.window.centered);
        assert_eq!(config.video.pixel_format, PixelFormat::Bgra8888);
        assert_eq!(config.performance.event_wait_timeout_ms, 50);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let path = scratch_file(r#"{ "video": { "pixel_format": "iyuv" } }"#);
        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.video.pixel_format, PixelFormat::Iyuv);
        assert_eq!(config.window, WindowConfig::default());
        assert_eq!(config.performance, PerformanceConfig::default());
    }

    #[test]
    fn malformed_file_is_reported_with_its_path() {
        let path = scratch_file("{ not json");
        let err = Config::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(format!("{:#}", err).contains(&path.display().to_string()));
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("video-display-config-does-not-exist.json");
        assert!(Config::load(&path).is_err());
    }
}
