use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{ConfigError, DimmerError};

/// Which windows of the frontmost application stay undimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    /// Every standard window of the frontmost application.
    #[default]
    ActiveApp,
    /// Only the focused window of the frontmost application.
    ActiveWindow,
}

/// Focus and rendering settings read by the resolver and the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfiguration {
    pub mode: FocusMode,
    /// Spare the window under the pointer instead of the focused one.
    pub follow_mouse: bool,
    /// Fade/shape transition length, in seconds.
    pub animation_duration: f64,
    pub corner_radius: f64,
    /// Persisted and exposed, but not applied to hole geometry.
    pub focus_inset: f64,
    /// Soft-edge extent at each hole boundary.
    pub feather: f64,
}

fn default_animation_duration() -> f64 {
    0.18
}

fn default_corner_radius() -> f64 {
    10.0
}

fn default_feather() -> f64 {
    12.0
}

impl Default for FocusConfiguration {
    fn default() -> Self {
        Self {
            mode: FocusMode::ActiveApp,
            follow_mouse: false,
            animation_duration: default_animation_duration(),
            corner_radius: default_corner_radius(),
            focus_inset: 0.0,
            feather: default_feather(),
        }
    }
}

impl FocusConfiguration {
    pub fn animation(&self) -> Duration {
        Duration::from_secs_f64(self.animation_duration.max(0.0))
    }

    /// Replace non-finite or negative lengths with their defaults.
    pub fn sanitized(mut self) -> Self {
        fn fix(value: f64, fallback: f64) -> f64 {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                fallback
            }
        }
        self.animation_duration = fix(self.animation_duration, default_animation_duration());
        self.corner_radius = fix(self.corner_radius, default_corner_radius());
        self.focus_inset = if self.focus_inset.is_finite() { self.focus_inset } else { 0.0 };
        self.feather = fix(self.feather, default_feather());
        self
    }
}

/// Application configuration stored in JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Dimming strength, 0.0 (none) to 1.0 (black).
    #[serde(default = "default_intensity")]
    pub intensity: f64,
    #[serde(default)]
    pub focus: FocusConfiguration,
    /// Bundle identifiers that suspend dimming while frontmost.
    #[serde(default)]
    pub excluded_bundles: BTreeSet<String>,
    #[serde(default)]
    pub launch_on_login: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_intensity() -> f64 {
    0.45
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            is_enabled: default_enabled(),
            intensity: default_intensity(),
            focus: FocusConfiguration::default(),
            excluded_bundles: BTreeSet::new(),
            launch_on_login: false,
        }
    }
}

impl AppConfig {
    pub fn sanitized(mut self) -> Self {
        self.intensity = if self.intensity.is_finite() {
            self.intensity.clamp(0.0, 1.0)
        } else {
            default_intensity()
        };
        self.focus = self.focus.sanitized();
        self
    }
}

pub fn config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("FocusDim").join("config.json")
}

/// Load the user's configuration, falling back to defaults on any failure.
pub fn load_config() -> AppConfig {
    let path = config_path();
    if !path.exists() {
        info!(event = "config.load_defaulted", reason = "missing", path = %path.display());
        return AppConfig::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                event = "config.load_failed",
                error_code = e.error_code(),
                error = %e
            );
            AppConfig::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config: AppConfig = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(config.sanitized())
}

pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(&config_path(), config)
}

pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let data = serde_json::to_string_pretty(config)?;
    fs::write(path, data).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.intensity = 0.7;
        config.focus.mode = FocusMode::ActiveWindow;
        config.focus.follow_mouse = true;
        config.excluded_bundles.insert("com.example.player".to_string());

        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "intensity": 0.2, "focus": { "mode": "active_window" } }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.intensity, 0.2);
        assert!(config.is_enabled);
        assert_eq!(config.focus.mode, FocusMode::ActiveWindow);
        assert_eq!(config.focus.feather, default_feather());
    }

    #[test]
    fn test_out_of_range_values_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "intensity": 3.5, "focus": { "corner_radius": -4.0, "animation_duration": -1.0 } }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.intensity, 1.0);
        assert_eq!(config.focus.corner_radius, default_corner_radius());
        assert_eq!(config.focus.animation_duration, default_animation_duration());
    }

    #[test]
    fn test_corrupt_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_PARSE_ERROR");
    }

    #[test]
    fn test_animation_duration_conversion() {
        let config = FocusConfiguration {
            animation_duration: 0.25,
            ..FocusConfiguration::default()
        };
        assert_eq!(config.animation(), Duration::from_millis(250));
    }
}
