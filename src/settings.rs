//! Processing settings and their on-disk persistence.

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILENAME: &str = "settings.json";
const APP_NAME: &str = "pdfsqueeze";

/// Immutable snapshot of the processing knobs for one operation.
///
/// Jobs receive a clone at submission time; later edits to application
/// state never reach an in-flight job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// JPEG quality, 1..=100.
    #[serde(default = "default_quality")]
    pub quality: u8,

    #[serde(default)]
    pub grayscale: bool,

    #[serde(default)]
    pub enhance_contrast: bool,

    #[serde(default = "default_factor")]
    pub contrast_factor: f32,

    #[serde(default)]
    pub enhance_brightness: bool,

    #[serde(default = "default_factor")]
    pub brightness_factor: f32,

    #[serde(default)]
    pub sharpen: bool,

    #[serde(default)]
    pub binarize: bool,

    #[serde(default = "default_binarize_threshold")]
    pub binarize_threshold: u8,

    #[serde(default)]
    pub denoise: bool,
}

fn default_dpi() -> u32 {
    150
}

fn default_quality() -> u8 {
    80
}

fn default_factor() -> f32 {
    1.0
}

fn default_binarize_threshold() -> u8 {
    128
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            quality: default_quality(),
            grayscale: false,
            enhance_contrast: false,
            contrast_factor: default_factor(),
            enhance_brightness: false,
            brightness_factor: default_factor(),
            sharpen: false,
            binarize: false,
            binarize_threshold: default_binarize_threshold(),
            denoise: false,
        }
    }
}

impl Settings {
    /// Clamp out-of-range values loaded from disk or the CLI into the
    /// documented domains.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.dpi = self.dpi.max(1);
        self.quality = self.quality.clamp(1, 100);
        if !(self.contrast_factor > 0.0) {
            self.contrast_factor = default_factor();
        }
        if !(self.brightness_factor > 0.0) {
            self.brightness_factor = default_factor();
        }
        self
    }
}

/// Persisted application record: processing settings plus UI-only fields.
///
/// Unknown keys in the file are ignored on load; missing keys take their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(default)]
    pub input_path: String,

    #[serde(default)]
    pub output_path: String,

    #[serde(flatten)]
    pub processing: Settings,

    /// OCR is not implemented; the flag is carried for the front-end only.
    #[serde(default)]
    pub ocr_placeholder: bool,

    /// One-time "asked to star the repo" marker.
    #[serde(default)]
    pub ask_star_repo: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the persisted config, falling back to defaults on any failure.
#[must_use]
pub fn load_config() -> StoredConfig {
    let Some(path) = config_path() else {
        warn!("could not determine config directory, using default settings");
        return StoredConfig::default();
    };
    if !path.exists() {
        debug!("settings file not found at {path:?}, using defaults");
        return StoredConfig::default();
    }

    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}; falling back to default settings");
            StoredConfig::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<StoredConfig, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: StoredConfig =
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.processing = config.processing.normalized();
    debug!("loaded settings from {path:?}");
    Ok(config)
}

pub fn save_config(config: &StoredConfig) -> Result<(), SettingsError> {
    let path = config_path().ok_or(SettingsError::NoConfigDir)?;
    save_config_to(&path, config)
}

pub fn save_config_to(path: &Path, config: &StoredConfig) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    let content = serde_json::to_string_pretty(config).expect("settings serialize to valid JSON");
    fs::write(path, content).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("saved settings to {path:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut config = StoredConfig::default();
        config.input_path = "/tmp/in.pdf".to_string();
        config.processing.dpi = 300;
        config.processing.binarize = true;

        save_config_to(&path, &config).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"dpi": 200, "quality": 70, "some_future_key": "whatever"}"#,
        )
        .unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.processing.dpi, 200);
        assert_eq!(loaded.processing.quality, 70);
        assert!(!loaded.processing.binarize);
    }

    #[test]
    fn out_of_range_values_are_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"dpi": 0, "quality": 0, "contrast_factor": -2.5}"#).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.processing.dpi, 1);
        assert_eq!(loaded.processing.quality, 1);
        assert_eq!(loaded.processing.contrast_factor, 1.0);
    }

    #[test]
    fn missing_file_is_an_error_for_explicit_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }
}
