//! Core configuration.
//!
//! Timing constants of the control flow (debounce window, fetch timeout,
//! smoothing factor) and the engine settings live here. Every field has a
//! default, so a partial or missing config file is fine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::progress::DEFAULT_SMOOTHING_FACTOR;

const fn default_debounce_ms() -> u64 {
    600
}

const fn default_fetch_timeout_secs() -> u64 {
    30
}

const fn default_smoothing_factor() -> f64 {
    DEFAULT_SMOOTHING_FACTOR
}

const fn default_progress_interval_ms() -> u64 {
    200
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_output_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

/// Configuration for the orchestration core and the yt-dlp engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    /// Quiescence window before a metadata fetch, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on a metadata fetch, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Weight of the newest speed measurement, in (0, 1].
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f64,
    /// Minimum spacing between engine progress samples, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Drop fetch results whose input has since changed.
    #[serde(default)]
    pub discard_stale_fetches: bool,
    /// yt-dlp executable.
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,
    /// File name template, relative to the output directory.
    #[serde(default = "default_output_template")]
    pub output_template: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            smoothing_factor: default_smoothing_factor(),
            progress_interval_ms: default_progress_interval_ms(),
            discard_stale_fetches: false,
            ytdlp_path: default_ytdlp_path(),
            output_template: default_output_template(),
        }
    }
}

impl CoreConfig {
    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;

        info!("Loaded config from {}", path.display());
        Ok(config.validate())
    }

    /// Write the configuration to `path` as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Replace out-of-range values with their defaults.
    #[must_use]
    pub fn validate(mut self) -> Self {
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            warn!(
                "Smoothing factor {} out of range, using {}",
                self.smoothing_factor, DEFAULT_SMOOTHING_FACTOR
            );
            self.smoothing_factor = default_smoothing_factor();
        }
        if self.debounce_ms == 0 {
            warn!("Debounce window must be positive, using default");
            self.debounce_ms = default_debounce_ms();
        }
        if self.fetch_timeout_secs == 0 {
            warn!("Fetch timeout must be positive, using default");
            self.fetch_timeout_secs = default_fetch_timeout_secs();
        }
        if self.output_template.trim().is_empty() {
            self.output_template = default_output_template();
        }
        self
    }

    /// Debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Metadata fetch timeout.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Engine progress sample spacing.
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Path of the default config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("predator")
        .join("config.json")
}

/// Make sure `path` is a directory downloads can be written to.
///
/// Creates it if it does not exist.
pub fn prepare_output_directory(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidSelection("no output directory".to_string()));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Path exists but is not a directory: {}",
                path.display()
            )));
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|e| {
        Error::Configuration(format!("Cannot create directory {}: {}", path.display(), e))
    })?;
    info!("Created output directory {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(600));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.smoothing_factor, 0.2);
        assert_eq!(config.progress_interval(), Duration::from_millis(200));
        assert!(!config.discard_stale_fetches);
        assert_eq!(config.ytdlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.output_template, "%(title)s.%(ext)s");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = CoreConfig::load_from(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"debounce_ms": 250, "discard_stale_fetches": true}"#).unwrap();

        let config = CoreConfig::load_from(&path).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert!(config.discard_stale_fetches);
        assert_eq!(config.fetch_timeout_secs, 30);
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ debounce_ms: ").unwrap();

        let err = CoreConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        let config = CoreConfig {
            fetch_timeout_secs: 5,
            ytdlp_path: PathBuf::from("/opt/bin/yt-dlp"),
            ..CoreConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(CoreConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_repairs_out_of_range_values() {
        let config = CoreConfig {
            smoothing_factor: 1.5,
            debounce_ms: 0,
            fetch_timeout_secs: 0,
            output_template: "  ".to_string(),
            ..CoreConfig::default()
        }
        .validate();

        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_validate_keeps_alpha_of_one() {
        let config = CoreConfig {
            smoothing_factor: 1.0,
            ..CoreConfig::default()
        }
        .validate();
        assert_eq!(config.smoothing_factor, 1.0);
    }

    #[test]
    fn test_config_file_path_is_namespaced() {
        let path = CoreConfig::config_file_path();
        assert!(path.ends_with("predator/config.json"));
    }

    #[test]
    fn test_prepare_output_directory() {
        let temp_dir = TempDir::new().unwrap();
        let fresh = temp_dir.path().join("downloads");

        prepare_output_directory(&fresh).unwrap();
        assert!(fresh.is_dir());
        prepare_output_directory(&fresh).unwrap();

        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(prepare_output_directory(&file).is_err());
        assert!(matches!(
            prepare_output_directory(Path::new("")),
            Err(Error::InvalidSelection(_))
        ));
    }
}
