//! Configuration for a correction model library.

use std::path::{Path, PathBuf};

use geocorr_abstraction::InterpolatorType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{LibraryError, Result};

/// Name of the TOML table holding library settings.
pub const CONFIG_SECTION: &str = "libcorr";

/// How a query station is associated with a model station when more than one
/// model station lies within tolerance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationMatch {
    /// The first model station in index order within tolerance.
    #[default]
    First,
    /// The closest model station within tolerance.
    Nearest,
}

impl StationMatch {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Nearest => "nearest",
        }
    }
}

/// Configuration for a correction model library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Directory containing model files, or a model definition bundle.
    pub root_directory: PathBuf,

    /// Location of externally stored grids, relative to each model file (default: ".").
    #[serde(default = "default_relative_grid_path")]
    pub relative_grid_path: String,

    /// Horizontal interpolation used when models are sampled (default: LINEAR).
    #[serde(default)]
    pub interpolation: InterpolatorType,

    /// Maximum separation in km between a query station and a model station (default: 10).
    #[serde(default = "default_max_separation_km")]
    pub max_separation_km: f64,

    /// Associate stations sharing a reference code regardless of distance (default: false).
    #[serde(default)]
    pub match_by_refsta: bool,

    /// Tie-break among model stations within tolerance (default: first).
    #[serde(default)]
    pub station_match: StationMatch,

    /// Load models at construction instead of on first use (default: false).
    #[serde(default)]
    pub preload_models: bool,

    /// Maximum number of models kept in memory (default: unbounded).
    #[serde(default)]
    pub max_resident_models: Option<usize>,
}

fn default_relative_grid_path() -> String {
    ".".to_string()
}

fn default_max_separation_km() -> f64 {
    10.0
}

/// Errors that can occur during library configuration validation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The root directory path is empty.
    #[error("Root directory must not be empty")]
    EmptyRootDirectory,

    /// The separation tolerance is negative or not finite.
    #[error("Invalid max separation: {0} km (must be finite and >= 0)")]
    InvalidMaxSeparation(f64),

    /// A resident budget of zero models was requested.
    #[error("Invalid max resident models: must be greater than 0")]
    InvalidMaxResidentModels,
}

impl LibraryConfig {
    /// Create a configuration for `root_directory` with default settings.
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            relative_grid_path: default_relative_grid_path(),
            interpolation: InterpolatorType::default(),
            max_separation_km: default_max_separation_km(),
            match_by_refsta: false,
            station_match: StationMatch::default(),
            preload_models: false,
            max_resident_models: None,
        }
    }

    #[must_use]
    pub fn with_relative_grid_path(mut self, path: impl Into<String>) -> Self {
        self.relative_grid_path = path.into();
        self
    }

    #[must_use]
    pub fn with_interpolation(mut self, interpolation: InterpolatorType) -> Self {
        self.interpolation = interpolation;
        self
    }

    #[must_use]
    pub fn with_max_separation_km(mut self, km: f64) -> Self {
        self.max_separation_km = km;
        self
    }

    #[must_use]
    pub fn with_match_by_refsta(mut self, enabled: bool) -> Self {
        self.match_by_refsta = enabled;
        self
    }

    #[must_use]
    pub fn with_station_match(mut self, station_match: StationMatch) -> Self {
        self.station_match = station_match;
        self
    }

    #[must_use]
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload_models = preload;
        self
    }

    #[must_use]
    pub fn with_max_resident_models(mut self, max: usize) -> Self {
        self.max_resident_models = Some(max);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.root_directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRootDirectory);
        }

        if !self.max_separation_km.is_finite() || self.max_separation_km < 0.0 {
            return Err(ConfigError::InvalidMaxSeparation(self.max_separation_km));
        }

        if self.max_resident_models == Some(0) {
            return Err(ConfigError::InvalidMaxResidentModels);
        }

        Ok(())
    }
}

/// Load a library configuration from the `[libcorr]` table of a TOML file.
///
/// A relative `root_directory` is resolved against the directory containing
/// the configuration file.
///
/// # Errors
/// Returns error if the file cannot be read or parsed, the section is
/// missing, or the configuration fails validation.
pub fn load_library_config(path: &Path) -> Result<LibraryConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| LibraryError::ConfigFile(format!("{}: {}", path.display(), e)))?;
    let table: toml::Table = toml::from_str(&content)
        .map_err(|e| LibraryError::ConfigFile(format!("{}: {}", path.display(), e)))?;

    let section = table.get(CONFIG_SECTION).ok_or_else(|| {
        LibraryError::ConfigFile(format!(
            "{}: missing [{}] section",
            path.display(),
            CONFIG_SECTION
        ))
    })?;

    let mut config: LibraryConfig = section
        .clone()
        .try_into()
        .map_err(|e| LibraryError::ConfigFile(format!("{}: {}", path.display(), e)))?;

    if config.root_directory.is_relative() {
        if let Some(parent) = path.parent() {
            config.root_directory = parent.join(&config.root_directory);
        }
    }

    config.validate()?;
    Ok(config)
}
