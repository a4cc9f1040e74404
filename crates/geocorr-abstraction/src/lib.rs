//! Model store abstraction layer for geocorr.
//!
//! This crate defines the boundary between the correction-model cache and the
//! code that actually understands model files: the [`ModelStore`] trait, the
//! cheap [`ModelMetadata`] record it returns, and the [`Station`] value type
//! both sides use to describe where a model applies.

pub mod station;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use station::{Station, OFFDATE_NA, ONDATE_NA, REFSTA_NA};

/// Format class name a [`ModelStore`] reports for files that are correction models.
pub const MODEL_CLASS_NAME: &str = "LibCorr3DModel";

/// Represents an error raised by a [`ModelStore`] while reading a model file.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file was readable but its contents are not a valid model.
    #[error("Malformed model file {}: {reason}", path.display())]
    Malformed {
        /// Path of the offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The file uses a format or feature this store does not handle.
    #[error("Unsupported model: {0}")]
    Unsupported(String),
}

/// Horizontal interpolation scheme used when a model is sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterpolatorType {
    /// Linear interpolation between grid vertices.
    #[default]
    Linear,
    /// Natural-neighbour interpolation.
    NaturalNeighbor,
}

impl fmt::Display for InterpolatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("LINEAR"),
            Self::NaturalNeighbor => f.write_str("NATURAL_NEIGHBOR"),
        }
    }
}

impl FromStr for InterpolatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LINEAR" => Ok(Self::Linear),
            "NATURAL_NEIGHBOR" | "NATURALNEIGHBOR" => Ok(Self::NaturalNeighbor),
            other => Err(format!(
                "unknown interpolator type '{other}', expected LINEAR or NATURAL_NEIGHBOR"
            )),
        }
    }
}

/// Identity information a model carries about itself.
///
/// Returned by [`ModelStore::read_metadata`] (cheap, header only) and
/// [`ModelStore::describe`] (from a fully loaded model). Older model files may
/// lack some of these fields in their header, in which case the cheap read
/// returns an incomplete record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMetadata {
    /// Station the model was generated for.
    pub station: Option<Station>,
    /// Seismic phases the model supports.
    pub phases: Vec<String>,
    /// Raw attribute name stored in the model (e.g. `TT_DELTA_AK135`).
    pub attribute: Option<String>,
}

impl ModelMetadata {
    /// Returns `true` when station, at least one phase, and attribute are all present.
    pub fn is_complete(&self) -> bool {
        self.station.is_some() && !self.phases.is_empty() && self.attribute.is_some()
    }
}

/// Access to correction model files on disk.
///
/// The cache depends on nothing else about the model format. Implementations
/// must be `Send + Sync` because one store is shared by every thread using a
/// library.
pub trait ModelStore: Send + Sync {
    /// The in-memory model type produced by [`ModelStore::load`].
    type Model: Send + Sync;

    /// Returns the format class name of `path`, or `None` if the file is not
    /// recognized at all. Files are indexed only when this equals
    /// [`MODEL_CLASS_NAME`].
    fn class_name(&self, path: &Path) -> Option<String>;

    /// Reads the embedded metadata block without loading grid or data.
    ///
    /// # Errors
    /// Returns `StoreError` if the header cannot be read.
    fn read_metadata(&self, path: &Path) -> Result<ModelMetadata, StoreError>;

    /// Reads metadata for many files at once.
    ///
    /// The default reads sequentially; stores may override this to read in
    /// parallel. Results must be returned in the same order as `paths`.
    fn read_metadata_batch(&self, paths: &[PathBuf]) -> Vec<Result<ModelMetadata, StoreError>> {
        paths.iter().map(|path| self.read_metadata(path)).collect()
    }

    /// Fully loads the model stored at `path`.
    ///
    /// # Arguments
    /// * `path` - The model file
    /// * `relative_grid_path` - Where externally stored grids live, relative to the model file
    ///
    /// # Errors
    /// Returns `StoreError` if the file is unreadable or malformed.
    fn load(&self, path: &Path, relative_grid_path: &str) -> Result<Self::Model, StoreError>;

    /// Extracts identity information from a loaded model.
    fn describe(&self, model: &Self::Model) -> ModelMetadata;

    /// Releases the resources held by `model`.
    ///
    /// Called exactly once per loaded model, by whoever owns it, before the
    /// model is dropped.
    fn close(&self, model: &Self::Model);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolator_type_parsing() {
        assert_eq!("LINEAR".parse::<InterpolatorType>().unwrap(), InterpolatorType::Linear);
        assert_eq!(
            "natural_neighbor".parse::<InterpolatorType>().unwrap(),
            InterpolatorType::NaturalNeighbor
        );
        assert!("cubic".parse::<InterpolatorType>().is_err());
    }

    #[test]
    fn test_interpolator_type_display_round_trips_serde_name() {
        let json = serde_json::to_string(&InterpolatorType::NaturalNeighbor).unwrap();
        assert_eq!(json, "\"NATURAL_NEIGHBOR\"");
        assert_eq!(InterpolatorType::NaturalNeighbor.to_string(), "NATURAL_NEIGHBOR");
        assert_eq!(InterpolatorType::default(), InterpolatorType::Linear);
    }

    #[test]
    fn test_metadata_completeness() {
        let mut metadata = ModelMetadata::default();
        assert!(!metadata.is_complete());

        metadata.station = Some(Station::new("ABC", 10.0, 20.0));
        metadata.phases = vec!["P".to_string()];
        assert!(!metadata.is_complete());

        metadata.attribute = Some("TT_DELTA_AK135".to_string());
        assert!(metadata.is_complete());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Malformed {
            path: PathBuf::from("/models/a.geotess"),
            reason: "truncated header".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/models/a.geotess"));
        assert!(msg.contains("truncated header"));
    }
}
