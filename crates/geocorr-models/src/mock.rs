//! A file-backed [`ModelStore`] for tests and demonstrations.
//!
//! Mock model files are small TOML documents describing the station, phases
//! and attribute a model supports. The store counts metadata reads, full
//! loads and closes so callers can observe cache behaviour.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use geocorr_abstraction::{
    ModelMetadata, ModelStore, Station, StoreError, MODEL_CLASS_NAME, OFFDATE_NA, ONDATE_NA,
    REFSTA_NA,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_true() -> bool {
    true
}

fn default_refsta() -> String {
    REFSTA_NA.to_string()
}

fn default_ondate() -> i64 {
    ONDATE_NA
}

fn default_offdate() -> i64 {
    OFFDATE_NA
}

/// Station section of a mock model file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockStation {
    pub sta: String,
    #[serde(default = "default_refsta")]
    pub refsta: String,
    #[serde(default = "default_ondate")]
    pub ondate: i64,
    #[serde(default = "default_offdate")]
    pub offdate: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub elev: f64,
}

impl From<&Station> for MockStation {
    fn from(station: &Station) -> Self {
        Self {
            sta: station.code().to_string(),
            refsta: station.reference_code().to_string(),
            ondate: station.valid_from(),
            offdate: station.valid_to(),
            lat: station.lat(),
            lon: station.lon(),
            elev: station.elevation(),
        }
    }
}

impl From<&MockStation> for Station {
    fn from(record: &MockStation) -> Self {
        Self::new(record.sta.clone(), record.lat, record.lon)
            .with_reference_code(record.refsta.clone())
            .with_validity(record.ondate, record.offdate)
            .with_elevation(record.elev)
    }
}

/// Contents of a mock model file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockModelFile {
    /// Format class name; [`MODEL_CLASS_NAME`] for correction models.
    pub class: String,
    /// Raw attribute name.
    pub attribute: String,
    /// Supported phases.
    pub phases: Vec<String>,
    /// `false` simulates an old file whose metadata block lacks identity fields.
    #[serde(default = "default_true")]
    pub header: bool,
    /// `true` makes every full load fail.
    #[serde(default)]
    pub unloadable: bool,
    /// Station the model was built for.
    pub station: MockStation,
}

impl MockModelFile {
    /// Describe a correction model for `station`.
    pub fn new(station: Station, phases: &[&str], attribute: &str) -> Self {
        Self {
            class: MODEL_CLASS_NAME.to_string(),
            attribute: attribute.to_string(),
            phases: phases.iter().map(|p| (*p).to_string()).collect(),
            header: true,
            unloadable: false,
            station: MockStation::from(&station),
        }
    }

    /// Marks the file as lacking a metadata shortcut.
    #[must_use]
    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    /// Makes full loads of this file fail.
    #[must_use]
    pub fn unloadable(mut self) -> Self {
        self.unloadable = true;
        self
    }

    /// Write the file to `path`.
    ///
    /// # Errors
    /// Returns `StoreError` if serialization or the write fails.
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let content =
            toml::to_string(self).map_err(|e| StoreError::Unsupported(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Read and parse the file at `path`.
    ///
    /// # Errors
    /// Returns `StoreError` if the file is unreadable or not a mock model.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            station: Some(Station::from(&self.station)),
            phases: self.phases.clone(),
            attribute: Some(self.attribute.clone()),
        }
    }
}

/// A loaded mock model.
#[derive(Debug)]
pub struct MockModel {
    path: PathBuf,
    relative_grid_path: String,
    metadata: ModelMetadata,
}

impl MockModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn relative_grid_path(&self) -> &str {
        &self.relative_grid_path
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// Store that reads [`MockModelFile`] documents from disk.
#[derive(Debug, Default)]
pub struct MockModelStore {
    metadata_reads: AtomicUsize,
    loads: AtomicUsize,
    closes: AtomicUsize,
    closed: Mutex<Vec<PathBuf>>,
}

impl MockModelStore {
    /// Creates a store with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cheap metadata reads performed.
    pub fn metadata_reads(&self) -> usize {
        self.metadata_reads.load(Ordering::SeqCst)
    }

    /// Number of full loads performed, including failed ones.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of models closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Paths of closed models, in close order.
    pub fn closed_paths(&self) -> Vec<PathBuf> {
        self.closed.lock().map(|closed| closed.clone()).unwrap_or_default()
    }
}

impl ModelStore for MockModelStore {
    type Model = MockModel;

    fn class_name(&self, path: &Path) -> Option<String> {
        let content = fs::read_to_string(path).ok()?;
        let table: toml::Table = toml::from_str(&content).ok()?;
        table.get("class")?.as_str().map(str::to_string)
    }

    fn read_metadata(&self, path: &Path) -> Result<ModelMetadata, StoreError> {
        self.metadata_reads.fetch_add(1, Ordering::SeqCst);
        let file = MockModelFile::read(path)?;
        if file.header {
            Ok(file.metadata())
        } else {
            Ok(ModelMetadata::default())
        }
    }

    fn load(&self, path: &Path, relative_grid_path: &str) -> Result<MockModel, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let file = MockModelFile::read(path)?;
        if file.unloadable {
            return Err(StoreError::Malformed {
                path: path.to_path_buf(),
                reason: "model grid could not be read".to_string(),
            });
        }
        debug!(path = %path.display(), "MockModelStore loaded model");
        Ok(MockModel {
            path: path.to_path_buf(),
            relative_grid_path: relative_grid_path.to_string(),
            metadata: file.metadata(),
        })
    }

    fn describe(&self, model: &MockModel) -> ModelMetadata {
        model.metadata.clone()
    }

    fn close(&self, model: &MockModel) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut closed) = self.closed.lock() {
            closed.push(model.path.clone());
        }
    }
}
