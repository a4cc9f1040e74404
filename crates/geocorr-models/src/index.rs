//! The station → phase → attribute → handle index built once per library.
//!
//! Construction reads identity information from every discovered model file,
//! normally through the store's cheap metadata read. Files whose metadata
//! block is incomplete are fully loaded, described and closed again. In
//! preload mode the leading files are loaded for real and handed back so the
//! caller can keep them resident.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geocorr_abstraction::{ModelMetadata, ModelStore, Station, StoreError};
use tracing::{debug, warn};

use crate::attribute::Attribute;
use crate::cache::types::{ModelFileRecord, ModelHandle};
use crate::error::{LibraryError, Result};

/// Attribute → handle for one station and phase.
pub type AttributeMap = BTreeMap<Attribute, ModelHandle>;

/// Phase → attribute → handle for one station.
pub type PhaseMap = BTreeMap<String, AttributeMap>;

/// A model station and everything the library can serve for it.
#[derive(Debug, Clone)]
pub struct IndexedStation {
    pub station: Station,
    pub phases: Arc<PhaseMap>,
}

/// Immutable index over every model file in a library.
///
/// Model stations are kept in the order they were first seen, which is
/// sorted path order of their first model file. Spatial resolution scans them
/// in this order.
#[derive(Debug, Default)]
pub struct ModelIndex {
    records: Vec<ModelFileRecord>,
    stations: Vec<IndexedStation>,
    supported_phases: BTreeSet<String>,
    supported_attributes: BTreeSet<Attribute>,
}

/// Models fully loaded while the index was being built.
pub type Preloaded<M> = Vec<(ModelHandle, M)>;

impl ModelIndex {
    /// Builds the index for `files`, which must already be in sorted order.
    ///
    /// # Arguments
    /// * `store` - Store used to read metadata and, when needed, load models
    /// * `files` - Discovered model files; handle `i` is assigned to `files[i]`
    /// * `relative_grid_path` - Grid location hint forwarded to full loads
    /// * `preload` - When `Some(n)`, the first `n` files are loaded and returned
    ///
    /// # Errors
    /// Returns `LibraryError::Index` if a file cannot be described even by a
    /// full load. Any models preloaded before the failure are closed.
    pub fn build<S: ModelStore>(
        store: &S,
        files: Vec<PathBuf>,
        relative_grid_path: &str,
        preload: Option<usize>,
    ) -> Result<(Self, Preloaded<S::Model>)> {
        let mut builder = IndexBuilder::default();
        let mut preloaded = Vec::new();

        match Self::describe_all(store, &files, relative_grid_path, preload, &mut preloaded) {
            Ok(descriptions) => {
                for (i, (path, metadata)) in files.into_iter().zip(descriptions).enumerate() {
                    builder.insert(ModelHandle::new(i), path, metadata);
                }
                Ok((builder.finish(), preloaded))
            }
            Err(e) => {
                for (_, model) in &preloaded {
                    store.close(model);
                }
                Err(e)
            }
        }
    }

    fn describe_all<S: ModelStore>(
        store: &S,
        files: &[PathBuf],
        relative_grid_path: &str,
        preload: Option<usize>,
        preloaded: &mut Preloaded<S::Model>,
    ) -> Result<Vec<ModelMetadata>> {
        let preload_count = preload.map_or(0, |n| n.min(files.len()));
        let mut descriptions = Vec::with_capacity(files.len());

        for (i, path) in files[..preload_count].iter().enumerate() {
            let model = store.load(path, relative_grid_path).map_err(|source| {
                LibraryError::Index { path: path.clone(), source }
            })?;
            let metadata = store.describe(&model);
            if !metadata.is_complete() {
                store.close(&model);
                return Err(Self::unidentified(path));
            }
            descriptions.push(metadata);
            preloaded.push((ModelHandle::new(i), model));
        }

        let remaining = &files[preload_count..];
        let headers = store.read_metadata_batch(remaining);
        for (path, header) in remaining.iter().zip(headers) {
            let metadata = match header {
                Ok(metadata) if metadata.is_complete() => metadata,
                Ok(_) => {
                    debug!(path = %path.display(), "Incomplete metadata block, loading full model");
                    Self::describe_by_loading(store, path, relative_grid_path)?
                }
                Err(e) => {
                    debug!(
                        path = %path.display(),
                        error = %e,
                        "Metadata read failed, loading full model"
                    );
                    Self::describe_by_loading(store, path, relative_grid_path)?
                }
            };
            descriptions.push(metadata);
        }

        Ok(descriptions)
    }

    fn describe_by_loading<S: ModelStore>(
        store: &S,
        path: &Path,
        relative_grid_path: &str,
    ) -> Result<ModelMetadata> {
        let model = store
            .load(path, relative_grid_path)
            .map_err(|source| LibraryError::Index { path: path.to_path_buf(), source })?;
        let metadata = store.describe(&model);
        store.close(&model);

        if metadata.is_complete() { Ok(metadata) } else { Err(Self::unidentified(path)) }
    }

    fn unidentified(path: &Path) -> LibraryError {
        LibraryError::Index {
            path: path.to_path_buf(),
            source: StoreError::Malformed {
                path: path.to_path_buf(),
                reason: "model does not identify its station, phases and attribute".to_string(),
            },
        }
    }

    /// Number of indexed model files.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All model file records, in handle order.
    pub fn records(&self) -> &[ModelFileRecord] {
        &self.records
    }

    /// The record for `handle`, if it is in range.
    pub fn record(&self, handle: ModelHandle) -> Option<&ModelFileRecord> {
        self.records.get(handle.index())
    }

    /// Model stations in index order.
    pub fn stations(&self) -> &[IndexedStation] {
        &self.stations
    }

    /// The phase map for exactly this model station record, if indexed.
    pub fn phases_for(&self, station: &Station) -> Option<&Arc<PhaseMap>> {
        self.stations
            .iter()
            .find(|entry| entry.station == *station)
            .map(|entry| &entry.phases)
    }

    /// Every phase supported by at least one model.
    pub fn supported_phases(&self) -> &BTreeSet<String> {
        &self.supported_phases
    }

    /// Every canonical attribute supported by at least one model.
    pub fn supported_attributes(&self) -> &BTreeSet<Attribute> {
        &self.supported_attributes
    }

    /// Model stations grouped by station code, most recent `valid_from` first.
    pub fn supported_stations(&self) -> BTreeMap<String, Vec<Station>> {
        let mut by_code: BTreeMap<String, Vec<Station>> = BTreeMap::new();
        for entry in &self.stations {
            by_code
                .entry(entry.station.code().to_string())
                .or_default()
                .push(entry.station.clone());
        }
        for stations in by_code.values_mut() {
            stations.sort_by(|a, b| b.valid_from().cmp(&a.valid_from()));
        }
        by_code
    }
}

#[derive(Default)]
struct IndexBuilder {
    records: Vec<ModelFileRecord>,
    stations: Vec<(Station, PhaseMap)>,
    positions: HashMap<Station, usize>,
    supported_phases: BTreeSet<String>,
    supported_attributes: BTreeSet<Attribute>,
}

impl IndexBuilder {
    fn insert(&mut self, handle: ModelHandle, path: PathBuf, metadata: ModelMetadata) {
        let ModelMetadata { station, phases, attribute } = metadata;
        let raw_attribute = attribute.unwrap_or_default();
        self.records.push(ModelFileRecord { handle, path });

        let Some(station) = station else {
            return;
        };
        let Some(attribute) = Attribute::from_model_name(&raw_attribute) else {
            warn!(
                handle = %handle,
                attribute = %raw_attribute,
                "Model attribute is not in the translation table; model not indexed"
            );
            return;
        };

        let position = match self.positions.get(&station) {
            Some(&position) => position,
            None => {
                self.stations.push((station.clone(), PhaseMap::new()));
                self.positions.insert(station, self.stations.len() - 1);
                self.stations.len() - 1
            }
        };
        let phase_map = &mut self.stations[position].1;

        for phase in phases {
            phase_map
                .entry(phase.clone())
                .or_default()
                .entry(attribute)
                .or_insert(handle);
            self.supported_phases.insert(phase);
        }
        self.supported_attributes.insert(attribute);
    }

    fn finish(self) -> ModelIndex {
        ModelIndex {
            records: self.records,
            stations: self
                .stations
                .into_iter()
                .map(|(station, phases)| IndexedStation { station, phases: Arc::new(phases) })
                .collect(),
            supported_phases: self.supported_phases,
            supported_attributes: self.supported_attributes,
        }
    }
}
