//! The correction library: discovery, indexing, resolution and residency for
//! one model directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use geocorr_abstraction::{InterpolatorType, ModelStore, Station};
use tracing::{debug, info};

use crate::attribute::Attribute;
use crate::cache::cache::ResidentCache;
use crate::cache::config::LibraryConfig;
use crate::cache::types::{CacheStats, ModelFileRecord, ModelHandle};
use crate::error::{LibraryError, Result};
use crate::index::ModelIndex;
use crate::registry::{EMPTY_LIBRARY_KEY, configuration_key};
use crate::resolver::SpatialResolver;
use crate::scan::{DirectoryScanner, effective_root};

/// A bounded, lazily loaded set of correction models for one model directory.
///
/// Construction discovers and indexes every model file; after that the index
/// is read-only. Models are loaded on first use and kept resident up to
/// `max_resident_models`, evicting the least recently used.
///
/// # Thread Safety
///
/// A library is shared across threads behind an `Arc`. The index is read
/// without locking, the per-station memo is behind a read-mostly lock, and
/// residency (including model loads) is serialized by one mutex.
pub struct CorrectionLibrary<S: ModelStore> {
    store: Arc<S>,
    config: LibraryConfig,
    key: String,
    root: PathBuf,
    index: ModelIndex,
    resolver: SpatialResolver,
    resident: Mutex<ResidentCache<S::Model>>,
}

impl<S: ModelStore> CorrectionLibrary<S> {
    /// Discovers and indexes the models under `config.root_directory`.
    ///
    /// In preload mode the first `max_resident_models` models (all of them
    /// when unbounded) are loaded now and kept resident.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the root directory
    /// is unusable, or a discovered model cannot be indexed.
    pub fn open(config: LibraryConfig, store: Arc<S>) -> Result<Self> {
        let started = Instant::now();
        config.validate()?;

        let root = effective_root(&config.root_directory)?;
        let key = configuration_key(&config)?;
        let files = DirectoryScanner::new(store.as_ref()).scan(&config.root_directory)?;

        let preload = config
            .preload_models
            .then_some(config.max_resident_models.unwrap_or(usize::MAX));
        let (index, preloaded) =
            ModelIndex::build(store.as_ref(), files, &config.relative_grid_path, preload)?;

        let mut resident = ResidentCache::new(config.max_resident_models);
        let preloaded_count = preloaded.len();
        for (handle, model) in preloaded {
            let model = Arc::new(model);
            if !resident.preload(handle, Arc::clone(&model)) {
                store.close(&model);
            }
        }

        info!(
            root = %root.display(),
            models = index.len(),
            stations = index.stations().len(),
            preloaded = preloaded_count,
            elapsed = ?started.elapsed(),
            "Correction library ready"
        );

        Ok(Self {
            resolver: SpatialResolver::new(&config),
            store,
            config,
            key,
            root,
            index,
            resident: Mutex::new(resident),
        })
    }

    /// A library with no models; every lookup returns `None`.
    pub fn empty(store: Arc<S>) -> Self {
        let config = LibraryConfig::new(PathBuf::new());
        Self {
            resolver: SpatialResolver::new(&config),
            resident: Mutex::new(ResidentCache::new(config.max_resident_models)),
            store,
            config,
            key: EMPTY_LIBRARY_KEY.to_string(),
            root: PathBuf::new(),
            index: ModelIndex::default(),
        }
    }

    /// Finds the model serving `station`/`phase`/`attribute`, or `None`.
    ///
    /// # Errors
    /// Returns an error only if an internal lock is poisoned.
    pub fn resolve(
        &self,
        station: &Station,
        phase: &str,
        attribute: &str,
    ) -> Result<Option<ModelHandle>> {
        self.resolver.resolve(&self.index, station, phase, attribute)
    }

    pub fn is_supported(&self, station: &Station, phase: &str, attribute: &str) -> Result<bool> {
        Ok(self.resolve(station, phase, attribute)?.is_some())
    }

    /// Returns the model for `handle`, loading it on a miss.
    ///
    /// Handles outside `[0, model_count())` yield `Ok(None)`.
    ///
    /// # Errors
    /// Returns `LibraryError::Load` if the model file cannot be loaded.
    pub fn get_model(&self, handle: ModelHandle) -> Result<Option<Arc<S::Model>>> {
        let Some(record) = self.index.record(handle) else {
            return Ok(None);
        };

        let mut resident = self.lock_resident()?;
        if let Some(model) = resident.get(handle) {
            return Ok(Some(model));
        }

        debug!(handle = %handle, path = %record.path.display(), "Resident model miss, loading");
        let model = self
            .store
            .load(&record.path, &self.config.relative_grid_path)
            .map(Arc::new)
            .map_err(|source| LibraryError::Load {
                handle,
                path: record.path.clone(),
                source,
            })?;

        for (_, evicted) in resident.insert(handle, Arc::clone(&model)) {
            self.store.close(&evicted);
        }
        Ok(Some(model))
    }

    /// Resolves and loads in one step.
    pub fn get_model_for(
        &self,
        station: &Station,
        phase: &str,
        attribute: &str,
    ) -> Result<Option<Arc<S::Model>>> {
        match self.resolve(station, phase, attribute)? {
            Some(handle) => self.get_model(handle),
            None => Ok(None),
        }
    }

    pub fn model_file(&self, handle: ModelHandle) -> Option<&Path> {
        self.index.record(handle).map(|record| record.path.as_path())
    }

    pub fn model_files(&self) -> &[ModelFileRecord] {
        self.index.records()
    }

    pub fn model_file_for(
        &self,
        station: &Station,
        phase: &str,
        attribute: &str,
    ) -> Result<Option<&Path>> {
        Ok(self.resolve(station, phase, attribute)?.and_then(|handle| self.model_file(handle)))
    }

    pub fn supported_phases(&self) -> Vec<String> {
        self.index.supported_phases().iter().cloned().collect()
    }

    pub fn supported_attributes(&self) -> Vec<Attribute> {
        self.index.supported_attributes().iter().copied().collect()
    }

    /// Model stations grouped by code, newest validity window first.
    pub fn supported_stations(&self) -> std::collections::BTreeMap<String, Vec<Station>> {
        self.index.supported_stations()
    }

    /// Model stations that have served at least one resolved handle.
    pub fn used_stations(&self) -> Vec<Station> {
        self.resolver.used_stations()
    }

    pub fn model_count(&self) -> usize {
        self.index.len()
    }

    pub fn resident_count(&self) -> usize {
        self.inspect_resident().len()
    }

    /// Resident handles in ascending order.
    pub fn resident_handles(&self) -> Vec<ModelHandle> {
        self.inspect_resident().handles()
    }

    pub fn stats(&self) -> CacheStats {
        self.inspect_resident().stats()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The registry key this library was built for.
    pub fn configuration_key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// The directory that was actually scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn interpolation(&self) -> InterpolatorType {
        self.config.interpolation
    }

    pub fn relative_grid_path(&self) -> &str {
        &self.config.relative_grid_path
    }

    pub fn resolver(&self) -> &SpatialResolver {
        &self.resolver
    }

    /// Verifies the resident set against the budget and recency order.
    ///
    /// # Errors
    /// Returns a description of the first inconsistency found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let resident = self.resident.lock().map_err(|_| "resident models lock poisoned".to_string())?;
        resident.check_invariants()?;
        if let Some(handle) = resident.handles().into_iter().find(|h| h.index() >= self.index.len()) {
            return Err(format!("resident handle {handle} is outside the index"));
        }
        Ok(())
    }

    fn lock_resident(&self) -> Result<MutexGuard<'_, ResidentCache<S::Model>>> {
        self.resident.lock().map_err(|_| LibraryError::LockPoisoned("resident models"))
    }

    /// Read-only views report the resident set as left by a panicking thread.
    fn inspect_resident(&self) -> MutexGuard<'_, ResidentCache<S::Model>> {
        self.resident.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ModelStore> Drop for CorrectionLibrary<S> {
    fn drop(&mut self) {
        let resident = match self.resident.get_mut() {
            Ok(resident) => resident,
            Err(poisoned) => poisoned.into_inner(),
        };
        let drained = resident.drain();
        if !drained.is_empty() {
            debug!(key = %self.key, count = drained.len(), "Closing resident models");
        }
        for (_, model) in drained {
            self.store.close(&model);
        }
    }
}

impl<S: ModelStore> fmt::Display for CorrectionLibrary<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl<S: ModelStore> fmt::Debug for CorrectionLibrary<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectionLibrary")
            .field("key", &self.key)
            .field("root", &self.root)
            .field("models", &self.index.len())
            .field("resident", &self.resident_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockModelFile, MockModelStore};
    use tempfile::TempDir;

    fn write_models(dir: &Path, count: usize) {
        for i in 0..count {
            let station = Station::new(format!("S{i:02}"), i as f64 * 5.0, 0.0);
            MockModelFile::new(station, &["P", "S"], "TT_DELTA_AK135")
                .write(&dir.join(format!("m{i:02}.toml")))
                .unwrap();
        }
    }

    fn open(
        dir: &Path,
        config: impl FnOnce(LibraryConfig) -> LibraryConfig,
    ) -> (CorrectionLibrary<MockModelStore>, Arc<MockModelStore>) {
        let store = Arc::new(MockModelStore::new());
        let library =
            CorrectionLibrary::open(config(LibraryConfig::new(dir)), Arc::clone(&store)).unwrap();
        (library, store)
    }

    #[test]
    fn test_open_indexes_without_loading() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 3);
        let (library, store) = open(temp.path(), |c| c);

        assert_eq!(library.model_count(), 3);
        assert_eq!(library.resident_count(), 0);
        assert_eq!(store.metadata_reads(), 3);
        assert_eq!(store.loads(), 0);
        assert_eq!(library.supported_phases(), vec!["P".to_string(), "S".to_string()]);
        assert_eq!(library.supported_attributes(), vec![Attribute::TravelTime]);
    }

    #[test]
    fn test_get_model_loads_once() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 2);
        let (library, store) = open(temp.path(), |c| c);

        let first = library.get_model(ModelHandle::new(1)).unwrap().unwrap();
        let second = library.get_model(ModelHandle::new(1)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.loads(), 1);

        let stats = library.stats();
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.total_misses, 1);
        assert!(library.check_invariants().is_ok());
    }

    #[test]
    fn test_out_of_range_handle_is_not_found() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 2);
        let (library, store) = open(temp.path(), |c| c);

        assert!(library.get_model(ModelHandle::new(2)).unwrap().is_none());
        assert!(ModelHandle::from_raw(-1).is_none());
        assert!(library.model_file(ModelHandle::new(9)).is_none());
        assert_eq!(store.loads(), 0);
    }

    #[test]
    fn test_resolve_and_model_file_for() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 2);
        let (library, _store) = open(temp.path(), |c| c);
        let query = Station::new("QUERY", 5.0, 0.01);

        assert_eq!(library.resolve(&query, "P", "TT").unwrap(), Some(ModelHandle::new(1)));
        assert!(library.is_supported(&query, "S", "TT_MODEL_UNCERTAINTY").unwrap());
        assert!(!library.is_supported(&query, "P", "AZ").unwrap());
        assert_eq!(
            library.model_file_for(&query, "P", "TT").unwrap(),
            Some(temp.path().join("m01.toml").as_path())
        );
        assert_eq!(library.used_stations(), vec![Station::new("S01", 5.0, 0.0)]);
    }

    #[test]
    fn test_preload_fills_budget() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 4);
        let (library, store) = open(temp.path(), |c| c.with_preload(true).with_max_resident_models(2));

        assert_eq!(library.model_count(), 4);
        assert_eq!(library.resident_handles(), vec![ModelHandle::new(0), ModelHandle::new(1)]);
        assert_eq!(store.loads(), 2);
        assert_eq!(store.metadata_reads(), 2);

        library.get_model(ModelHandle::new(0)).unwrap().unwrap();
        assert_eq!(store.loads(), 2);
        assert!(library.check_invariants().is_ok());
    }

    #[test]
    fn test_drop_closes_resident_models() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 3);
        let (library, store) = open(temp.path(), |c| c);

        library.get_model(ModelHandle::new(0)).unwrap();
        library.get_model(ModelHandle::new(2)).unwrap();
        assert_eq!(store.closes(), 0);

        drop(library);
        assert_eq!(store.closes(), 2);
    }

    #[test]
    fn test_load_failure_surfaces_as_error() {
        let temp = TempDir::new().unwrap();
        MockModelFile::new(Station::new("BAD", 0.0, 0.0), &["P"], "TT_DELTA_AK135")
            .unloadable()
            .write(&temp.path().join("bad.toml"))
            .unwrap();
        let (library, _store) = open(temp.path(), |c| c);

        let err = library.get_model(ModelHandle::new(0)).unwrap_err();
        assert!(matches!(err, LibraryError::Load { handle, .. } if handle == ModelHandle::new(0)));
        assert_eq!(library.resident_count(), 0);
    }

    #[test]
    fn test_reporting_survives_poisoned_lock() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 2);
        let (library, _store) = open(temp.path(), |c| c);
        library.get_model(ModelHandle::new(1)).unwrap().unwrap();

        let panicked = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = library.resident.lock().unwrap();
                    panic!("poison the resident lock");
                })
                .join()
                .is_err()
        });
        assert!(panicked);

        assert_eq!(library.resident_count(), 1);
        assert_eq!(library.resident_handles(), vec![ModelHandle::new(1)]);
        assert_eq!(library.stats().total_misses, 1);
        assert!(matches!(
            library.get_model(ModelHandle::new(0)),
            Err(LibraryError::LockPoisoned(_))
        ));
    }

    #[test]
    fn test_empty_library() {
        let library = CorrectionLibrary::empty(Arc::new(MockModelStore::new()));
        let query = Station::new("ANY", 0.0, 0.0);

        assert!(library.is_empty());
        assert_eq!(library.to_string(), EMPTY_LIBRARY_KEY);
        assert_eq!(library.resolve(&query, "P", "TT").unwrap(), None);
        assert!(library.get_model(ModelHandle::new(0)).unwrap().is_none());
    }

    #[test]
    fn test_missing_root_fails_fast() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MockModelStore::new());
        let err = CorrectionLibrary::open(LibraryConfig::new(temp.path().join("missing")), store)
            .unwrap_err();
        assert!(matches!(err, LibraryError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_display_is_configuration_key() {
        let temp = TempDir::new().unwrap();
        write_models(temp.path(), 1);
        let (library, _store) = open(temp.path(), |c| c);

        assert_eq!(library.to_string(), library.configuration_key());
        assert!(library.configuration_key().contains("interpolation = LINEAR"));
    }
}
