//! Shared correction libraries keyed by configuration.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geocorr_abstraction::ModelStore;
use tracing::{debug, info};

use crate::cache::config::LibraryConfig;
use crate::error::{LibraryError, Result};
use crate::library::CorrectionLibrary;

/// Registry key of the shared library that has no models.
pub const EMPTY_LIBRARY_KEY: &str = "empty";

/// Builds the registry key for `config`.
///
/// The root directory is canonicalized, so relative paths, trailing slashes
/// and symbolic links naming the same directory produce the same key. The
/// separation tolerance is printed at fixed precision.
///
/// # Errors
/// Returns `LibraryError::DirectoryNotFound` if the root does not exist.
pub fn configuration_key(config: &LibraryConfig) -> Result<String> {
    let root = std::fs::canonicalize(&config.root_directory).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LibraryError::DirectoryNotFound(config.root_directory.clone()),
        _ => LibraryError::Io(e),
    })?;

    Ok(format!(
        "root = {}; interpolation = {}; max_separation_km = {:.6}; match_by_refsta = {}; station_match = {}",
        root.display(),
        config.interpolation,
        config.max_separation_km,
        config.match_by_refsta,
        config.station_match.as_str(),
    ))
}

/// Thread-safe registry handing out one shared library per configuration.
///
/// The host creates one registry and passes it to whoever needs corrections;
/// everyone asking for the same configuration shares the same bounded set of
/// resident models.
///
/// # Thread Safety
///
/// The registry lock only guards map lookups and insertions. Libraries are
/// built outside it, under a per-key build lock, so one configuration is
/// built at most once while different configurations build in parallel.
#[derive(Debug)]
pub struct LibraryRegistry<S: ModelStore> {
    store: Arc<S>,
    state: Mutex<RegistryState<S>>,
}

#[derive(Debug)]
struct RegistryState<S: ModelStore> {
    libraries: HashMap<String, Arc<CorrectionLibrary<S>>>,
    /// Held while a key is being built. Kept after a failed build so later
    /// attempts for that key still queue behind each other.
    building: HashMap<String, Arc<Mutex<()>>>,
}

impl<S: ModelStore> LibraryRegistry<S> {
    /// Create an empty registry whose libraries read models through `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            state: Mutex::new(RegistryState { libraries: HashMap::new(), building: HashMap::new() }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the library for `config`, building it on first request.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the library
    /// cannot be built. Nothing is registered on failure.
    pub fn get_or_create(&self, config: LibraryConfig) -> Result<Arc<CorrectionLibrary<S>>> {
        config.validate()?;
        let key = configuration_key(&config)?;

        let build_lock = {
            let mut state = self.lock()?;
            if let Some(library) = state.libraries.get(&key) {
                debug!(key = %key, "Reusing registered correction library");
                return Ok(Arc::clone(library));
            }
            Arc::clone(state.building.entry(key.clone()).or_default())
        };

        let _building = build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let built_meanwhile = self.lock()?.libraries.get(&key).map(Arc::clone);
        if let Some(library) = built_meanwhile {
            debug!(key = %key, "Reusing correction library built concurrently");
            return Ok(library);
        }

        let library = Arc::new(CorrectionLibrary::open(config, Arc::clone(&self.store))?);
        info!(key = %key, models = library.model_count(), "Registered correction library");

        let mut state = self.lock()?;
        state.building.remove(&key);
        state.libraries.insert(key, Arc::clone(&library));
        Ok(library)
    }

    /// Returns the shared library with no models.
    ///
    /// # Errors
    /// Returns an error if the registry lock is poisoned.
    pub fn empty(&self) -> Result<Arc<CorrectionLibrary<S>>> {
        let mut state = self.lock()?;
        let library = state
            .libraries
            .entry(EMPTY_LIBRARY_KEY.to_string())
            .or_insert_with(|| Arc::new(CorrectionLibrary::empty(Arc::clone(&self.store))));
        Ok(Arc::clone(library))
    }

    /// Looks up a registered library by key.
    pub fn get(&self, key: &str) -> Result<Option<Arc<CorrectionLibrary<S>>>> {
        Ok(self.lock()?.libraries.get(key).map(Arc::clone))
    }

    /// Unregisters a library. It is dropped once its last user releases it.
    pub fn remove(&self, key: &str) -> Result<Option<Arc<CorrectionLibrary<S>>>> {
        Ok(self.lock()?.libraries.remove(key))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.libraries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.libraries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.libraries.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState<S>>> {
        self.state.lock().map_err(|_| LibraryError::LockPoisoned("library registry"))
    }
}
