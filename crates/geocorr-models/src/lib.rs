//! Bounded, disk-backed cache of station-specific seismic correction models.
//!
//! A [`CorrectionLibrary`] discovers every correction model under a root
//! directory, indexes them by station, phase and attribute, associates
//! arbitrary query stations with nearby model stations, and keeps a bounded
//! set of models loaded in memory.
//!
//! # Components
//!
//! - **scan**: recursive discovery of model files in sorted order
//! - **index**: station → phase → attribute → handle, built once
//! - **resolver**: memoized spatial association of query stations
//! - **cache**: resident models with LRU eviction, plus configuration
//! - **registry**: one shared library per configuration
//! - **mock**: a file-backed store used by tests

pub mod attribute;
pub mod cache;
pub mod error;
pub mod index;
pub mod library;
pub mod mock;
pub mod registry;
pub mod resolver;
pub mod scan;

pub use attribute::{ATTRIBUTE_TRANSLATIONS, Attribute};
pub use cache::{
    CONFIG_SECTION, CacheStats, ConfigError, LibraryConfig, ModelFileRecord, ModelHandle,
    ResidentCache, StationMatch, load_library_config,
};
pub use error::{LibraryError, Result};
pub use index::{AttributeMap, IndexedStation, ModelIndex, PhaseMap};
pub use library::CorrectionLibrary;
pub use mock::{MockModel, MockModelFile, MockModelStore};
pub use registry::{EMPTY_LIBRARY_KEY, LibraryRegistry, configuration_key};
pub use resolver::SpatialResolver;
pub use scan::{BUNDLE_DESCRIPTOR, BUNDLE_MODEL_DIRECTORY, DirectoryScanner, effective_root};

pub use geocorr_abstraction::{InterpolatorType, ModelMetadata, ModelStore, Station, StoreError};
