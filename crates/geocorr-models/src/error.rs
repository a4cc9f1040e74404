//! Error types for the correction model library.

use std::path::PathBuf;

use geocorr_abstraction::StoreError;
use thiserror::Error;

use crate::cache::config::ConfigError;
use crate::cache::types::ModelHandle;

/// Errors raised while building or using a correction library.
///
/// "No model supports this station/phase/attribute" is not an error: lookups
/// return `None` for that case.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Configuration file could not be read or parsed.
    #[error("Configuration file error: {0}")]
    ConfigFile(String),

    /// The model root directory does not exist.
    #[error("Model directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// The model root exists but is not a directory.
    #[error("Model root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The root looks like a model definition bundle but lacks its model subdirectory.
    #[error(
        "{} appears to be a model definition directory but does not contain a {} subdirectory",
        root.display(),
        expected
    )]
    MissingBundleDirectory {
        /// The configured root.
        root: PathBuf,
        /// Name of the subdirectory that should hold the models.
        expected: &'static str,
    },

    /// A discovered model could not be indexed, even by fully loading it.
    #[error("Failed to index model {}: {source}", path.display())]
    Index {
        /// The model file.
        path: PathBuf,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A model that was indexed at construction failed to load on demand.
    #[error("Failed to load model {handle} from {}: {source}", path.display())]
    Load {
        /// Handle of the requested model.
        handle: ModelHandle,
        /// The model file.
        path: PathBuf,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A lock guarding library state was poisoned by a panicking thread.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// I/O error while resolving paths.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, LibraryError>;
