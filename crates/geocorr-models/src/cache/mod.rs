//! Model caching for correction libraries.
//!
//! Keeps a bounded set of loaded models in memory and releases the least
//! recently used ones when the budget is exceeded.

#[allow(clippy::module_inception)]
pub mod cache;
pub mod config;
pub mod types;

pub use cache::{Evicted, ResidentCache};
pub use config::{CONFIG_SECTION, ConfigError, LibraryConfig, StationMatch, load_library_config};
pub use types::{CacheStats, ModelFileRecord, ModelHandle};
