//! Core data types for the model cache.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Stable identifier of one discovered model file.
///
/// Handles are dense, start at zero, and follow sorted path order, so an
/// unchanged directory always produces the same handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModelHandle(usize);

impl ModelHandle {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Converts a signed handle, as used by callers that encode "not found"
    /// as `-1`. Negative values yield `None`.
    pub fn from_raw(raw: i64) -> Option<Self> {
        usize::try_from(raw).ok().map(Self)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A discovered model file and its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFileRecord {
    /// Handle assigned at construction.
    pub handle: ModelHandle,
    /// Absolute path of the model file.
    pub path: PathBuf,
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total number of requests served from memory.
    pub total_hits: u64,
    /// Total number of requests that loaded a model from disk.
    pub total_misses: u64,
    /// Total number of models released to stay within budget.
    pub total_evictions: u64,
    /// Current number of resident models.
    pub cache_size: usize,
}

impl CacheStats {
    /// Fraction of requests served from memory, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 { 0.0 } else { self.total_hits as f64 / total as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_from_raw() {
        assert_eq!(ModelHandle::from_raw(-1), None);
        assert_eq!(ModelHandle::from_raw(0), Some(ModelHandle::new(0)));
        assert_eq!(ModelHandle::from_raw(7).unwrap().index(), 7);
    }

    #[test]
    fn test_handle_ordering_and_display() {
        assert!(ModelHandle::new(1) < ModelHandle::new(2));
        assert_eq!(ModelHandle::new(42).to_string(), "42");
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.total_misses, 0);
        assert_eq!(stats.total_evictions, 0);
        assert_eq!(stats.cache_size, 0);
        assert!(stats.hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats { total_hits: 3, total_misses: 1, ..CacheStats::default() };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_hits"], 3);
    }
}
