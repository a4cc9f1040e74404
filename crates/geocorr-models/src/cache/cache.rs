//! Resident model set with LRU eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use super::types::{CacheStats, ModelHandle};

/// A model removed from memory, which the owner must close.
pub type Evicted<M> = (ModelHandle, Arc<M>);

/// Models currently held in memory, keyed by handle.
///
/// With a budget, recency is tracked most recent first and the least recently
/// used model is evicted before a new one would exceed the budget. Without a
/// budget nothing is ever evicted and recency is not tracked.
///
/// The cache never closes models itself; evicted entries are handed back to
/// the caller.
#[derive(Debug)]
pub struct ResidentCache<M> {
    max_resident: Option<usize>,
    models: HashMap<ModelHandle, Arc<M>>,
    /// Front is most recently used.
    recency: VecDeque<ModelHandle>,
    stats: CacheStats,
}

impl<M> ResidentCache<M> {
    pub fn new(max_resident: Option<usize>) -> Self {
        Self {
            max_resident,
            models: HashMap::new(),
            recency: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// Looks up a resident model, marking it most recently used.
    ///
    /// Counts a hit when found and a miss otherwise.
    pub fn get(&mut self, handle: ModelHandle) -> Option<Arc<M>> {
        let Some(model) = self.models.get(&handle).map(Arc::clone) else {
            self.stats.total_misses += 1;
            return None;
        };
        self.stats.total_hits += 1;
        self.touch(handle);
        debug!(handle = %handle, "Resident model hit");
        Some(model)
    }

    /// Adds a freshly loaded model as most recently used.
    ///
    /// Returns the models evicted to make room, least recently used first.
    /// Re-inserting a resident handle replaces the model and returns the old one.
    pub fn insert(&mut self, handle: ModelHandle, model: Arc<M>) -> Vec<Evicted<M>> {
        let mut evicted = Vec::new();

        if let Some(previous) = self.models.remove(&handle) {
            self.forget(handle);
            evicted.push((handle, previous));
        }

        if let Some(max) = self.max_resident {
            while self.models.len() >= max {
                let Some(lru) = self.recency.pop_back() else { break };
                if let Some(model) = self.models.remove(&lru) {
                    self.stats.total_evictions += 1;
                    info!(handle = %lru, "Evicted least recently used model");
                    evicted.push((lru, model));
                }
            }
            self.recency.push_front(handle);
        }

        self.models.insert(handle, model);
        self.stats.cache_size = self.models.len();
        evicted
    }

    /// Adds a model loaded at construction, behind every resident model in
    /// recency order. Does not count as a hit or miss and never evicts.
    ///
    /// Returns `false` (and drops nothing) when the budget is already full.
    pub fn preload(&mut self, handle: ModelHandle, model: Arc<M>) -> bool {
        if self.models.contains_key(&handle) {
            return true;
        }
        if self.max_resident.is_some_and(|max| self.models.len() >= max) {
            return false;
        }
        if self.max_resident.is_some() {
            self.recency.push_back(handle);
        }
        self.models.insert(handle, model);
        self.stats.cache_size = self.models.len();
        true
    }

    /// Removes every resident model, in handle order.
    pub fn drain(&mut self) -> Vec<Evicted<M>> {
        let mut drained: Vec<_> = self.models.drain().collect();
        drained.sort_by_key(|(handle, _)| *handle);
        self.recency.clear();
        self.stats.cache_size = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resident handles in ascending order.
    pub fn handles(&self) -> Vec<ModelHandle> {
        let mut handles: Vec<_> = self.models.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Resident handles, most recently used first. Empty without a budget.
    pub fn recency(&self) -> Vec<ModelHandle> {
        self.recency.iter().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { cache_size: self.models.len(), ..self.stats.clone() }
    }

    /// Verifies that the recency order and the resident map agree and that
    /// the budget is respected.
    ///
    /// # Errors
    /// Returns a description of the first inconsistency found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let Some(max) = self.max_resident else {
            if !self.recency.is_empty() {
                return Err(format!(
                    "unbounded cache tracks recency for {} models",
                    self.recency.len()
                ));
            }
            return Ok(());
        };

        if self.models.len() > max {
            return Err(format!("{} resident models exceed budget of {max}", self.models.len()));
        }
        if self.recency.len() != self.models.len() {
            return Err(format!(
                "recency order holds {} handles but {} models are resident",
                self.recency.len(),
                self.models.len()
            ));
        }
        for (position, handle) in self.recency.iter().enumerate() {
            if !self.models.contains_key(handle) {
                return Err(format!("handle {handle} in recency order is not resident"));
            }
            if self.recency.iter().skip(position + 1).any(|other| other == handle) {
                return Err(format!("handle {handle} appears twice in recency order"));
            }
        }
        Ok(())
    }

    fn touch(&mut self, handle: ModelHandle) {
        if self.max_resident.is_none() {
            return;
        }
        self.forget(handle);
        self.recency.push_front(handle);
    }

    fn forget(&mut self, handle: ModelHandle) {
        if let Some(position) = self.recency.iter().position(|h| *h == handle) {
            self.recency.remove(position);
        }
    }
}
