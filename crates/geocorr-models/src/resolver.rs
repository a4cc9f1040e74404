//! Spatial association of query stations with model stations.
//!
//! A query station is associated with a model station when their reference
//! codes match (if enabled) or when they lie within `max_separation_km` of
//! each other. The result, including "nothing nearby", is remembered for the
//! lifetime of the resolver so each distinct query station is scanned once.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use geocorr_abstraction::Station;
use tracing::debug;

use crate::attribute::Attribute;
use crate::cache::config::{LibraryConfig, StationMatch};
use crate::cache::types::ModelHandle;
use crate::error::{LibraryError, Result};
use crate::index::{ModelIndex, PhaseMap};

/// The model station a query station was associated with, if any, and what
/// it supports.
#[derive(Debug, Clone)]
struct Association {
    station: Option<Station>,
    phases: Arc<PhaseMap>,
}

#[derive(Debug, Default)]
struct SupportMemo {
    entries: HashMap<Station, Association>,
    used_stations: BTreeSet<Station>,
}

/// Resolves query stations to model handles through a [`ModelIndex`].
#[derive(Debug)]
pub struct SpatialResolver {
    max_separation_km: f64,
    match_by_refsta: bool,
    station_match: StationMatch,
    /// Shared by every query station with no associated model station.
    unsupported: Arc<PhaseMap>,
    memo: RwLock<SupportMemo>,
    scans: AtomicUsize,
}

impl SpatialResolver {
    /// Create a resolver with the association settings from `config`.
    pub fn new(config: &LibraryConfig) -> Self {
        Self::with_policy(config.max_separation_km, config.match_by_refsta, config.station_match)
    }

    pub fn with_policy(
        max_separation_km: f64,
        match_by_refsta: bool,
        station_match: StationMatch,
    ) -> Self {
        Self {
            max_separation_km,
            match_by_refsta,
            station_match,
            unsupported: Arc::new(PhaseMap::new()),
            memo: RwLock::new(SupportMemo::default()),
            scans: AtomicUsize::new(0),
        }
    }

    /// How far apart two stations are for association purposes, in km.
    ///
    /// Zero when reference-code matching is enabled and both stations carry
    /// the same real reference code; otherwise the great-circle separation at
    /// the model station's radius.
    pub fn distance_km(&self, model: &Station, query: &Station) -> f64 {
        if self.match_by_refsta
            && let (Some(a), Some(b)) = (model.known_reference_code(), query.known_reference_code())
            && a == b
        {
            return 0.0;
        }
        model.separation_km(query)
    }

    /// Scans `index` for the model station `query` should use, without memoizing.
    pub fn associate<'a>(&self, index: &'a ModelIndex, query: &Station) -> Option<&'a Station> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let candidates = index
            .stations()
            .iter()
            .map(|entry| (entry, self.distance_km(&entry.station, query)))
            .filter(|(_, distance)| *distance <= self.max_separation_km);

        let chosen = match self.station_match {
            StationMatch::First => candidates.map(|(entry, _)| entry).next(),
            StationMatch::Nearest => candidates
                .fold(None, |best: Option<(_, f64)>, (entry, distance)| match best {
                    Some((_, best_distance)) if best_distance <= distance => best,
                    _ => Some((entry, distance)),
                })
                .map(|(entry, _)| entry),
        };
        chosen.map(|entry| &entry.station)
    }

    /// Returns the memoized phase → attribute → handle map for `query`,
    /// computing it on first sight.
    ///
    /// # Errors
    /// Returns an error only if the memo lock is poisoned.
    pub fn support_for(&self, index: &ModelIndex, query: &Station) -> Result<Arc<PhaseMap>> {
        Ok(self.association(index, query)?.phases)
    }

    fn association(&self, index: &ModelIndex, query: &Station) -> Result<Association> {
        {
            let memo = self.memo.read().map_err(|_| LibraryError::LockPoisoned("support memo"))?;
            if let Some(association) = memo.entries.get(query) {
                return Ok(association.clone());
            }
        }

        let mut memo = self.memo.write().map_err(|_| LibraryError::LockPoisoned("support memo"))?;
        if let Some(association) = memo.entries.get(query) {
            return Ok(association.clone());
        }

        let association = match self.associate(index, query) {
            Some(model_station) => {
                debug!(
                    query = %query.code(),
                    model = %model_station.code(),
                    "Associated query station with model station"
                );
                Association {
                    station: Some(model_station.clone()),
                    phases: index
                        .phases_for(model_station)
                        .map_or_else(|| Arc::clone(&self.unsupported), Arc::clone),
                }
            }
            None => {
                debug!(query = %query.code(), "No model station within tolerance");
                Association { station: None, phases: Arc::clone(&self.unsupported) }
            }
        };
        memo.entries.insert(query.clone(), association.clone());
        Ok(association)
    }

    /// Finds the handle of the model supporting `query`/`phase`/`attribute`.
    ///
    /// `attribute` may be a canonical code (`TT`, `AZ`, `SH`) or a raw model
    /// attribute name. Returns `Ok(None)` when nothing supports the request.
    ///
    /// # Errors
    /// Returns an error only if the memo lock is poisoned.
    pub fn resolve(
        &self,
        index: &ModelIndex,
        query: &Station,
        phase: &str,
        attribute: &str,
    ) -> Result<Option<ModelHandle>> {
        let association = self.association(index, query)?;
        let Some(attribute) = Attribute::translate(attribute) else {
            return Ok(None);
        };
        let handle = association
            .phases
            .get(phase)
            .and_then(|attributes| attributes.get(&attribute))
            .copied();

        if handle.is_some()
            && let Some(model_station) = association.station
        {
            self.mark_used(model_station)?;
        }
        Ok(handle)
    }

    fn mark_used(&self, model_station: Station) -> Result<()> {
        {
            let memo = self.memo.read().map_err(|_| LibraryError::LockPoisoned("support memo"))?;
            if memo.used_stations.contains(&model_station) {
                return Ok(());
            }
        }
        self.memo
            .write()
            .map_err(|_| LibraryError::LockPoisoned("support memo"))?
            .used_stations
            .insert(model_station);
        Ok(())
    }

    /// Number of full index scans performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// Number of query stations memoized so far.
    pub fn memo_len(&self) -> usize {
        self.memo.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    /// Model stations that have served at least one resolved handle.
    pub fn used_stations(&self) -> Vec<Station> {
        let memo = self.memo.read().unwrap_or_else(PoisonError::into_inner);
        memo.used_stations.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockModelFile, MockModelStore};
    use tempfile::TempDir;

    fn build_index(temp: &TempDir, models: &[(&str, Station)]) -> ModelIndex {
        let files = models
            .iter()
            .map(|(name, station)| {
                let path = temp.path().join(name);
                MockModelFile::new(station.clone(), &["P"], "TT_DELTA_AK135")
                    .write(&path)
                    .unwrap();
                path
            })
            .collect();
        ModelIndex::build(&MockModelStore::new(), files, ".", None).unwrap().0
    }

    #[test]
    fn test_first_match_in_index_order() {
        let temp = TempDir::new().unwrap();
        let index = build_index(
            &temp,
            &[
                ("a.toml", Station::new("FAR", 10.0, 10.0)),
                ("b.toml", Station::new("EAST", 0.0, 1.0)),
                ("c.toml", Station::new("ORIGIN", 0.0, 0.0)),
            ],
        );
        let resolver = SpatialResolver::with_policy(150.0, false, StationMatch::First);
        let query = Station::new("Q", 0.0, 0.4);

        // ORIGIN is closer, but EAST comes first in index order.
        assert_eq!(resolver.associate(&index, &query).unwrap().code(), "EAST");
    }

    #[test]
    fn test_nearest_match_mode() {
        let temp = TempDir::new().unwrap();
        let index = build_index(
            &temp,
            &[
                ("a.toml", Station::new("EAST", 0.0, 1.0)),
                ("b.toml", Station::new("ORIGIN", 0.0, 0.0)),
            ],
        );
        let resolver = SpatialResolver::with_policy(150.0, false, StationMatch::Nearest);
        let query = Station::new("Q", 0.0, 0.4);
        assert_eq!(resolver.associate(&index, &query).unwrap().code(), "ORIGIN");

        // Equidistant candidates keep index order.
        let query = Station::new("Q", 0.0, 0.5);
        assert_eq!(resolver.associate(&index, &query).unwrap().code(), "EAST");
    }

    #[test]
    fn test_reference_code_short_circuit() {
        let model = Station::new("ARA0", 60.0, 25.0).with_reference_code("ARCES");
        let query = Station::new("ARB5", 10.0, 10.0).with_reference_code("ARCES");

        let enabled = SpatialResolver::with_policy(10.0, true, StationMatch::First);
        assert!(enabled.distance_km(&model, &query).abs() < f64::EPSILON);

        let disabled = SpatialResolver::with_policy(10.0, false, StationMatch::First);
        assert!(disabled.distance_km(&model, &query) > 1000.0);
    }

    #[test]
    fn test_placeholder_reference_codes_do_not_match() {
        let model = Station::new("A", 60.0, 25.0);
        let query = Station::new("B", 10.0, 10.0);
        let resolver = SpatialResolver::with_policy(10.0, true, StationMatch::First);
        assert!(resolver.distance_km(&model, &query) > 1000.0);
    }

    #[test]
    fn test_memoization_scans_once() {
        let temp = TempDir::new().unwrap();
        let index = build_index(&temp, &[("a.toml", Station::new("ORIGIN", 0.0, 0.0))]);
        let resolver = SpatialResolver::with_policy(10.0, false, StationMatch::First);
        let query = Station::new("ORIGIN", 0.0, 0.0);

        let first = resolver.resolve(&index, &query, "P", "TT").unwrap();
        let second = resolver.resolve(&index, &query, "P", "TT_PATH_CORRECTION").unwrap();
        assert_eq!(first, Some(ModelHandle::new(0)));
        assert_eq!(first, second);
        assert_eq!(resolver.scan_count(), 1);
        assert_eq!(resolver.memo_len(), 1);
        assert_eq!(resolver.used_stations().len(), 1);
    }

    #[test]
    fn test_negative_memoization() {
        let temp = TempDir::new().unwrap();
        let index = build_index(&temp, &[("a.toml", Station::new("ORIGIN", 0.0, 0.0))]);
        let resolver = SpatialResolver::with_policy(10.0, false, StationMatch::First);
        let far = Station::new("FAR", 45.0, 45.0);

        assert_eq!(resolver.resolve(&index, &far, "P", "TT").unwrap(), None);
        assert_eq!(resolver.resolve(&index, &far, "S", "AZ").unwrap(), None);
        assert_eq!(resolver.resolve(&index, &far, "P", "SH").unwrap(), None);
        assert_eq!(resolver.scan_count(), 1);

        let phases = resolver.support_for(&index, &far).unwrap();
        assert!(phases.is_empty());
        assert!(Arc::ptr_eq(&phases, &resolver.unsupported));
        assert!(resolver.used_stations().is_empty());
    }

    #[test]
    fn test_unknown_phase_or_attribute() {
        let temp = TempDir::new().unwrap();
        let index = build_index(&temp, &[("a.toml", Station::new("ORIGIN", 0.0, 0.0))]);
        let resolver = SpatialResolver::with_policy(10.0, false, StationMatch::First);
        let query = Station::new("Q", 0.0, 0.0);

        assert_eq!(resolver.resolve(&index, &query, "Lg", "TT").unwrap(), None);
        assert_eq!(resolver.resolve(&index, &query, "P", "AZ").unwrap(), None);
        assert_eq!(resolver.resolve(&index, &query, "P", "AMPLITUDE").unwrap(), None);
        assert_eq!(resolver.scan_count(), 1);

        // Associated, but nothing was resolved through it.
        assert!(resolver.used_stations().is_empty());
        resolver.resolve(&index, &query, "P", "TT").unwrap().unwrap();
        assert_eq!(resolver.used_stations(), vec![Station::new("ORIGIN", 0.0, 0.0)]);
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let temp = TempDir::new().unwrap();
        let index = build_index(&temp, &[("a.toml", Station::new("ORIGIN", 0.0, 0.0))]);
        let query = Station::new("Q", 0.0, 1.0);
        let exact = Station::new("ORIGIN", 0.0, 0.0).separation_km(&query);

        let resolver = SpatialResolver::with_policy(exact, false, StationMatch::First);
        assert!(resolver.associate(&index, &query).is_some());

        let resolver = SpatialResolver::with_policy(exact - 1e-6, false, StationMatch::First);
        assert!(resolver.associate(&index, &query).is_none());
    }
}
