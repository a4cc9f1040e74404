//! Station identity and geometry.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Placeholder reference code meaning "no reference station".
pub const REFSTA_NA: &str = "-";

/// Ondate used when a station has no start of validity.
pub const ONDATE_NA: i64 = -1;

/// Offdate used when a station is still operating.
pub const OFFDATE_NA: i64 = 2_286_324;

/// WGS84 equatorial radius in km.
const EQUATORIAL_RADIUS_KM: f64 = 6378.137;

/// WGS84 inverse flattening.
const INVERSE_FLATTENING: f64 = 298.257_223_563;

fn eccentricity_squared() -> f64 {
    let flattening = 1.0 / INVERSE_FLATTENING;
    flattening * (2.0 - flattening)
}

/// A seismic station record: an identity, a validity window, and a position.
///
/// Two stations are the *same record* when code and validity window match;
/// position and reference code do not take part in equality, hashing, or
/// ordering. The geocentric unit vector and local Earth radius are computed
/// once when the position is set, so a `Station` never needs invalidation.
#[derive(Debug, Clone)]
pub struct Station {
    code: String,
    reference_code: String,
    valid_from: i64,
    valid_to: i64,
    lat: f64,
    lon: f64,
    elevation: f64,
    unit_vector: [f64; 3],
    radius: f64,
}

impl Station {
    /// Creates a station at geographic `lat`/`lon` (degrees), with no
    /// reference code, zero elevation, and an open validity window.
    pub fn new(code: impl Into<String>, lat: f64, lon: f64) -> Self {
        let mut station = Self {
            code: code.into(),
            reference_code: REFSTA_NA.to_string(),
            valid_from: ONDATE_NA,
            valid_to: OFFDATE_NA,
            lat,
            lon,
            elevation: 0.0,
            unit_vector: [0.0; 3],
            radius: 0.0,
        };
        station.locate();
        station
    }

    /// Sets the reference station code.
    #[must_use]
    pub fn with_reference_code(mut self, reference_code: impl Into<String>) -> Self {
        self.reference_code = reference_code.into();
        self
    }

    /// Sets the validity window (Julian dates, inclusive).
    #[must_use]
    pub fn with_validity(mut self, valid_from: i64, valid_to: i64) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    /// Sets the elevation in km above the ellipsoid.
    #[must_use]
    pub fn with_elevation(mut self, elevation_km: f64) -> Self {
        self.elevation = elevation_km;
        self.locate();
        self
    }

    fn locate(&mut self) {
        let e2 = eccentricity_squared();
        let geocentric_lat = (self.lat.to_radians().tan() * (1.0 - e2)).atan();
        let lon = self.lon.to_radians();
        self.unit_vector = [
            geocentric_lat.cos() * lon.cos(),
            geocentric_lat.cos() * lon.sin(),
            geocentric_lat.sin(),
        ];
        let z = self.unit_vector[2];
        self.radius = EQUATORIAL_RADIUS_KM / (1.0 + e2 / (1.0 - e2) * z * z).sqrt() + self.elevation;
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn reference_code(&self) -> &str {
        &self.reference_code
    }

    /// Returns the reference code unless it is missing or the placeholder.
    pub fn known_reference_code(&self) -> Option<&str> {
        let code = self.reference_code.trim();
        (!code.is_empty() && code != REFSTA_NA).then_some(code)
    }

    pub fn valid_from(&self) -> i64 {
        self.valid_from
    }

    pub fn valid_to(&self) -> i64 {
        self.valid_to
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    /// Geocentric unit vector of the station position.
    pub fn unit_vector(&self) -> [f64; 3] {
        self.unit_vector
    }

    /// Distance from the Earth's centre to the station, in km.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Angular separation between two stations, in radians.
    pub fn angle_to(&self, other: &Self) -> f64 {
        let [ax, ay, az] = self.unit_vector;
        let [bx, by, bz] = other.unit_vector;
        let cross = [ay * bz - az * by, az * bx - ax * bz, ax * by - ay * bx];
        let cross_norm = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
        let dot = ax * bx + ay * by + az * bz;
        cross_norm.atan2(dot)
    }

    /// Great-circle separation from `other`, in km at this station's radius.
    pub fn separation_km(&self, other: &Self) -> f64 {
        self.angle_to(other) * self.radius
    }
}

impl PartialEq for Station {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.valid_from == other.valid_from
            && self.valid_to == other.valid_to
    }
}

impl Eq for Station {}

impl Hash for Station {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.valid_from.hash(state);
        self.valid_to.hash(state);
    }
}

impl Ord for Station {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code
            .cmp(&other.code)
            .then(self.valid_from.cmp(&other.valid_from))
            .then(self.valid_to.cmp(&other.valid_to))
    }
}

impl PartialOrd for Station {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} {:<6} {:>7} {:>7} {:>13.6} {:>14.6} {:>9.3}",
            self.code,
            self.reference_code,
            self.valid_from,
            self.valid_to,
            self.lat,
            self.lon,
            self.elevation
        )
    }
}
