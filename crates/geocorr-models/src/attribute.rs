//! Canonical correction attributes and the raw-name translation table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of observation a correction model applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Attribute {
    /// Travel time.
    #[serde(rename = "TT")]
    TravelTime,
    /// Azimuth.
    #[serde(rename = "AZ")]
    Azimuth,
    /// Horizontal slowness.
    #[serde(rename = "SH")]
    Slowness,
}

/// Raw attribute names found in model files and the canonical attribute each one maps to.
pub const ATTRIBUTE_TRANSLATIONS: [(&str, Attribute); 9] = [
    ("TT_DELTA_AK135", Attribute::TravelTime),
    ("TT_PATH_CORRECTION", Attribute::TravelTime),
    ("TT_MODEL_UNCERTAINTY", Attribute::TravelTime),
    ("AZIMUTH_PATH_CORRECTION", Attribute::Azimuth),
    ("AZIMUTH_DELTA_AK135", Attribute::Azimuth),
    ("AZIMUTH_MODEL_UNCERTAINTY", Attribute::Azimuth),
    ("SLOWNESS_PATH_CORRECTION", Attribute::Slowness),
    ("SLOWNESS_DELTA_AK135", Attribute::Slowness),
    ("SLOWNESS_MODEL_UNCERTAINTY", Attribute::Slowness),
];

impl Attribute {
    /// Short code used by callers (`TT`, `AZ`, `SH`).
    pub const fn code(self) -> &'static str {
        match self {
            Self::TravelTime => "TT",
            Self::Azimuth => "AZ",
            Self::Slowness => "SH",
        }
    }

    /// Translates a raw model attribute name through [`ATTRIBUTE_TRANSLATIONS`].
    pub fn from_model_name(name: &str) -> Option<Self> {
        ATTRIBUTE_TRANSLATIONS
            .iter()
            .find(|(raw, _)| *raw == name)
            .map(|(_, attribute)| *attribute)
    }

    /// Accepts either a canonical code or a raw model attribute name.
    pub fn translate(name: &str) -> Option<Self> {
        let name = name.trim();
        match name {
            "TT" => Some(Self::TravelTime),
            "AZ" => Some(Self::Azimuth),
            "SH" => Some(Self::Slowness),
            _ => Self::from_model_name(name),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Attribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::translate(s).ok_or_else(|| format!("unrecognized attribute '{s}'"))
    }
}
