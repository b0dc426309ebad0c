//! Hashrate units and normalization to TH/s.
//!
//! Devices and the pool report hashrates in whatever unit they like
//! ("GH/s" from Antminer stats, "TH/s" from the pool). Everything the
//! crate compares or exports is first brought to terahashes per second.

use std::fmt;

use strum::{Display, EnumIter};

/// A recognized hashrate magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum HashRateUnit {
    #[strum(to_string = "PH/s")]
    Peta,
    #[strum(to_string = "TH/s")]
    Tera,
    #[strum(to_string = "GH/s")]
    Giga,
    #[strum(to_string = "MH/s")]
    Mega,
}

impl HashRateUnit {
    /// Parse a unit string.
    ///
    /// Case-insensitive, surrounding whitespace ignored, the `/s` suffix
    /// optional ("GH/s", "gh", " TH/S "). Returns `None` for anything
    /// else, including the empty string.
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = unit.trim().to_ascii_uppercase();
        let prefix = unit.strip_suffix("/S").unwrap_or(&unit);

        match prefix {
            "PH" => Some(Self::Peta),
            "TH" => Some(Self::Tera),
            "GH" => Some(Self::Giga),
            "MH" => Some(Self::Mega),
            _ => None,
        }
    }

    /// Multiplier from this unit to TH/s.
    pub fn to_tera_factor(self) -> f64 {
        match self {
            Self::Peta => 1_000.0,
            Self::Tera => 1.0,
            Self::Giga => 1.0 / 1_000.0,
            Self::Mega => 1.0 / 1_000_000.0,
        }
    }
}

/// Convert `value` expressed in `unit` to TH/s.
///
/// Zero is returned as zero without looking at the unit. An unknown or
/// empty unit passes the value through unchanged; callers that care can
/// check [`HashRateUnit::parse`] and treat such a value as unverified.
pub fn normalize(value: f64, unit: &str) -> f64 {
    if value == 0.0 {
        return 0.0;
    }

    match HashRateUnit::parse(unit) {
        Some(unit) => value * unit.to_tera_factor(),
        None => value,
    }
}

/// Split a pool-style "value unit" string such as "306.23 TH/s".
///
/// - "" yields `(0.0, "")`
/// - a bare number yields `(n, "")`
/// - an unparsable number keeps the unit: `(0.0, unit)`
pub fn parse_hashrate(text: &str) -> (f64, String) {
    let text = text.trim();
    if text.is_empty() {
        return (0.0, String::new());
    }

    let mut parts = text.split_whitespace();
    let number = parts.next().unwrap_or_default();
    let unit = parts.next();

    match unit {
        Some(unit) => (number.parse().unwrap_or(0.0), unit.to_string()),
        None => (text.parse().unwrap_or(0.0), String::new()),
    }
}

/// Two-decimal TH/s display, as used in exported reports.
pub struct TeraHashes(pub f64);

impl fmt::Display for TeraHashes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
