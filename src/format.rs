//! Byte-count and throughput formatting.
//!
//! All scales are binary multiples (1024, 1024^2). Bit units multiply the
//! byte count by 8 first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpeedError;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Display unit selected with the single-character `k`/`K`/`m`/`M` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "k")]
    KiloBit,
    #[serde(rename = "K")]
    KiloByte,
    #[serde(rename = "m")]
    MegaBit,
    #[default]
    #[serde(rename = "M")]
    MegaByte,
}

impl Unit {
    pub fn code(&self) -> char {
        match self {
            Self::KiloBit => 'k',
            Self::KiloByte => 'K',
            Self::MegaBit => 'm',
            Self::MegaByte => 'M',
        }
    }

    pub fn data_label(&self) -> &'static str {
        match self {
            Self::KiloBit => "Kbit",
            Self::KiloByte => "KByte",
            Self::MegaBit => "Mbit",
            Self::MegaByte => "MByte",
        }
    }

    pub fn speed_label(&self) -> &'static str {
        match self {
            Self::KiloBit => "Kbit/s",
            Self::KiloByte => "KByte/s",
            Self::MegaBit => "Mbit/s",
            Self::MegaByte => "MByte/s",
        }
    }

    fn scale(&self, bytes: u64) -> f64 {
        let bytes = bytes as f64;
        match self {
            Self::KiloBit => bytes * 8.0 / KIB,
            Self::KiloByte => bytes / KIB,
            Self::MegaBit => bytes * 8.0 / MIB,
            Self::MegaByte => bytes / MIB,
        }
    }
}

impl FromStr for Unit {
    type Err = SpeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "k" => Ok(Self::KiloBit),
            "K" => Ok(Self::KiloByte),
            "m" => Ok(Self::MegaBit),
            "M" => Ok(Self::MegaByte),
            other => Err(SpeedError::InvalidUnit(other.to_string())),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A formatted magnitude and its unit label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub label: &'static str,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.label)
    }
}

/// Express a byte count in `unit`.
pub fn format_data(bytes: u64, unit: Unit) -> Quantity {
    Quantity {
        value: unit.scale(bytes),
        label: unit.data_label(),
    }
}

/// Express a transfer rate in `unit` per second.
///
/// A non-positive (or NaN) elapsed time yields a speed of zero.
pub fn format_speed(bytes: u64, elapsed_secs: f64, unit: Unit) -> Quantity {
    let value = if elapsed_secs > 0.0 {
        unit.scale(bytes) / elapsed_secs
    } else {
        0.0
    };
    Quantity {
        value,
        label: unit.speed_label(),
    }
}
