// src/gps/data.rs
//! GPS data structures: position, fix state and the published snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fix quality code carried in field 6 of a GGA sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixQuality {
    NoFix,
    Gps,
    Dgps,
    Pps,
    RtkFixed,
    RtkFloat,
    Estimated,
    Manual,
    Simulation,
}

impl FixQuality {
    pub fn from_code(code: u8) -> Option<Self> {
        let quality = match code {
            0 => FixQuality::NoFix,
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::RtkFixed,
            5 => FixQuality::RtkFloat,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulation,
            _ => return None,
        };
        Some(quality)
    }

    pub fn code(self) -> u8 {
        match self {
            FixQuality::NoFix => 0,
            FixQuality::Gps => 1,
            FixQuality::Dgps => 2,
            FixQuality::Pps => 3,
            FixQuality::RtkFixed => 4,
            FixQuality::RtkFloat => 5,
            FixQuality::Estimated => 6,
            FixQuality::Manual => 7,
            FixQuality::Simulation => 8,
        }
    }

    /// Whether the receiver reported an actual position fix
    pub fn is_fix(self) -> bool {
        self != FixQuality::NoFix
    }

    /// Get fix type description
    pub fn description(self) -> &'static str {
        match self {
            FixQuality::NoFix => "No fix",
            FixQuality::Gps => "GPS",
            FixQuality::Dgps => "DGPS",
            FixQuality::Pps => "PPS",
            FixQuality::RtkFixed => "RTK Fixed",
            FixQuality::RtkFloat => "RTK Float",
            FixQuality::Estimated => "Estimated",
            FixQuality::Manual => "Manual",
            FixQuality::Simulation => "Simulation",
        }
    }
}

/// Position as reported by the receiver.
///
/// Numeric fields the receiver did not report are `None`, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Meters above mean sea level
    pub elevation: Option<f64>,
    pub satellites_used: Option<u8>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
    pub pdop: Option<f64>,
    /// 1-sigma horizontal error in meters, from GST
    pub accuracy_horizontal: Option<f64>,
    /// 1-sigma altitude error in meters, from GST
    pub accuracy_vertical: Option<f64>,
    #[serde(rename = "fix_type")]
    pub fix_quality: Option<FixQuality>,
    pub valid: bool,
}

impl Position {
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Format coordinate for display
    pub fn format_coordinate(coord: Option<f64>) -> String {
        match coord {
            Some(val) => format!("{:>14.8}°", val),
            None => "Unknown".to_string(),
        }
    }

    /// Format value with unit for display
    pub fn format_value<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
        match value {
            Some(val) => format!("{:>12} {}", val, unit),
            None => "Unknown".to_string(),
        }
    }
}

/// RTK and link status. `rtk_fixed` and `rtk_float` are never both set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixState {
    pub rtk_fixed: bool,
    pub rtk_float: bool,
    pub connected: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl FixState {
    /// Set the RTK flags from a fix quality, keeping them mutually exclusive
    pub fn set_rtk(&mut self, quality: FixQuality) {
        self.rtk_fixed = quality == FixQuality::RtkFixed;
        self.rtk_float = quality == FixQuality::RtkFloat;
    }

    pub fn clear_rtk(&mut self) {
        self.rtk_fixed = false;
        self.rtk_float = false;
    }
}

/// One immutable copy of the current position and fix state.
///
/// `sequence` increases by one for every snapshot the session publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsSnapshot {
    pub position: Position,
    pub fix: FixState,
    pub sequence: u64,
}

impl GpsSnapshot {
    /// The snapshot a session starts with: nothing known, nothing valid
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.fix.timestamp
    }

    /// Coarse status for displays: no fix, GPS, RTK float or RTK fixed
    pub fn status_label(&self) -> &'static str {
        if self.fix.rtk_fixed {
            "RTK FIXED"
        } else if self.fix.rtk_float {
            "RTK FLOAT"
        } else if self.position.valid {
            "GPS"
        } else {
            "NO FIX"
        }
    }

    /// Get the age of the snapshot relative to `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.fix.timestamp.map(|ts| now.signed_duration_since(ts))
    }
}
