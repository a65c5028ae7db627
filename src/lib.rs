// src/lib.rs
//! RTK Surveyor Library
//!
//! Reads NMEA from an RTK-capable GNSS receiver, tracks the current fix and
//! RTK status, and pushes that state, with system health, to web clients.

pub mod clock;
pub mod config;
pub mod control;
pub mod display;
pub mod error;
pub mod gps;
pub mod hub;
pub mod logging;
pub mod session;
pub mod stats;
pub mod survey_log;
pub mod web;

// Re-export main types for convenience
pub use config::SurveyorConfig;
pub use control::{ControlCommand, ControlResponse, ControlRouter};
pub use error::{Result, SurveyorError};
pub use gps::{FixQuality, FixState, GpsSnapshot, Position};
pub use hub::{BroadcastHub, HubSettings, SnapshotListener, StateReader};
pub use session::{SessionController, SessionHandle, SessionState};
