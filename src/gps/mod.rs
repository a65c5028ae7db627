// src/gps/mod.rs
//! GPS data handling: decoding, classification and line sources

pub mod classifier;
pub mod data;
pub mod nmea;
pub mod source;

pub use data::{FixQuality, FixState, GpsSnapshot, Position};
pub use source::{LineSource, SimulationScenario, SourceSpec};
