// src/config.rs
//! Configuration management
//!
//! Stored as JSON at `$HOME/.config/rtk-surveyor/config.json`. Every field has
//! a default, so a partial file only overrides what it names.

use crate::{
    error::{Result, SurveyorError},
    gps::SimulationScenario,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyorConfig {
    // GPS receiver
    pub serial_port: String,
    pub serial_baudrate: u32,
    pub read_timeout_ms: u64,
    pub simulate: bool,
    pub simulate_on_missing_device: bool,
    pub simulation_scenario: SimulationScenario,
    pub simulation_interval_ms: u64,

    // Session supervision
    pub max_consecutive_failures: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,

    // History and push cadence
    pub max_data_points: usize,
    pub gps_push_interval_ms: u64,
    pub status_push_interval_ms: u64,
    pub stats_sample_interval_ms: u64,
    pub stale_after_ms: u64,

    // Web dashboard
    pub http_host: String,
    pub http_port: u16,

    // Survey log and diagnostics
    pub survey_log_path: PathBuf,
    pub logging_enabled: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for SurveyorConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyAMA0".to_string(),
            serial_baudrate: 38400,
            read_timeout_ms: 2000,
            simulate: false,
            simulate_on_missing_device: true,
            simulation_scenario: SimulationScenario::default(),
            simulation_interval_ms: 1000,
            max_consecutive_failures: 10,
            max_retries: 5,
            retry_backoff_ms: 1000,
            max_retry_backoff_ms: 30_000,
            max_data_points: 50,
            gps_push_interval_ms: 1000,
            status_push_interval_ms: 2000,
            stats_sample_interval_ms: 1000,
            stale_after_ms: 5000,
            http_host: "0.0.0.0".to_string(),
            http_port: 5000,
            survey_log_path: PathBuf::from("survey_log.jsonl"),
            logging_enabled: false,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl SurveyorConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    /// Load from a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SurveyorError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            SurveyorError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SurveyorError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| SurveyorError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| SurveyorError::Config("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("rtk-surveyor")
            .join("config.json"))
    }

    /// Reject settings the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("read_timeout_ms", self.read_timeout_ms),
            ("gps_push_interval_ms", self.gps_push_interval_ms),
            ("status_push_interval_ms", self.status_push_interval_ms),
            ("stats_sample_interval_ms", self.stats_sample_interval_ms),
            ("stale_after_ms", self.stale_after_ms),
            ("max_data_points", self.max_data_points as u64),
            ("max_consecutive_failures", self.max_consecutive_failures as u64),
            ("serial_baudrate", self.serial_baudrate as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SurveyorError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.max_retry_backoff_ms < self.retry_backoff_ms {
            return Err(SurveyorError::Config(
                "max_retry_backoff_ms must not be below retry_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.simulate = false;
        self.serial_port = port;
        self.serial_baudrate = baudrate;
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation_interval_ms)
    }

    pub fn gps_push_interval(&self) -> Duration {
        Duration::from_millis(self.gps_push_interval_ms)
    }

    pub fn status_push_interval(&self) -> Duration {
        Duration::from_millis(self.status_push_interval_ms)
    }

    pub fn stats_sample_interval(&self) -> Duration {
        Duration::from_millis(self.stats_sample_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SurveyorConfig::default();
        assert_eq!(config.serial_baudrate, 38400);
        assert_eq!(config.max_data_points, 50);
        // Longer than the gap between 1 Hz NMEA bursts
        assert!(config.read_timeout() > Duration::from_secs(1));
        assert!(config.simulate_on_missing_device);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_update_serial() {
        let mut config = SurveyorConfig {
            simulate: true,
            ..SurveyorConfig::default()
        };
        config.update_serial("/dev/ttyUSB0".to_string(), 115200);
        assert!(!config.simulate);
        assert_eq!(config.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.serial_baudrate, 115200);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"serial_port": "/dev/ttyS0", "http_port": 8080}"#).unwrap();

        let config = SurveyorConfig::load_from(&path).unwrap();
        assert_eq!(config.serial_port, "/dev/ttyS0");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.serial_baudrate, 38400);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = SurveyorConfig {
            simulation_scenario: SimulationScenario::RtkAcquisition,
            max_data_points: 120,
            ..SurveyorConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(SurveyorConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SurveyorConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, SurveyorConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = SurveyorConfig {
            gps_push_interval_ms: 0,
            ..SurveyorConfig::default()
        };
        assert!(matches!(config.validate(), Err(SurveyorError::Config(_))));
    }
}
