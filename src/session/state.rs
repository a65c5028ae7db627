// src/session/state.rs
//! Session state machine and read statistics

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::VecDeque, fmt, time::Duration};

/// Number of raw sentences kept for display
const RECENT_SENTENCES: usize = 5;

/// Lifecycle of the GPS session.
///
/// `Disconnected -> Connecting -> Streaming -> (Disconnected | Degraded)`;
/// `Degraded` retries with backoff and ends in `Failed` once the retry budget
/// is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Degraded,
    Failed,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        self == SessionState::Streaming
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Degraded => "degraded",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Retry tuning for the session supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Consecutive decode failures that push a streaming session into `Degraded`
    pub max_consecutive_failures: u32,
    /// Reconnect attempts allowed before the session gives up
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            max_retries: 5,
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(30),
        }
    }
}

impl SessionSettings {
    /// Exponential backoff for the given attempt (1-based), capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_retry_backoff)
    }
}

/// Counters describing the health of the NMEA stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub messages_received: u64,
    pub parsing_errors: u64,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_gga_time: Option<DateTime<Utc>>,
    pub last_rmc_time: Option<DateTime<Utc>>,
    pub reconnects: u32,
    pub recent_sentences: VecDeque<String>,
}

impl SessionStatistics {
    pub(crate) fn record_line(&mut self, line: &str, at: DateTime<Utc>) {
        self.messages_received += 1;
        self.last_message_time = Some(at);
        self.recent_sentences.push_back(line.to_string());
        if self.recent_sentences.len() > RECENT_SENTENCES {
            self.recent_sentences.pop_front();
        }
        self.update_error_rate();
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self, error: &str) {
        self.parsing_errors += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
        self.update_error_rate();
    }

    fn update_error_rate(&mut self) {
        self.error_rate = self.parsing_errors as f64 / self.messages_received.max(1) as f64;
    }
}
