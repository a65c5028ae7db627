// src/session/mod.rs
//! GPS session controller
//!
//! The controller owns the line source and is the only writer of the current
//! [`GpsSnapshot`] and of the position history. Everything else talks to it
//! through a cloneable [`SessionHandle`], which only hands out copies.

pub mod history;
pub mod state;

pub use history::{HistoryBuffer, HistoryStore};
pub use state::{SessionSettings, SessionState, SessionStatistics};

use crate::{
    clock::SharedClock,
    config::SurveyorConfig,
    error::{CommandError, DecodeError, Result, SessionError},
    gps::{
        classifier::{classify, Classification, FixDraft},
        nmea::{decode_bytes, SentenceType},
        GpsSnapshot, LineSource, SourceSpec,
    },
    stats::SystemStats,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// State shared between the controller and its handles
#[derive(Debug)]
struct SessionShared {
    snapshot: watch::Sender<Arc<GpsSnapshot>>,
    state: watch::Sender<SessionState>,
    statistics: watch::Sender<Arc<SessionStatistics>>,
    history: HistoryStore,
    logging: AtomicBool,
    restart: Notify,
    shutdown: CancellationToken,
}

/// Why the streaming loop stopped
#[derive(Debug)]
enum StreamEnd {
    Shutdown,
    Restart,
    Failed(SessionError),
}

/// Owns the GPS line source and runs the read loop
pub struct SessionController {
    spec: SourceSpec,
    settings: SessionSettings,
    clock: SharedClock,
    draft: FixDraft,
    sequence: u64,
    statistics: SessionStatistics,
    decoded_since_connect: u64,
    shared: Arc<SessionShared>,
}

impl SessionController {
    pub fn new(
        spec: SourceSpec,
        settings: SessionSettings,
        max_data_points: usize,
        clock: SharedClock,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(GpsSnapshot::initial()));
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (statistics, _) = watch::channel(Arc::new(SessionStatistics::default()));

        Self {
            spec,
            settings,
            clock,
            draft: FixDraft::default(),
            sequence: 0,
            statistics: SessionStatistics::default(),
            decoded_since_connect: 0,
            shared: Arc::new(SessionShared {
                snapshot,
                state,
                statistics,
                history: HistoryStore::new(max_data_points),
                logging: AtomicBool::new(false),
                restart: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build a controller from configuration, picking the line source
    pub fn from_config(config: &SurveyorConfig, clock: SharedClock) -> Result<Self> {
        let spec = SourceSpec::from_config(config)?;
        let settings = SessionSettings {
            max_consecutive_failures: config.max_consecutive_failures,
            max_retries: config.max_retries,
            retry_backoff: std::time::Duration::from_millis(config.retry_backoff_ms),
            max_retry_backoff: std::time::Duration::from_millis(config.max_retry_backoff_ms),
        };
        let controller = Self::new(spec, settings, config.max_data_points, clock);
        controller.handle().set_logging(config.logging_enabled);
        Ok(controller)
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn source(&self) -> &SourceSpec {
        &self.spec
    }

    /// Latest snapshot, or the all-invalid initial one
    pub fn current_snapshot(&self) -> Arc<GpsSnapshot> {
        self.shared.snapshot.borrow().clone()
    }

    /// Feed one raw line through the decoder and classifier.
    ///
    /// On success the snapshot is replaced first, then (if logging is active)
    /// appended to the history. On failure only the failure counters move.
    pub fn ingest_line(&mut self, raw: &[u8]) -> std::result::Result<Classification, DecodeError> {
        let now = self.clock.now();
        self.statistics
            .record_line(String::from_utf8_lossy(raw).trim(), now);

        let sentence = match decode_bytes(raw) {
            Ok(sentence) => sentence,
            Err(error) => {
                tracing::debug!(kind = error.kind(), %error, "Dropped NMEA line");
                self.statistics.record_failure(error.kind());
                self.publish_statistics();
                return Err(error);
            }
        };

        self.statistics.record_success();
        self.decoded_since_connect += 1;
        match sentence.sentence_type {
            SentenceType::Gga => self.statistics.last_gga_time = Some(now),
            SentenceType::Rmc => self.statistics.last_rmc_time = Some(now),
            _ => {}
        }

        let classification = classify(&sentence, &mut self.draft);
        if classification == Classification::Updated {
            // Timestamps never go backwards, even if the wall clock does
            let timestamp = match self.draft.fix.timestamp {
                Some(previous) if previous > now => previous,
                _ => now,
            };
            self.draft.fix.timestamp = Some(timestamp);
            self.draft.fix.connected = true;

            let snapshot = self.publish_snapshot();
            if self.shared.logging.load(Ordering::Acquire) {
                self.shared.history.append_position(snapshot);
            }
        }

        self.publish_statistics();
        Ok(classification)
    }

    /// Run the session until shutdown or until the retry budget is spent.
    ///
    /// `Ok(())` means a requested shutdown. An error is the fatal connection
    /// fault the host process should act on.
    pub async fn run(mut self) -> std::result::Result<(), SessionError> {
        let shared = Arc::clone(&self.shared);
        let mut attempts: u32 = 0;

        tracing::info!(source = %self.spec.describe(), "GPS session starting");

        loop {
            if shared.shutdown.is_cancelled() {
                self.go_offline(SessionState::Disconnected);
                return Ok(());
            }

            self.set_state(SessionState::Connecting);
            let opened = tokio::select! {
                _ = shared.shutdown.cancelled() => {
                    self.go_offline(SessionState::Disconnected);
                    return Ok(());
                }
                opened = self.spec.open() => opened,
            };

            let outcome = match opened {
                Ok(source) => {
                    tracing::info!(source = %self.spec.describe(), "GPS connected");
                    self.decoded_since_connect = 0;
                    self.set_state(SessionState::Streaming);
                    // The source, and with it the device handle, is dropped
                    // when streaming returns
                    self.stream(source).await
                }
                Err(error) => StreamEnd::Failed(error),
            };

            if self.decoded_since_connect > 0 {
                attempts = 0;
            }

            match outcome {
                StreamEnd::Shutdown => {
                    self.go_offline(SessionState::Disconnected);
                    tracing::info!("GPS session stopped");
                    return Ok(());
                }
                StreamEnd::Restart => {
                    tracing::info!("GPS session restart requested");
                    self.go_offline(SessionState::Disconnected);
                    self.statistics.reconnects += 1;
                    self.publish_statistics();
                    attempts = 0;
                }
                StreamEnd::Failed(error) => {
                    attempts += 1;
                    self.go_offline(SessionState::Degraded);

                    if attempts > self.settings.max_retries {
                        self.set_state(SessionState::Failed);
                        tracing::error!(%error, attempts, "GPS session retry budget exhausted");
                        return Err(SessionError::RetryBudgetExhausted { attempts });
                    }

                    let delay = self.settings.backoff_delay(attempts);
                    tracing::warn!(%error, attempt = attempts, ?delay, "GPS session degraded, retrying");

                    tokio::select! {
                        _ = shared.shutdown.cancelled() => {
                            self.go_offline(SessionState::Disconnected);
                            return Ok(());
                        }
                        _ = shared.restart.notified() => {
                            tracing::info!("GPS session restart requested while degraded");
                            self.set_state(SessionState::Disconnected);
                            self.statistics.reconnects += 1;
                            self.publish_statistics();
                            attempts = 0;
                        }
                        _ = tokio::time::sleep(delay) => {
                            self.statistics.reconnects += 1;
                            self.publish_statistics();
                        }
                    }
                }
            }
        }
    }

    async fn stream(&mut self, mut source: LineSource) -> StreamEnd {
        let shared = Arc::clone(&self.shared);

        loop {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => return StreamEnd::Shutdown,
                _ = shared.restart.notified() => return StreamEnd::Restart,
                line = source.next_line() => match line {
                    Ok(bytes) => {
                        if self.ingest_line(&bytes).is_err()
                            && self.statistics.consecutive_failures >= self.settings.max_consecutive_failures
                        {
                            return StreamEnd::Failed(SessionError::TooManyDecodeFailures(
                                self.statistics.consecutive_failures,
                            ));
                        }
                    }
                    Err(error) => return StreamEnd::Failed(error),
                },
            }
        }
    }

    fn publish_snapshot(&mut self) -> GpsSnapshot {
        self.sequence += 1;
        let snapshot = GpsSnapshot {
            position: self.draft.position.clone(),
            fix: self.draft.fix.clone(),
            sequence: self.sequence,
        };
        self.shared.snapshot.send_replace(Arc::new(snapshot.clone()));
        snapshot
    }

    fn publish_statistics(&self) {
        self.shared
            .statistics
            .send_replace(Arc::new(self.statistics.clone()));
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "GPS session state changed");
        }
    }

    /// Enter a non-streaming state and tell readers the link is down
    fn go_offline(&mut self, state: SessionState) {
        self.set_state(state);
        self.statistics.consecutive_failures = 0;
        if self.draft.fix.connected {
            self.draft.fix.connected = false;
            self.publish_snapshot();
        }
    }
}

/// Cheap, cloneable read side of the session plus its control hooks
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Latest snapshot; never waits on the read loop
    pub fn current_snapshot(&self) -> Arc<GpsSnapshot> {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<GpsSnapshot>> {
        self.shared.snapshot.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn statistics(&self) -> Arc<SessionStatistics> {
        self.shared.statistics.borrow().clone()
    }

    /// Number of lines the decoder has rejected so far
    pub fn failure_count(&self) -> u64 {
        self.statistics().parsing_errors
    }

    pub fn position_history(&self) -> Vec<GpsSnapshot> {
        self.shared.history.positions()
    }

    pub fn stats_history(&self) -> Vec<SystemStats> {
        self.shared.history.stats()
    }

    pub fn latest_stats(&self) -> Option<SystemStats> {
        self.shared.history.latest_stats()
    }

    /// Append a system stats sample. Only the stats sampler calls this.
    pub fn record_stats(&self, stats: SystemStats) {
        self.shared.history.append_stats(stats);
    }

    /// Empty the position history; done by the time this returns
    pub fn clear_position_history(&self) -> usize {
        self.shared.history.clear_positions()
    }

    pub fn logging_active(&self) -> bool {
        self.shared.logging.load(Ordering::Acquire)
    }

    /// Set the logging flag, returning its previous value
    pub fn set_logging(&self, active: bool) -> bool {
        self.shared.logging.swap(active, Ordering::AcqRel)
    }

    /// Ask the read loop to drop its source and reconnect
    pub fn request_restart(&self) -> std::result::Result<(), CommandError> {
        if self.shared.shutdown.is_cancelled() || self.state() == SessionState::Failed {
            return Err(CommandError::InvalidState {
                action: "restart_gps".to_string(),
                reason: format!("GPS session is {}", self.state()),
            });
        }
        self.shared.restart.notify_one();
        Ok(())
    }

    /// Stop the read loop
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }
}
