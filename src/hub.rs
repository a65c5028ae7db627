// src/hub.rs
//! State broadcast hub
//!
//! GPS sentences arrive whenever the receiver sends them. The hub decouples
//! that from delivery: on its own timers it reads the session's current
//! snapshot (and the latest system stats) and hands a copy to every
//! registered [`SnapshotListener`].

use crate::{
    clock::SharedClock,
    gps::{GpsSnapshot, Position},
    session::{SessionHandle, SessionState, SessionStatistics},
    stats::SystemStats,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Payload of a `gps_update` event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsUpdate {
    /// Link is up and the snapshot is fresh
    pub connected: bool,
    pub stale: bool,
    pub state: SessionState,
    pub rtk_fixed: bool,
    pub rtk_float: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub sequence: u64,
    pub position: Position,
    pub statistics: SessionStatistics,
}

impl GpsUpdate {
    pub fn record(&self) -> PositionRecord {
        PositionRecord {
            timestamp: self.timestamp,
            sequence: self.sequence,
            position: self.position.clone(),
            rtk_fixed: self.rtk_fixed,
            rtk_float: self.rtk_float,
        }
    }
}

/// Payload of a `status_update` event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub timestamp: DateTime<Utc>,
    pub session_state: SessionState,
    pub logging_enabled: bool,
    /// Seconds since the service started
    pub uptime: f64,
    pub connected_clients: usize,
    pub system: Option<SystemStats>,
}

/// One timestamped position, as served by the history endpoint and the survey log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub sequence: u64,
    #[serde(flatten)]
    pub position: Position,
    pub rtk_fixed: bool,
    pub rtk_float: bool,
}

impl From<&GpsSnapshot> for PositionRecord {
    fn from(snapshot: &GpsSnapshot) -> Self {
        Self {
            timestamp: snapshot.fix.timestamp,
            sequence: snapshot.sequence,
            position: snapshot.position.clone(),
            rtk_fixed: snapshot.fix.rtk_fixed,
            rtk_float: snapshot.fix.rtk_float,
        }
    }
}

/// Builds event payloads from the session's read side
#[derive(Debug, Clone)]
pub struct StateReader {
    session: SessionHandle,
    clock: SharedClock,
    stale_after: chrono::Duration,
    started_at: DateTime<Utc>,
    clients: Arc<AtomicUsize>,
}

impl StateReader {
    pub fn new(session: SessionHandle, clock: SharedClock, stale_after: Duration) -> Self {
        let started_at = clock.now();
        Self {
            session,
            clock,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            started_at,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Counter the push gateway keeps up to date
    pub fn client_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.clients)
    }

    pub fn gps_update(&self) -> GpsUpdate {
        self.gps_update_from(&self.session.current_snapshot())
    }

    pub fn gps_update_from(&self, snapshot: &GpsSnapshot) -> GpsUpdate {
        let now = self.clock.now();
        let state = self.session.state();
        let stale = snapshot
            .age_at(now)
            .map_or(true, |age| age > self.stale_after);

        GpsUpdate {
            connected: snapshot.fix.connected && state.is_connected() && !stale,
            stale,
            state,
            rtk_fixed: snapshot.fix.rtk_fixed,
            rtk_float: snapshot.fix.rtk_float,
            timestamp: snapshot.fix.timestamp,
            sequence: snapshot.sequence,
            position: snapshot.position.clone(),
            statistics: (*self.session.statistics()).clone(),
        }
    }

    pub fn status_update(&self) -> StatusUpdate {
        let now = self.clock.now();
        StatusUpdate {
            timestamp: now,
            session_state: self.session.state(),
            logging_enabled: self.session.logging_active(),
            uptime: (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0,
            connected_clients: self.clients.load(Ordering::Relaxed),
            system: self.session.latest_stats(),
        }
    }
}

/// A consumer of broadcast state: web push, survey log, display.
///
/// Called from the hub's timer task, so implementations must not block.
pub trait SnapshotListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_gps_update(&self, update: &GpsUpdate);

    fn on_status_update(&self, _status: &StatusUpdate) {}
}

/// Push cadence for the two streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub gps_interval: Duration,
    pub status_interval: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            gps_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(2),
        }
    }
}

pub struct BroadcastHub {
    reader: StateReader,
    settings: HubSettings,
    listeners: RwLock<Vec<Arc<dyn SnapshotListener>>>,
    last_sequence: AtomicU64,
}

impl BroadcastHub {
    pub fn new(reader: StateReader, settings: HubSettings) -> Self {
        Self {
            reader,
            settings,
            listeners: RwLock::new(Vec::new()),
            last_sequence: AtomicU64::new(0),
        }
    }

    pub fn register(&self, listener: Arc<dyn SnapshotListener>) {
        tracing::debug!(listener = listener.name(), "Hub listener registered");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Push the current snapshot to every listener.
    ///
    /// The same snapshot may go out again on the next tick; an older one never
    /// does. Returns `None` when the push was skipped for that reason.
    pub fn publish_gps(&self) -> Option<GpsUpdate> {
        let snapshot = self.reader.session().current_snapshot();
        let previous = self.last_sequence.fetch_max(snapshot.sequence, Ordering::AcqRel);
        if snapshot.sequence < previous {
            tracing::debug!(sequence = snapshot.sequence, previous, "Skipped out-of-order snapshot");
            return None;
        }

        let update = self.reader.gps_update_from(&snapshot);
        for listener in self.listeners() {
            listener.on_gps_update(&update);
        }
        Some(update)
    }

    pub fn publish_status(&self) -> StatusUpdate {
        let status = self.reader.status_update();
        for listener in self.listeners() {
            listener.on_status_update(&status);
        }
        status
    }

    /// Run both push timers until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut gps_ticker = tokio::time::interval(self.settings.gps_interval);
        let mut status_ticker = tokio::time::interval(self.settings.status_interval);
        gps_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        status_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            gps_interval = ?self.settings.gps_interval,
            status_interval = ?self.settings.status_interval,
            listeners = self.listener_count(),
            "Broadcast hub started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = gps_ticker.tick() => {
                    self.publish_gps();
                }
                _ = status_ticker.tick() => {
                    self.publish_status();
                }
            }
        }
        tracing::info!("Broadcast hub stopped");
    }

    fn listeners(&self) -> Vec<Arc<dyn SnapshotListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{ManualClock, SystemClock},
        gps::{nmea::format_sentence, SourceSpec},
        session::{SessionController, SessionSettings},
    };
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        gps: Mutex<Vec<GpsUpdate>>,
        status: Mutex<Vec<StatusUpdate>>,
    }

    impl SnapshotListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_gps_update(&self, update: &GpsUpdate) {
            self.gps.lock().unwrap().push(update.clone());
        }

        fn on_status_update(&self, status: &StatusUpdate) {
            self.status.lock().unwrap().push(status.clone());
        }
    }

    fn gga(quality: u8) -> String {
        format_sentence(&format!(
            "GNGGA,120000.00,4012.0,N,07401.0,W,{},10,0.9,50.0,M,-33.2,M,1.2,0000",
            quality
        ))
    }

    fn setup(clock: SharedClock) -> (SessionController, BroadcastHub) {
        let controller = SessionController::new(
            SourceSpec::script(Vec::<String>::new()),
            SessionSettings::default(),
            50,
            clock.clone(),
        );
        let reader = StateReader::new(controller.handle(), clock, Duration::from_secs(5));
        let hub = BroadcastHub::new(reader, HubSettings::default());
        (controller, hub)
    }

    #[test]
    fn test_deliveries_follow_snapshot_order() {
        let (mut controller, hub) = setup(Arc::new(SystemClock));
        let recorder = Arc::new(Recorder::default());
        hub.register(recorder.clone());

        for quality in [4, 5, 4, 1, 4] {
            controller.ingest_line(gga(quality).as_bytes()).unwrap();
            hub.publish_gps();
        }

        let delivered = recorder.gps.lock().unwrap();
        assert_eq!(delivered.len(), 5);
        let sequences: Vec<u64> = delivered.iter().map(|u| u.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert!(delivered
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn test_same_snapshot_is_repushed() {
        let (mut controller, hub) = setup(Arc::new(SystemClock));
        let recorder = Arc::new(Recorder::default());
        hub.register(recorder.clone());

        controller.ingest_line(gga(4).as_bytes()).unwrap();
        hub.publish_gps();
        hub.publish_gps();

        let delivered = recorder.gps.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].sequence, delivered[1].sequence);
    }

    #[test]
    fn test_stale_snapshot_reports_disconnected() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let (mut controller, hub) = setup(clock.clone());

        controller.ingest_line(gga(4).as_bytes()).unwrap();
        let update = hub.publish_gps().unwrap();
        // The session loop isn't running, so the link state says not streaming
        assert!(!update.stale);
        assert!(!update.connected);

        clock.advance(chrono::Duration::seconds(6));
        let update = hub.publish_gps().unwrap();
        assert!(update.stale);
        assert!(update.rtk_fixed);
    }

    #[test]
    fn test_status_update_contents() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let (controller, hub) = setup(clock.clone());
        let recorder = Arc::new(Recorder::default());
        hub.register(recorder.clone());

        controller.handle().set_logging(true);
        clock.advance(chrono::Duration::seconds(90));
        let status = hub.publish_status();
        assert!(status.logging_enabled);
        assert_eq!(status.uptime, 90.0);
        assert_eq!(status.session_state, SessionState::Disconnected);
        assert_eq!(recorder.status.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_position_record_flattens_position() {
        let snapshot = GpsSnapshot {
            sequence: 7,
            ..GpsSnapshot::default()
        };
        let json = serde_json::to_value(PositionRecord::from(&snapshot)).unwrap();
        assert_eq!(json["sequence"], 7);
        assert!(json["latitude"].is_null());
        assert_eq!(json["valid"], false);
    }
}
