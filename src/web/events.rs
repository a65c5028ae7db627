// src/web/events.rs
//! Websocket message envelopes
//!
//! Server to client: `{"event": "gps_update" | "status_update", "data": {...}}`.
//! Client to server: `{"event": "request_update"}`, or the bare word.

use crate::hub::{GpsUpdate, StatusUpdate};
use serde::{Deserialize, Serialize};

/// Event pushed to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    GpsUpdate(GpsUpdate),
    StatusUpdate(StatusUpdate),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::GpsUpdate(_) => "gps_update",
            PushEvent::StatusUpdate(_) => "status_update",
        }
    }

    /// Snapshot sequence carried by a GPS event
    pub fn sequence(&self) -> Option<u64> {
        match self {
            PushEvent::GpsUpdate(update) => Some(update.sequence),
            PushEvent::StatusUpdate(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Message a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    RequestUpdate,
}

pub fn parse_client_message(text: &str) -> Option<ClientEvent> {
    let text = text.trim();
    if text == "request_update" {
        return Some(ClientEvent::RequestUpdate);
    }
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gps::Position,
        session::{SessionState, SessionStatistics},
    };
    use chrono::Utc;

    #[test]
    fn test_gps_event_envelope() {
        let event = PushEvent::GpsUpdate(GpsUpdate {
            connected: true,
            stale: false,
            state: SessionState::Streaming,
            rtk_fixed: true,
            rtk_float: false,
            timestamp: Some(Utc::now()),
            sequence: 3,
            position: Position::default(),
            statistics: SessionStatistics::default(),
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "gps_update");
        assert_eq!(json["data"]["rtk_fixed"], true);
        assert_eq!(json["data"]["state"], "streaming");
        assert_eq!(json["data"]["sequence"], 3);
        assert!(json["data"]["position"]["latitude"].is_null());
        assert_eq!(event.sequence(), Some(3));
    }

    #[test]
    fn test_status_event_envelope() {
        let event = PushEvent::StatusUpdate(StatusUpdate {
            timestamp: Utc::now(),
            session_state: SessionState::Degraded,
            logging_enabled: false,
            uptime: 12.5,
            connected_clients: 2,
            system: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status_update");
        assert_eq!(json["data"]["session_state"], "degraded");
        assert_eq!(json["data"]["connected_clients"], 2);
        assert_eq!(event.name(), "status_update");
    }

    #[test]
    fn test_parse_client_message() {
        assert_eq!(
            parse_client_message(r#"{"event":"request_update"}"#),
            Some(ClientEvent::RequestUpdate)
        );
        assert_eq!(parse_client_message(" request_update\n"), Some(ClientEvent::RequestUpdate));
        assert_eq!(parse_client_message(r#"{"event":"reboot"}"#), None);
        assert_eq!(parse_client_message("hello"), None);
    }
}
