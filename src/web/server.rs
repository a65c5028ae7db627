// src/web/server.rs
//! HTTP and websocket endpoints
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /ws` | websocket push stream |
//! | `POST /control/:action` | operator commands |
//! | `GET /position-history` | logged positions, oldest first |
//! | `GET /system-stats` | system stats history, oldest first |
//! | `GET /status` | current status payload |
//! | `GET /gps` | current GPS payload |

use super::{
    events::{parse_client_message, ClientEvent},
    gateway::{ClientId, PushGateway},
};
use crate::{
    control::{ControlResponse, ControlRouter},
    error::{Result, SurveyorError},
    hub::{GpsUpdate, PositionRecord, StateReader, StatusUpdate},
    stats::SystemStats,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<PushGateway>,
    pub control: Arc<ControlRouter>,
    pub reader: StateReader,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket))
        .route("/control/:action", post(control))
        .route("/position-history", get(position_history))
        .route("/system-stats", get(system_stats))
        .route("/status", get(status))
        .route("/gps", get(gps))
        .with_state(state)
}

/// Claim the dashboard address. Done before anything else starts so a port
/// conflict stops the service up front.
pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| SurveyorError::Config(format!("Cannot bind {}: {}", address, e)))?;
    tracing::info!(address, "HTTP server listening");
    Ok(listener)
}

/// Serve until the shutdown token fires
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

pub async fn control(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> (StatusCode, Json<ControlResponse>) {
    let response = state.control.apply_action(&action);
    let code = if response.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (code, Json(response))
}

pub async fn position_history(State(state): State<AppState>) -> Json<Vec<PositionRecord>> {
    let history = state.reader.session().position_history();
    Json(history.iter().map(PositionRecord::from).collect())
}

pub async fn system_stats(State(state): State<AppState>) -> Json<Vec<SystemStats>> {
    Json(state.reader.session().stats_history())
}

pub async fn status(State(state): State<AppState>) -> Json<StatusUpdate> {
    Json(state.reader.status_update())
}

pub async fn gps(State(state): State<AppState>) -> Json<GpsUpdate> {
    Json(state.reader.gps_update())
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state.gateway))
}

/// Pump queued events out and `request_update`s in until either side goes away
async fn client_session(mut socket: WebSocket, gateway: Arc<PushGateway>) {
    let (id, mut events) = gateway.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                // None: the gateway dropped this client
                let Some(event) = event else { break };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::error!(client = id, %error, "Failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_text(&gateway, id, &text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    gateway.unsubscribe(id);
}

fn handle_client_text(gateway: &PushGateway, id: ClientId, text: &str) {
    match parse_client_message(text) {
        Some(ClientEvent::RequestUpdate) => {
            if let Err(error) = gateway.send_current(id) {
                tracing::debug!(client = id, %error, "request_update not delivered");
            }
        }
        None => tracing::debug!(client = id, message = text, "Ignored client message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        control::CommandStatus,
        gps::{nmea::format_sentence, SourceSpec},
        session::{SessionController, SessionSettings},
    };
    use std::time::Duration;

    fn setup() -> (SessionController, AppState) {
        let controller = SessionController::new(
            SourceSpec::script(Vec::<String>::new()),
            SessionSettings::default(),
            50,
            Arc::new(SystemClock),
        );
        let reader = StateReader::new(controller.handle(), Arc::new(SystemClock), Duration::from_secs(5));
        let state = AppState {
            gateway: Arc::new(PushGateway::new(reader.clone())),
            control: Arc::new(ControlRouter::new(controller.handle())),
            reader,
        };
        (controller, state)
    }

    #[tokio::test]
    async fn test_control_endpoint_status_codes() {
        let (_controller, state) = setup();

        let (code, Json(body)) = control(State(state.clone()), Path("start_logging".to_string())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, CommandStatus::Success);

        let (code, Json(body)) = control(State(state), Path("launch".to_string())).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Unknown action: launch");
    }

    #[tokio::test]
    async fn test_position_history_after_clear() {
        let (mut controller, state) = setup();
        controller.handle().set_logging(true);
        for second in 0..30 {
            let line = format_sentence(&format!(
                "GNGGA,1200{:02}.00,4012.0,N,07401.0,W,4,10,0.9,50.0,M,-33.2,M,1.2,0000",
                second
            ));
            controller.ingest_line(line.as_bytes()).unwrap();
        }

        let Json(history) = position_history(State(state.clone())).await;
        assert_eq!(history.len(), 30);
        assert!(history.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));

        control(State(state.clone()), Path("clear_position_history".to_string())).await;
        let Json(history) = position_history(State(state)).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let result = bind(&taken).await;
        assert!(matches!(result, Err(SurveyorError::Config(message)) if message.contains(&taken)));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (_controller, state) = setup();
        let listener = bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state, shutdown.clone()));

        shutdown.cancel();
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_current_state_endpoints() {
        let (_controller, state) = setup();
        let Json(gps) = gps(State(state.clone())).await;
        assert_eq!(gps.sequence, 0);
        assert!(!gps.connected);

        let Json(stats) = system_stats(State(state.clone())).await;
        assert!(stats.is_empty());

        let Json(status) = status(State(state)).await;
        assert!(!status.logging_enabled);
    }
}
