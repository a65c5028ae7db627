// src/control.rs
//! Operator commands
//!
//! Maps the four control actions onto the session. Every command answers with
//! a `{status, message}` body; nothing here waits on the read loop.

use crate::{error::CommandError, session::SessionHandle};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    StartLogging,
    StopLogging,
    RestartGps,
    ClearPositionHistory,
}

impl ControlCommand {
    pub fn action(self) -> &'static str {
        match self {
            ControlCommand::StartLogging => "start_logging",
            ControlCommand::StopLogging => "stop_logging",
            ControlCommand::RestartGps => "restart_gps",
            ControlCommand::ClearPositionHistory => "clear_position_history",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

impl FromStr for ControlCommand {
    type Err = CommandError;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action {
            "start_logging" => Ok(ControlCommand::StartLogging),
            "stop_logging" => Ok(ControlCommand::StopLogging),
            "restart_gps" => Ok(ControlCommand::RestartGps),
            "clear_position_history" => Ok(ControlCommand::ClearPositionHistory),
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Body returned for every control request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: CommandStatus,
    pub message: String,
}

impl ControlResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

impl From<Result<String, CommandError>> for ControlResponse {
    fn from(result: Result<String, CommandError>) -> Self {
        match result {
            Ok(message) => ControlResponse::success(message),
            Err(error) => ControlResponse::error(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlRouter {
    session: SessionHandle,
}

impl ControlRouter {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Parse and apply an action name from the wire
    pub fn apply_action(&self, action: &str) -> ControlResponse {
        let result = action
            .parse::<ControlCommand>()
            .and_then(|command| self.execute(command));
        if let Err(error) = &result {
            tracing::warn!(action, %error, "Control command rejected");
        }
        result.into()
    }

    pub fn apply(&self, command: ControlCommand) -> ControlResponse {
        self.execute(command).into()
    }

    fn execute(&self, command: ControlCommand) -> Result<String, CommandError> {
        let message = match command {
            ControlCommand::StartLogging => {
                let was_active = self.session.set_logging(true);
                if was_active {
                    "Logging already active"
                } else {
                    tracing::info!("Position logging started");
                    "Logging started"
                }
            }
            ControlCommand::StopLogging => {
                let was_active = self.session.set_logging(false);
                if was_active {
                    tracing::info!("Position logging stopped");
                    "Logging stopped"
                } else {
                    "Logging already stopped"
                }
            }
            ControlCommand::RestartGps => {
                self.session.request_restart()?;
                "GPS restart initiated"
            }
            ControlCommand::ClearPositionHistory => {
                let removed = self.session.clear_position_history();
                tracing::info!(removed, "Position history cleared");
                "Position history cleared"
            }
        };
        Ok(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        gps::{nmea::format_sentence, SourceSpec},
        session::{SessionController, SessionSettings},
    };
    use std::sync::Arc;

    fn controller() -> SessionController {
        SessionController::new(
            SourceSpec::script(Vec::<String>::new()),
            SessionSettings::default(),
            50,
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("start_logging".parse::<ControlCommand>(), Ok(ControlCommand::StartLogging));
        assert_eq!(
            "clear_position_history".parse::<ControlCommand>(),
            Ok(ControlCommand::ClearPositionHistory)
        );
        assert_eq!(
            "reboot".parse::<ControlCommand>(),
            Err(CommandError::UnknownAction("reboot".to_string()))
        );
    }

    #[test]
    fn test_start_logging_is_idempotent() {
        let controller = controller();
        let router = ControlRouter::new(controller.handle());

        assert!(router.apply(ControlCommand::StartLogging).is_success());
        assert!(router.apply(ControlCommand::StartLogging).is_success());
        assert!(controller.handle().logging_active());

        assert!(router.apply(ControlCommand::StopLogging).is_success());
        assert!(router.apply(ControlCommand::StopLogging).is_success());
        assert!(!controller.handle().logging_active());
    }

    #[test]
    fn test_unknown_action_is_an_error_response() {
        let router = ControlRouter::new(controller().handle());
        let response = router.apply_action("self_destruct");
        assert_eq!(response.status, CommandStatus::Error);
        assert_eq!(response.message, "Unknown action: self_destruct");
    }

    #[test]
    fn test_clear_history_is_visible_immediately() {
        let mut controller = controller();
        let handle = controller.handle();
        handle.set_logging(true);
        for second in 0..30 {
            let line = format_sentence(&format!(
                "GNGGA,1200{:02}.00,4012.0,N,07401.0,W,4,10,0.9,50.0,M,-33.2,M,1.2,0000",
                second
            ));
            controller.ingest_line(line.as_bytes()).unwrap();
        }
        assert_eq!(handle.position_history().len(), 30);

        let router = ControlRouter::new(handle.clone());
        assert!(router.apply_action("clear_position_history").is_success());
        assert!(handle.position_history().is_empty());
    }

    #[test]
    fn test_restart_after_shutdown_is_rejected() {
        let controller = controller();
        let router = ControlRouter::new(controller.handle());
        assert!(router.apply(ControlCommand::RestartGps).is_success());

        controller.handle().shutdown();
        let response = router.apply(ControlCommand::RestartGps);
        assert_eq!(response.status, CommandStatus::Error);
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_value(ControlResponse::success("Logging started")).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["message"], "Logging started");
    }
}
