//! Administrative lifecycle commands.

use std::str::FromStr;

use axum::http::StatusCode;
use serde::Serialize;
use tracing::warn;

use crate::legion::{LegionError, LegionManager, Transition};

/// A lifecycle command addressed to one legion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecreeCommand {
    Mobilize,
    StandDown,
}

impl FromStr for DecreeCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MOBILIZE" => Ok(Self::Mobilize),
            "STAND_DOWN" => Ok(Self::StandDown),
            other => Err(format!(
                "Unknown command {other:?}, expected MOBILIZE or STAND_DOWN"
            )),
        }
    }
}

/// Result of dispatching a decree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecreeOutcome {
    Mobilized,
    AlreadyMobilized,
    StoodDown,
    AlreadyDormant,
    /// The port has no legion; nothing was dispatched.
    Rejected(String),
    /// Dispatch was attempted and failed; the failure was counted against the legion.
    Failed(String),
}

impl DecreeOutcome {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Mobilized | Self::AlreadyMobilized | Self::StoodDown | Self::AlreadyDormant => {
                StatusCode::OK
            }
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Mobilized => "Legion mobilized",
            Self::AlreadyMobilized => "Legion already mobilized",
            Self::StoodDown => "Legion stood down",
            Self::AlreadyDormant => "Legion already dormant",
            Self::Rejected(_) => "Decree rejected",
            Self::Failed(_) => "Operation failed",
        }
    }

    pub fn into_response_body(self) -> DecreeResponse {
        let status = self.status_code().as_u16();
        let decree = self.message();
        let error = match self {
            Self::Rejected(reason) | Self::Failed(reason) => Some(reason),
            _ => None,
        };
        DecreeResponse {
            status,
            decree,
            error,
        }
    }
}

/// Body returned by `POST /admin/decree/{port}`.
#[derive(Debug, Clone, Serialize)]
pub struct DecreeResponse {
    pub status: u16,
    pub decree: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dispatch `command` to the legion on `port`.
pub async fn dispatch(legions: &LegionManager, port: u16, command: DecreeCommand) -> DecreeOutcome {
    let result = match command {
        DecreeCommand::Mobilize => legions.activate(port).await.map(|t| match t {
            Transition::Changed => DecreeOutcome::Mobilized,
            Transition::AlreadyInState => DecreeOutcome::AlreadyMobilized,
        }),
        DecreeCommand::StandDown => legions.deactivate(port).await.map(|t| match t {
            Transition::Changed => DecreeOutcome::StoodDown,
            Transition::AlreadyInState => DecreeOutcome::AlreadyDormant,
        }),
    };

    match result {
        Ok(outcome) => outcome,
        Err(e @ LegionError::Unconfigured(_)) => DecreeOutcome::Rejected(e.to_string()),
        Err(e @ LegionError::Operation { .. }) => {
            warn!(port, ?command, error = %e, "Decree dispatch failed");
            DecreeOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("MOBILIZE".parse(), Ok(DecreeCommand::Mobilize));
        assert_eq!("STAND_DOWN".parse(), Ok(DecreeCommand::StandDown));
        assert!("mobilize".parse::<DecreeCommand>().is_err());
        assert!("DESTROY".parse::<DecreeCommand>().is_err());
    }

    #[test]
    fn test_response_bodies() {
        let ok = DecreeOutcome::Mobilized.into_response_body();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.decree, "Legion mobilized");
        assert!(ok.error.is_none());

        let failed = DecreeOutcome::Failed("bind refused".into()).into_response_body();
        assert_eq!(failed.status, 500);
        assert_eq!(failed.decree, "Operation failed");
        assert_eq!(failed.error.as_deref(), Some("bind refused"));
    }
}
