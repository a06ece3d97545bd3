use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Externally observable connection state. Only confirmed reports from the
/// tunnel subsystem move it; local intent never does.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Off,
    Connecting,
    On,
    Disconnecting,
}

impl TunnelState {
    /// An in-flight transition rejects further switch requests.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, TunnelState::Connecting | TunnelState::Disconnecting)
    }
}

impl Display for TunnelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelState::Off => write!(f, "off"),
            TunnelState::Connecting => write!(f, "connecting"),
            TunnelState::On => write!(f, "on"),
            TunnelState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

#[derive(Error, Debug)]
#[error("Unknown tunnel state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for TunnelState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(TunnelState::Off),
            "connecting" => Ok(TunnelState::Connecting),
            "on" => Ok(TunnelState::On),
            "disconnecting" => Ok(TunnelState::Disconnecting),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

/// Request sent over the control socket, one JSON object per line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Toggle the tunnel; ignored while a transition is in flight.
    Switch,
    /// Query the current connection state.
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok { state: TunnelState, acted: bool },
    Error { message: String },
}

#[test]
fn test_control_schema() {
    let req: ControlRequest = serde_json::from_str("{\"cmd\":\"switch\"}").unwrap();
    assert_eq!(req, ControlRequest::Switch);
    let resp = ControlResponse::Ok {
        state: TunnelState::Connecting,
        acted: true,
    };
    let s = serde_json::to_string(&resp).unwrap();
    assert!(s.contains("\"state\":\"connecting\""));
    assert_eq!("on".parse::<TunnelState>().unwrap(), TunnelState::On);
    assert!("bogus".parse::<TunnelState>().is_err());
}
