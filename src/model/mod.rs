use serde::Serialize;
use std::fmt;
use std::io;
use std::time::Duration;

use crate::protocol::ButtonCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub unique_id: String,
    pub label: String,
    pub model_name: String,
    pub model_description: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    NotPossible,
    Timeout,
    Refused,
    Reset,
    Ended,
    Closed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotPossible => "BOX_CONNECTION_NOT_POSSIBLE",
            Self::Timeout => "BOX_CONNECTION_TIMEOUT",
            Self::Refused => "BOX_CONNECTION_REFUSED",
            Self::Reset => "BOX_CONNECTION_RESET",
            Self::Ended => "BOX_CONNECTION_ENDED",
            Self::Closed => "BOX_CONNECTION_CLOSED",
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => Self::Reset,
            io::ErrorKind::UnexpectedEof => Self::Ended,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Disconnected {
        reason: DisconnectReason,
        retry_in: Duration,
    },
    CommandSent {
        code: ButtonCode,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub reachable: bool,
}
