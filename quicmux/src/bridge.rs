//! Translation of transport-level connection signals into observer payloads.
//!
//! Nothing here holds state: the session calls these helpers to turn a
//! [`CloseInfo`] into a [`CloseRecord`], a close direction into a
//! [`ConnectionEvent`], GOAWAY signals into a [`GoAwayErrorCode`], and
//! stream reset codes into a [`StreamResetReason`].

use std::collections::HashMap;
use std::fmt;

use quicmux_transport::{CloseCode, CloseInfo, transport_code_name};

use crate::error::{H3ErrorCode, application_code_name};

/// Connection-level events delivered to [`ConnectionCallbacks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    RemoteClose,
    LocalClose,
    Connected,
}

/// Error code carried by a GOAWAY notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoAwayErrorCode {
    NoError,
    Other,
}

/// Why a stream's reset callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamResetReason {
    /// The peer reset the stream or asked us to stop sending.
    RemoteReset,
    /// The application or the session reset the stream.
    LocalReset,
    /// The connection closed under the stream.
    ConnectionTermination,
    /// The peer violated the protocol on this stream.
    ProtocolError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDirection {
    Local,
    Remote,
}

/// Observer of connection-level events.
pub trait ConnectionCallbacks {
    fn on_event(&mut self, event: ConnectionEvent);

    fn on_go_away(&mut self, _code: GoAwayErrorCode) {}
}

/// The terminal reason of a connection, fixed by the first close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRecord {
    pub code: CloseCode,
    pub detail: String,
    pub direction: CloseDirection,
}

impl CloseRecord {
    pub fn new(code: CloseCode, detail: impl Into<String>, direction: CloseDirection) -> Self {
        Self {
            code,
            detail: detail.into(),
            direction,
        }
    }

    pub fn from_info(info: &CloseInfo) -> Self {
        let direction = if info.remote {
            CloseDirection::Remote
        } else {
            CloseDirection::Local
        };
        Self::new(info.code, info.detail.clone(), direction)
    }

    /// RFC name of the close code.
    pub fn code_name(&self) -> String {
        match self.code {
            CloseCode::Transport(code) => transport_code_name(code),
            CloseCode::Application(code) => application_code_name(code),
            CloseCode::IdleTimeout => "IDLE_TIMEOUT".to_string(),
            CloseCode::StatelessReset => "STATELESS_RESET".to_string(),
            CloseCode::VersionMismatch => "VERSION_MISMATCH".to_string(),
            CloseCode::LocallyClosed => "LOCALLY_CLOSED".to_string(),
        }
    }

    /// Numeric code reported to streams torn down by this close.
    pub fn raw_code(&self) -> u64 {
        match self.code {
            CloseCode::Transport(code) | CloseCode::Application(code) => code,
            _ => 0,
        }
    }

    pub fn event(&self) -> ConnectionEvent {
        connection_event(self.direction)
    }
}

impl fmt::Display for CloseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with details: {}", self.code_name(), self.detail)
    }
}

pub fn connection_event(direction: CloseDirection) -> ConnectionEvent {
    match direction {
        CloseDirection::Local => ConnectionEvent::LocalClose,
        CloseDirection::Remote => ConnectionEvent::RemoteClose,
    }
}

/// Error code of a legacy per-connection GOAWAY.
pub fn legacy_go_away_code(error_code: u64) -> GoAwayErrorCode {
    if error_code == 0 {
        GoAwayErrorCode::NoError
    } else {
        GoAwayErrorCode::Other
    }
}

/// Maps peer stream reset codes to reset reasons.
///
/// Codes without an entry map to the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPolicy {
    table: HashMap<u64, StreamResetReason>,
    fallback: StreamResetReason,
}

impl ResetPolicy {
    /// A policy that maps every code to `fallback`.
    pub fn new(fallback: StreamResetReason) -> Self {
        Self {
            table: HashMap::new(),
            fallback,
        }
    }

    /// The HTTP/3 table: protocol errors are `ProtocolError`, everything else
    /// is `RemoteReset`. A stream reset never implies the connection ended,
    /// so no code maps to `ConnectionTermination`.
    pub fn http3() -> Self {
        use H3ErrorCode::*;
        let mut policy = Self::new(StreamResetReason::RemoteReset);
        for code in [
            GeneralProtocolError,
            FrameUnexpected,
            FrameError,
            IdError,
            MessageError,
            QpackDecompressionFailed,
        ] {
            policy.set(code.code(), StreamResetReason::ProtocolError);
        }
        policy
    }

    pub fn set(&mut self, code: u64, reason: StreamResetReason) -> &mut Self {
        self.table.insert(code, reason);
        self
    }

    pub fn classify(&self, code: u64) -> StreamResetReason {
        self.table.get(&code).copied().unwrap_or(self.fallback)
    }
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self::http3()
    }
}
