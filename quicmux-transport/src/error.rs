use std::io;

use quinn_proto::{ConnectError, ConnectionError, ReadError, ReadableError, WriteError};

use crate::id::StreamId;

/// Errors returned by quicmux-transport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection not established")]
    NotConnected,

    #[error("unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("stream reset by peer (code {0:#x})")]
    Reset(u64),

    #[error("stream stopped by peer (code {0:#x})")]
    Stopped(u64),

    #[error("stream already closed")]
    ClosedStream,

    #[error("crypto config: {0}")]
    Crypto(String),

    #[error("connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    #[error("write: {0}")]
    Write(WriteError),

    #[error("read: {0}")]
    Read(ReadError),

    #[error("readable: {0}")]
    Readable(#[from] ReadableError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the connection as a whole can no longer carry streams.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::NotConnected | Self::Connection(_)
        )
    }
}

/// QUIC transport error codes (RFC 9000 Section 20.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TransportErrorCode {
    NoError = 0x0,
    InternalError = 0x1,
    ConnectionRefused = 0x2,
    FlowControlError = 0x3,
    StreamLimitError = 0x4,
    StreamStateError = 0x5,
    FinalSizeError = 0x6,
    FrameEncodingError = 0x7,
    TransportParameterError = 0x8,
    ConnectionIdLimitError = 0x9,
    ProtocolViolation = 0xa,
    InvalidToken = 0xb,
    ApplicationError = 0xc,
    CryptoBufferExceeded = 0xd,
    KeyUpdateError = 0xe,
    AeadLimitReached = 0xf,
    NoViablePath = 0x10,
}

impl TransportErrorCode {
    /// Map a raw code; TLS alerts (0x0100-0x01ff) and unknown codes return `None`.
    pub fn from_u64(v: u64) -> Option<Self> {
        Some(match v {
            0x0 => Self::NoError,
            0x1 => Self::InternalError,
            0x2 => Self::ConnectionRefused,
            0x3 => Self::FlowControlError,
            0x4 => Self::StreamLimitError,
            0x5 => Self::StreamStateError,
            0x6 => Self::FinalSizeError,
            0x7 => Self::FrameEncodingError,
            0x8 => Self::TransportParameterError,
            0x9 => Self::ConnectionIdLimitError,
            0xa => Self::ProtocolViolation,
            0xb => Self::InvalidToken,
            0xc => Self::ApplicationError,
            0xd => Self::CryptoBufferExceeded,
            0xe => Self::KeyUpdateError,
            0xf => Self::AeadLimitReached,
            0x10 => Self::NoViablePath,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::StreamLimitError => "STREAM_LIMIT_ERROR",
            Self::StreamStateError => "STREAM_STATE_ERROR",
            Self::FinalSizeError => "FINAL_SIZE_ERROR",
            Self::FrameEncodingError => "FRAME_ENCODING_ERROR",
            Self::TransportParameterError => "TRANSPORT_PARAMETER_ERROR",
            Self::ConnectionIdLimitError => "CONNECTION_ID_LIMIT_ERROR",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::ApplicationError => "APPLICATION_ERROR",
            Self::CryptoBufferExceeded => "CRYPTO_BUFFER_EXCEEDED",
            Self::KeyUpdateError => "KEY_UPDATE_ERROR",
            Self::AeadLimitReached => "AEAD_LIMIT_REACHED",
            Self::NoViablePath => "NO_VIABLE_PATH",
        }
    }
}

/// Render a raw transport code, including the TLS alert range.
pub fn transport_code_name(code: u64) -> String {
    match TransportErrorCode::from_u64(code) {
        Some(known) => known.name().to_string(),
        None if (0x100..=0x1ff).contains(&code) => format!("CRYPTO_ERROR({:#x})", code & 0xff),
        None => format!("TRANSPORT_ERROR({code:#x})"),
    }
}
