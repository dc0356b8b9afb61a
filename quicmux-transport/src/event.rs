use quinn_proto::ConnectionError;

use crate::id::StreamId;

/// Events produced by a [`Transport`](crate::Transport) for the session layer.
///
/// Poll these via [`Transport::poll_event()`](crate::Transport::poll_event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed; streams may be opened.
    Connected,

    /// The peer opened a new stream.
    StreamOpened { stream: StreamId, bidi: bool },

    /// Data (or a FIN, or a reset) is available to read on a stream.
    StreamReadable { stream: StreamId },

    /// Flow control window opened; the stream is writable again.
    StreamWritable { stream: StreamId },

    /// A send stream has been fully acknowledged by the peer.
    StreamFinished { stream: StreamId },

    /// The peer sent STOP_SENDING on one of our send streams.
    StreamStopped { stream: StreamId, error_code: u64 },

    /// The connection was closed or lost.
    ConnectionClosed(CloseInfo),
}

/// What terminated a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// CONNECTION_CLOSE of type 0x1c carrying a transport error code.
    Transport(u64),
    /// CONNECTION_CLOSE of type 0x1d carrying an application error code.
    Application(u64),
    /// No packets within the negotiated idle timeout.
    IdleTimeout,
    /// The peer sent a stateless reset.
    StatelessReset,
    /// The peer supports none of our versions.
    VersionMismatch,
    /// Closed through the local close primitive.
    LocallyClosed,
}

/// Close information surfaced with [`TransportEvent::ConnectionClosed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: CloseCode,
    pub detail: String,
    /// Whether the peer initiated the close.
    pub remote: bool,
}

impl CloseInfo {
    pub fn new(code: CloseCode, detail: impl Into<String>, remote: bool) -> Self {
        Self {
            code,
            detail: detail.into(),
            remote,
        }
    }
}

impl From<&ConnectionError> for CloseInfo {
    fn from(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::ConnectionClosed(close) => Self::new(
                CloseCode::Transport(u64::from(close.error_code)),
                String::from_utf8_lossy(&close.reason),
                true,
            ),
            ConnectionError::ApplicationClosed(close) => Self::new(
                CloseCode::Application(close.error_code.into_inner()),
                String::from_utf8_lossy(&close.reason),
                true,
            ),
            ConnectionError::TransportError(e) => Self::new(
                CloseCode::Transport(u64::from(e.code)),
                e.reason.clone(),
                false,
            ),
            ConnectionError::Reset => Self::new(CloseCode::StatelessReset, "stateless reset", true),
            ConnectionError::VersionMismatch => {
                Self::new(CloseCode::VersionMismatch, "no mutually supported version", true)
            }
            ConnectionError::TimedOut => {
                Self::new(CloseCode::IdleTimeout, "no recent network activity", false)
            }
            ConnectionError::LocallyClosed => {
                Self::new(CloseCode::LocallyClosed, "closed locally", false)
            }
            ConnectionError::CidsExhausted => Self::new(
                CloseCode::Transport(0x9),
                "connection IDs exhausted",
                false,
            ),
            #[allow(unreachable_patterns)]
            other => Self::new(CloseCode::Transport(0x1), other.to_string(), false),
        }
    }
}
