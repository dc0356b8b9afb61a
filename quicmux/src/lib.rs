//! Client-side HTTP/3 session and stream multiplexing.
//!
//! This crate sits on top of a [`quicmux_transport::Transport`] and manages
//! the HTTP/3 side of one client connection:
//!
//! - Request streams: opening, request encoding, response decoding
//! - Send buffering with high/low watermark callbacks
//! - Control streams (SETTINGS, GOAWAY) and stream-level error mapping
//! - Connection close bookkeeping and teardown of every live stream
//! - QPACK header compression (static table only)
//!
//! # Architecture
//!
//! ```text
//!   UDP datagrams
//!        │
//!   ┌────▼──────────────────┐
//!   │ quicmux-transport     │  QUIC (quinn-proto wrapper)
//!   │ QuicClientConnection  │  TransportEvent: StreamReadable, ...
//!   └────┬──────────────────┘
//!        │ poll_event() / stream_recv() / stream_send()
//!   ┌────▼──────────────────┐
//!   │ HttpClientConnection  │  frames, control streams
//!   │   ClientSession       │  stream registry, close, GOAWAY
//!   │     StreamRef         │  ResponseDecoder / StreamCallbacks
//!   └───────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quicmux::{ClientSession, HeaderMap, HttpClientConnection, SessionConfig};
//!
//! let session = ClientSession::new(quic, SessionConfig::new(server_id));
//! let mut conn = HttpClientConnection::new(session);
//!
//! // After each transport I/O step:
//! conn.poll()?;
//!
//! let mut stream = conn.new_stream(Box::new(MyDecoder::default()))?;
//! let headers: HeaderMap = [
//!     (":method", "GET"),
//!     (":authority", "example.com"),
//!     (":path", "/"),
//! ]
//! .into_iter()
//! .collect();
//! stream.encode_headers(headers, true)?;
//! ```

pub mod bridge;
pub mod config;
pub mod connection;
mod control;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod headers;
mod huffman;
pub mod metrics;
pub mod qpack;
pub mod session;
pub mod settings;
pub mod stream;

pub use bridge::{
    CloseDirection, CloseRecord, ConnectionCallbacks, ConnectionEvent, GoAwayErrorCode,
    ResetPolicy, StreamResetReason,
};
pub use config::SessionConfig;
pub use connection::{HttpClientConnection, Protocol};
pub use control::UniStreamKind;
pub use error::{Error, H3ErrorCode};
pub use frame::Frame;
pub use headers::HeaderMap;
pub use qpack::{HeaderCodec, HeaderField, StaticTableCodec};
pub use session::{ClientSession, CloseType, SessionState, SessionStats};
pub use settings::Settings;
pub use stream::{HalfState, ResponseDecoder, StreamCallbacks, StreamRef};

pub use quicmux_transport::{CloseCode, CloseInfo, QuicVersion, ServerId, StreamId};
