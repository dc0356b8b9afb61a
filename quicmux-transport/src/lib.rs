//! quicmux-transport: the QUIC engine seam under the quicmux session layer.
//!
//! The session layer drives a connection only through the [`Transport`]
//! trait: open streams, write, read, reset, close, and poll
//! [`TransportEvent`]s. [`QuicClientConnection`] implements it on top of
//! [quinn-proto](https://docs.rs/quinn-proto)'s sans-IO state machine, so the
//! caller owns the socket and the clock.
//!
//! # Example
//!
//! ```rust,ignore
//! use quicmux_transport::{QuicClientConnection, RustlsCryptoFactory, ServerId, Transport};
//!
//! let server = ServerId::new("example.com", 443, false);
//! let mut quic = QuicClientConnection::connect(
//!     TransportConfig::default(), &crypto, server, peer, local, Instant::now())?;
//! quic.flush(Instant::now(), &mut socket)?;
//!
//! // Feed incoming datagrams:
//! quic.handle_datagram(Instant::now(), &data, peer);
//! while let Some(event) = quic.poll_event() {
//!     // hand to the session
//! }
//! quic.flush(Instant::now(), &mut socket)?;
//! ```

pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod event;
pub mod id;
pub mod transport;
pub mod writer;

pub use config::{QuicVersion, ServerId, TransportConfig};
pub use connection::QuicClientConnection;
pub use crypto::{CryptoConfigFactory, RustlsCryptoFactory};
pub use error::{Error, TransportErrorCode, transport_code_name};
pub use event::{CloseCode, CloseInfo, TransportEvent};
pub use id::StreamId;
pub use transport::{ConnectionState, Transport};
pub use writer::{PacketWriter, WriteStatus};
