//! The primitives a session consumes from a QUIC engine.

use crate::error::Error;
use crate::event::TransportEvent;
use crate::id::StreamId;

/// Handshake/lifecycle state of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress; streams may be opened and written (0-RTT/1-RTT
    /// data is queued) but nothing is confirmed.
    Handshaking,
    /// Handshake complete.
    Established,
    /// Closed, draining, or lost.
    Closed,
}

/// A QUIC connection as seen by the session layer.
///
/// Implementations are single-threaded and sans-IO: every call returns
/// immediately, and completion or failure surfaces later through
/// [`poll_event`](Self::poll_event).
pub trait Transport {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Open the next locally initiated bidirectional stream.
    ///
    /// Returns `None` if the peer's concurrent stream limit has been reached.
    fn open_bidi(&mut self) -> Result<Option<StreamId>, Error>;

    /// Open the next locally initiated unidirectional stream.
    ///
    /// Returns `None` if the peer's concurrent stream limit has been reached.
    fn open_uni(&mut self) -> Result<Option<StreamId>, Error>;

    /// Write to a stream. Returns the number of bytes accepted, which may be
    /// less than `data.len()` (or zero) due to flow control.
    fn stream_send(&mut self, stream: StreamId, data: &[u8]) -> Result<usize, Error>;

    /// Read from a stream into `buf`. Returns `(bytes_read, finished)`.
    ///
    /// A stream the peer reset yields [`Error::Reset`] with its error code.
    fn stream_recv(&mut self, stream: StreamId, buf: &mut [u8]) -> Result<(usize, bool), Error>;

    /// Send FIN on a stream.
    fn stream_finish(&mut self, stream: StreamId) -> Result<(), Error>;

    /// Abandon the send side of a stream with RESET_STREAM.
    fn reset_stream(&mut self, stream: StreamId, error_code: u64) -> Result<(), Error>;

    /// Ask the peer to stop sending on a stream with STOP_SENDING.
    fn stop_sending(&mut self, stream: StreamId, error_code: u64) -> Result<(), Error>;

    /// Close the connection with an application error code and reason.
    fn close(&mut self, error_code: u64, reason: &[u8]);

    /// Poll the next transport event.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
