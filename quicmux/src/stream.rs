//! Application streams: one request/response exchange on one bidirectional
//! QUIC stream.

use bytes::{Bytes, BytesMut};
use quicmux_transport::{StreamId, Transport};

use crate::bridge::StreamResetReason;
use crate::error::Error;
use crate::flow_control::{SendBuffer, Watermark};
use crate::headers::HeaderMap;
use crate::session::ClientSession;

/// Receives the response side of a stream.
pub trait ResponseDecoder {
    fn decode_headers(&mut self, headers: HeaderMap, end_stream: bool);

    /// A 1xx response head. Any number may precede the final headers.
    fn decode_informational(&mut self, _headers: HeaderMap) {}

    fn decode_data(&mut self, data: Bytes, end_stream: bool);

    fn decode_trailers(&mut self, trailers: HeaderMap);
}

/// Observer for stream resets and send-buffer watermarks.
pub trait StreamCallbacks {
    /// Called at most once per stream.
    fn on_reset_stream(&mut self, reason: StreamResetReason, error_code: u64);

    fn on_above_write_buffer_high_watermark(&mut self) {}

    fn on_below_write_buffer_low_watermark(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    Open,
    Closed,
}

/// Position in the response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponsePhase {
    /// No final (non-1xx) response head yet.
    AwaitingHeaders,
    Body,
    Trailers,
}

/// A frame whose payload is consumed as it arrives instead of being
/// buffered whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameBody {
    /// DATA payload bytes still to deliver.
    Data(u64),
    /// Unknown frame payload bytes still to discard.
    Skip(u64),
}

impl FrameBody {
    pub(crate) fn remaining(self) -> u64 {
        match self {
            Self::Data(n) | Self::Skip(n) => n,
        }
    }

    /// State after `n` more payload bytes; `None` once the frame is done.
    pub(crate) fn consume(self, n: u64) -> Option<Self> {
        let left = self.remaining().saturating_sub(n);
        if left == 0 {
            return None;
        }
        Some(match self {
            Self::Data(_) => Self::Data(left),
            Self::Skip(_) => Self::Skip(left),
        })
    }
}

/// Inbound parse state of a request stream.
#[derive(Debug, Default)]
pub(crate) struct RecvState {
    /// Bytes not yet parsed. Holds at most one frame header or one HEADERS
    /// frame within the field section limit, plus the last read.
    pub(crate) buf: BytesMut,
    pub(crate) body: Option<FrameBody>,
}

pub(crate) struct ClientStream {
    pub(crate) id: StreamId,
    pub(crate) write: HalfState,
    pub(crate) read: HalfState,
    pub(crate) headers_sent: bool,
    pub(crate) phase: ResponsePhase,
    pub(crate) send: SendBuffer,
    /// FIN requested while bytes were still buffered.
    pub(crate) fin_pending: bool,
    pub(crate) recv: RecvState,
    decoder: Box<dyn ResponseDecoder>,
    callbacks: Option<Box<dyn StreamCallbacks>>,
}

impl ClientStream {
    pub(crate) fn new(id: StreamId, decoder: Box<dyn ResponseDecoder>, send_limit: usize) -> Self {
        Self {
            id,
            write: HalfState::Open,
            read: HalfState::Open,
            headers_sent: false,
            phase: ResponsePhase::AwaitingHeaders,
            send: SendBuffer::new(send_limit),
            fin_pending: false,
            recv: RecvState::default(),
            decoder,
            callbacks: None,
        }
    }

    pub(crate) fn decode_headers(&mut self, headers: HeaderMap, end_stream: bool) {
        self.decoder.decode_headers(headers, end_stream);
    }

    pub(crate) fn decode_informational(&mut self, headers: HeaderMap) {
        self.decoder.decode_informational(headers);
    }

    pub(crate) fn decode_data(&mut self, data: Bytes, end_stream: bool) {
        self.decoder.decode_data(data, end_stream);
    }

    pub(crate) fn decode_trailers(&mut self, trailers: HeaderMap) {
        self.decoder.decode_trailers(trailers);
    }

    pub(crate) fn set_callbacks(&mut self, callbacks: Box<dyn StreamCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    /// Deliver the reset and drop the observer so nothing follows it.
    pub(crate) fn notify_reset(&mut self, reason: StreamResetReason, error_code: u64) {
        if let Some(mut callbacks) = self.callbacks.take() {
            callbacks.on_reset_stream(reason, error_code);
        }
    }

    pub(crate) fn notify_watermark(&mut self, mark: Watermark) {
        let Some(callbacks) = self.callbacks.as_mut() else {
            return;
        };
        match mark {
            Watermark::High => callbacks.on_above_write_buffer_high_watermark(),
            Watermark::Low => callbacks.on_below_write_buffer_low_watermark(),
        }
    }

    /// Force both halves closed and drop pending output.
    pub(crate) fn close_both(&mut self) {
        self.write = HalfState::Closed;
        self.read = HalfState::Closed;
        self.send.clear();
        self.fin_pending = false;
    }

    pub(crate) fn send_idle(&self) -> bool {
        self.send.is_empty() && !self.fin_pending
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.write == HalfState::Closed && self.read == HalfState::Closed && self.send_idle()
    }
}

/// Handle to one stream of a [`ClientSession`].
///
/// The handle borrows the session, so a stream is addressed again later with
/// [`ClientSession::stream`]. Once the stream has completed or been reset,
/// queries report both halves closed and operations fail with
/// [`Error::InvalidState`].
pub struct StreamRef<'a, T: Transport> {
    session: &'a mut ClientSession<T>,
    id: StreamId,
}

impl<'a, T: Transport> StreamRef<'a, T> {
    pub(crate) fn new(session: &'a mut ClientSession<T>, id: StreamId) -> Self {
        Self { session, id }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Whether the session still tracks this stream.
    pub fn is_active(&self) -> bool {
        self.session.stream_entry(self.id).is_some()
    }

    /// Send the request head. Ends the request when `end_stream` is set.
    pub fn encode_headers(&mut self, headers: HeaderMap, end_stream: bool) -> Result<(), Error> {
        self.session.encode_headers(self.id, headers, end_stream)
    }

    /// Send request body bytes after the head.
    pub fn encode_data(&mut self, data: impl Into<Bytes>, end_stream: bool) -> Result<(), Error> {
        self.session.encode_data(self.id, data.into(), end_stream)
    }

    /// Register the stream observer, replacing any earlier one.
    pub fn add_callbacks(&mut self, callbacks: Box<dyn StreamCallbacks>) {
        self.session.add_stream_callbacks(self.id, callbacks);
    }

    /// Abandon the exchange in both directions.
    pub fn reset(&mut self, error_code: impl Into<u64>) {
        self.session.reset_stream_local(self.id, error_code.into());
    }

    pub fn write_side_closed(&self) -> bool {
        self.session
            .stream_entry(self.id)
            .is_none_or(|s| s.write == HalfState::Closed)
    }

    pub fn reading_stopped(&self) -> bool {
        self.session
            .stream_entry(self.id)
            .is_none_or(|s| s.read == HalfState::Closed)
    }

    /// Bytes accepted from the application but not yet by the transport.
    pub fn buffered_bytes(&self) -> usize {
        self.session
            .stream_entry(self.id)
            .map_or(0, |s| s.send.used())
    }
}
