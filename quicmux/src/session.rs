//! Client session: stream registry, lifecycle, and connection teardown.
//!
//! `ClientSession` owns a [`Transport`] and every request stream opened on
//! it. It is driven from two directions: the application opens streams and
//! writes requests through [`StreamRef`], and the connection facade feeds it
//! decoded peer input (header blocks, body bytes, resets, GOAWAY, closes).
//! All callbacks run synchronously on the caller's thread.

use std::collections::BTreeMap;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use quicmux_transport::{
    CloseCode, CloseInfo, Error as TransportError, QuicVersion, ServerId, StreamId, Transport,
};
use tracing::{debug, trace, warn};

use crate::bridge::{
    CloseDirection, CloseRecord, ConnectionCallbacks, ConnectionEvent, GoAwayErrorCode,
    StreamResetReason, legacy_go_away_code,
};
use crate::config::SessionConfig;
use crate::error::{Error, H3ErrorCode, application_code_name};
use crate::frame::Frame;
use crate::headers::HeaderMap;
use crate::metrics;
use crate::qpack::{HeaderCodec, HeaderField, StaticTableCodec};
use crate::settings::Settings;
use crate::stream::{
    ClientStream, HalfState, RecvState, ResponseDecoder, ResponsePhase, StreamCallbacks, StreamRef,
};

const CLOSE_REASON: &str = "closed by application";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// A graceful local close is waiting for buffered writes to drain.
    LocalClosing,
    /// The peer sent GOAWAY; streams below its id may still be opened.
    RemoteClosing,
    Closed,
}

/// How [`ClientSession::close_with`] treats buffered request bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseType {
    /// Close now, dropping anything still buffered.
    NoFlush,
    /// Stop opening streams and close once every send buffer has drained.
    FlushWrite,
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub streams_opened: u64,
    pub streams_reset: u64,
    /// HEADERS frame bytes handed to the transport path.
    pub header_bytes_sent: u64,
    /// DATA frame bytes handed to the transport path.
    pub body_bytes_sent: u64,
    pub header_bytes_received: u64,
    pub body_bytes_received: u64,
}

/// An HTTP/3 client session over one QUIC connection.
pub struct ClientSession<T> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    /// Keyed by stream id, so iteration follows creation order.
    streams: BTreeMap<StreamId, ClientStream>,
    next_stream_id: u64,
    /// Lowest GOAWAY id received. Streams at or above it are refused.
    go_away_id: Option<u64>,
    close: Option<CloseRecord>,
    observers: Vec<Box<dyn ConnectionCallbacks>>,
    codec: Box<dyn HeaderCodec>,
    peer_settings: Option<Settings>,
    stats: SessionStats,
    start_time: Instant,
}

impl<T: Transport> ClientSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        debug!(
            server = %config.server_id,
            version = %config.version(),
            "client session created"
        );
        Self {
            transport,
            config,
            state: SessionState::Open,
            streams: BTreeMap::new(),
            next_stream_id: 0,
            go_away_id: None,
            close: None,
            observers: Vec::new(),
            codec: Box::new(StaticTableCodec),
            peer_settings: None,
            stats: SessionStats::default(),
            start_time: Instant::now(),
        }
    }

    /// Replace the header codec.
    pub fn with_codec(mut self, codec: Box<dyn HeaderCodec>) -> Self {
        self.codec = codec;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// `"<CODE_NAME> with details: <detail>"` of the first close, if any.
    pub fn transport_failure_reason(&self) -> Option<String> {
        self.close.as_ref().map(ToString::to_string)
    }

    pub fn close_record(&self) -> Option<&CloseRecord> {
        self.close.as_ref()
    }

    pub fn version(&self) -> QuicVersion {
        self.config.version()
    }

    pub fn server_id(&self) -> &ServerId {
        &self.config.server_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn peer_settings(&self) -> Option<&Settings> {
        self.peer_settings.as_ref()
    }

    /// GOAWAY id currently in force.
    pub fn go_away_id(&self) -> Option<u64> {
        self.go_away_id
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Registered stream ids in creation order.
    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.keys().copied()
    }

    /// Handle to a stream by id. The handle reports a finished stream as
    /// inactive rather than failing here.
    pub fn stream(&mut self, id: StreamId) -> StreamRef<'_, T> {
        StreamRef::new(self, id)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn add_connection_callbacks(&mut self, callbacks: Box<dyn ConnectionCallbacks>) {
        self.observers.push(callbacks);
    }

    // ── Application operations ──────────────────────────────────────

    /// Open a request stream. Response events go to `decoder`.
    pub fn open_stream(
        &mut self,
        decoder: Box<dyn ResponseDecoder>,
    ) -> Result<StreamRef<'_, T>, Error> {
        match self.state {
            SessionState::Open => {}
            SessionState::RemoteClosing => {
                if let Some(limit) = self.go_away_id
                    && self.next_stream_id >= limit
                {
                    return Err(Error::InvalidState("stream id beyond peer GOAWAY"));
                }
            }
            SessionState::LocalClosing | SessionState::Closed => {
                return Err(Error::InvalidState("session is closing"));
            }
        }

        let id = match self.transport.open_bidi() {
            Ok(Some(id)) => id,
            Ok(None) => return Err(Error::ResourceExhausted("peer stream limit reached")),
            Err(e) => return Err(self.transport_failed(e)),
        };
        if !id.is_client_initiated() || !id.is_bidi() || id.raw() < self.next_stream_id {
            warn!(stream_id = %id, expected = self.next_stream_id, "unexpected stream id from transport");
            let _ = self
                .transport
                .reset_stream(id, H3ErrorCode::InternalError.code());
            return Err(Error::InvalidState("transport allocated an out-of-order stream id"));
        }
        self.next_stream_id = id.raw() + 4;

        let stream = ClientStream::new(id, decoder, self.config.send_buffer_limit);
        self.streams.insert(id, stream);
        self.stats.streams_opened += 1;
        metrics::STREAMS_OPENED.increment();
        metrics::STREAMS_ACTIVE.increment();
        debug!(server = %self.config.server_id, stream_id = %id, "stream opened");
        Ok(StreamRef::new(self, id))
    }

    /// Close the connection now with `H3_NO_ERROR`.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transport
            .close(H3ErrorCode::NoError.code(), CLOSE_REASON.as_bytes());
        self.teardown(CloseRecord::new(
            CloseCode::Application(H3ErrorCode::NoError.code()),
            CLOSE_REASON,
            CloseDirection::Local,
        ));
    }

    pub fn close_with(&mut self, close_type: CloseType) {
        match close_type {
            CloseType::NoFlush => self.close(),
            CloseType::FlushWrite => match self.state {
                SessionState::Closed | SessionState::LocalClosing => {}
                _ if self.all_sends_idle() => self.close(),
                _ => {
                    debug!(server = %self.config.server_id, "close deferred until writes drain");
                    self.state = SessionState::LocalClosing;
                }
            },
        }
    }

    // ── Peer input ──────────────────────────────────────────────────

    /// A complete response field section arrived on `id`.
    ///
    /// `byte_count` is the encoded size of the block. The local field
    /// section limit applies to the larger of it and the decoded size
    /// (name + value + 32 per field).
    pub fn on_header_block_complete(
        &mut self,
        id: StreamId,
        fields: Vec<HeaderField>,
        fin: bool,
        byte_count: usize,
    ) -> Result<(), Error> {
        let Some(stream) = self.streams.get(&id) else {
            trace!(stream_id = %id, "header block for unknown stream dropped");
            return Ok(());
        };
        if stream.read == HalfState::Closed {
            trace!(stream_id = %id, "header block after end of stream dropped");
            return Ok(());
        }
        let phase = stream.phase;

        self.stats.header_bytes_received += byte_count as u64;
        metrics::BYTES_RECEIVED.add(byte_count as u64);
        let size = fields
            .iter()
            .map(HeaderField::size)
            .sum::<usize>()
            .max(byte_count);
        if size > self.config.max_field_section_size {
            warn!(
                stream_id = %id,
                size,
                limit = self.config.max_field_section_size,
                "response headers too large"
            );
            self.reset_stream_local(id, H3ErrorCode::ExcessiveLoad.code());
            return Ok(());
        }

        let headers = match HeaderMap::from_decoded(fields) {
            Ok(headers) => headers,
            Err(detail) => return Err(self.protocol_violation(H3ErrorCode::MessageError, detail)),
        };

        match phase {
            ResponsePhase::AwaitingHeaders => {
                let status = match headers.response_status() {
                    Ok(status) => status,
                    Err(detail) => {
                        return Err(self.protocol_violation(H3ErrorCode::MessageError, detail));
                    }
                };
                if (100..200).contains(&status) {
                    if status == 101 {
                        return Err(self.protocol_violation(
                            H3ErrorCode::MessageError,
                            "101 response in HTTP/3",
                        ));
                    }
                    if fin {
                        return Err(self.protocol_violation(
                            H3ErrorCode::MessageError,
                            "stream ended after informational response",
                        ));
                    }
                    trace!(stream_id = %id, status, "informational response");
                    if let Some(stream) = self.streams.get_mut(&id) {
                        stream.decode_informational(headers);
                    }
                    return Ok(());
                }
                trace!(stream_id = %id, status, fin, "response headers");
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.phase = ResponsePhase::Body;
                    stream.decode_headers(headers, fin);
                }
            }
            ResponsePhase::Body => {
                if let Err(detail) = headers.check_trailers() {
                    return Err(self.protocol_violation(H3ErrorCode::MessageError, detail));
                }
                trace!(stream_id = %id, "response trailers");
                if let Some(stream) = self.streams.get_mut(&id) {
                    stream.phase = ResponsePhase::Trailers;
                    stream.decode_trailers(headers);
                }
            }
            ResponsePhase::Trailers => {
                return Err(
                    self.protocol_violation(H3ErrorCode::FrameUnexpected, "HEADERS after trailers")
                );
            }
        }

        if fin {
            self.finish_read(id);
        }
        Ok(())
    }

    /// Response body bytes (one DATA payload) arrived on `id`.
    pub fn on_data(&mut self, id: StreamId, data: Bytes, fin: bool) -> Result<(), Error> {
        let Some(stream) = self.streams.get_mut(&id) else {
            trace!(stream_id = %id, "data for unknown stream dropped");
            return Ok(());
        };
        if stream.read == HalfState::Closed {
            return Ok(());
        }
        match stream.phase {
            ResponsePhase::Body => {
                let len = data.len() as u64;
                stream.decode_data(data, fin);
                self.stats.body_bytes_received += len;
                metrics::BYTES_RECEIVED.add(len);
            }
            ResponsePhase::AwaitingHeaders => {
                return Err(self.protocol_violation(
                    H3ErrorCode::FrameUnexpected,
                    "DATA before response headers",
                ));
            }
            ResponsePhase::Trailers if !data.is_empty() => {
                return Err(
                    self.protocol_violation(H3ErrorCode::FrameUnexpected, "DATA after trailers")
                );
            }
            ResponsePhase::Trailers => {}
        }
        if fin {
            self.finish_read(id);
        }
        Ok(())
    }

    /// The peer reset `id` or asked us to stop sending on it.
    pub fn on_stream_reset(&mut self, id: StreamId, error_code: u64) {
        let Some(mut stream) = self.remove_stream(id) else {
            trace!(stream_id = %id, "reset for unknown stream ignored");
            return;
        };
        let reason = self.config.reset_policy.classify(error_code);
        debug!(
            stream_id = %id,
            code = %application_code_name(error_code),
            ?reason,
            "stream reset by peer"
        );
        self.abandon_on_transport(&stream, H3ErrorCode::RequestCancelled.code());
        self.finish_reset(&mut stream, reason, error_code);
    }

    /// The peer sent GOAWAY on the control stream.
    pub fn on_go_away(&mut self, last_stream_id: u64) -> Result<(), Error> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let id = StreamId::from_raw(last_stream_id);
        if !id.is_client_initiated() || !id.is_bidi() {
            return Err(self.protocol_violation(
                H3ErrorCode::IdError,
                format!("GOAWAY id {last_stream_id} is not a client request stream"),
            ));
        }
        if let Some(previous) = self.go_away_id
            && last_stream_id > previous
        {
            return Err(self.protocol_violation(
                H3ErrorCode::IdError,
                format!("GOAWAY id increased from {previous} to {last_stream_id}"),
            ));
        }
        self.apply_go_away(last_stream_id, GoAwayErrorCode::NoError);
        Ok(())
    }

    /// A per-connection GOAWAY carrying an error code, as older transports
    /// deliver it.
    pub fn on_legacy_go_away(&mut self, error_code: u64, last_stream_id: u64) {
        if self.state == SessionState::Closed {
            return;
        }
        self.apply_go_away(last_stream_id, legacy_go_away_code(error_code));
    }

    /// The connection closed. The first close fixes the failure reason;
    /// later ones are ignored.
    pub fn on_connection_close(
        &mut self,
        code: CloseCode,
        detail: impl Into<String>,
        direction: CloseDirection,
    ) {
        self.teardown(CloseRecord::new(code, detail, direction));
    }

    /// The transport reported its connection closed.
    pub fn on_transport_closed(&mut self, info: &CloseInfo) {
        self.teardown(CloseRecord::from_info(info));
    }

    /// Close the connection because the peer broke the protocol.
    pub fn on_protocol_violation(&mut self, code: H3ErrorCode, detail: &str) {
        self.close_on_violation(code, detail.to_owned());
    }

    /// Flow control opened on `id`: drain its send buffer.
    pub fn on_stream_writable(&mut self, id: StreamId) -> Result<(), Error> {
        self.flush_stream(id)?;
        if self.state == SessionState::LocalClosing && self.all_sends_idle() {
            debug!(server = %self.config.server_id, "writes drained, closing");
            self.close();
        }
        Ok(())
    }

    // ── Facade hooks ────────────────────────────────────────────────

    pub(crate) fn notify_connected(&mut self) {
        debug!(server = %self.config.server_id, "connected");
        for observer in &mut self.observers {
            observer.on_event(ConnectionEvent::Connected);
        }
    }

    pub(crate) fn on_peer_settings(&mut self, settings: Settings) {
        debug!(?settings, "peer settings");
        self.peer_settings = Some(settings);
    }

    /// Decode a HEADERS payload, closing the connection if it is not valid
    /// QPACK.
    pub(crate) fn decode_header_block(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, Error> {
        self.codec.decode(block).map_err(|e| self.escalate(e))
    }

    /// Turn a parse failure into a connection close. Other errors pass
    /// through untouched.
    pub(crate) fn escalate(&mut self, err: Error) -> Error {
        match err {
            Error::ProtocolViolation { code, detail } => self.protocol_violation(code, detail),
            err => err,
        }
    }

    /// End of the peer's stream after all frames were delivered.
    pub(crate) fn on_stream_fin(&mut self, id: StreamId) -> Result<(), Error> {
        let Some(stream) = self.streams.get(&id) else {
            return Ok(());
        };
        if stream.read == HalfState::Closed {
            return Ok(());
        }
        match stream.phase {
            ResponsePhase::AwaitingHeaders => {
                debug!(stream_id = %id, "stream ended without a response");
                self.reset_stream_local(id, H3ErrorCode::MessageError.code());
                Ok(())
            }
            ResponsePhase::Body => self.on_data(id, Bytes::new(), true),
            ResponsePhase::Trailers => {
                self.finish_read(id);
                Ok(())
            }
        }
    }

    pub(crate) fn take_recv(&mut self, id: StreamId) -> Option<RecvState> {
        self.streams
            .get_mut(&id)
            .map(|s| std::mem::take(&mut s.recv))
    }

    pub(crate) fn restore_recv(&mut self, id: StreamId, recv: RecvState) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.recv = recv;
        }
    }

    /// Close the connection with `code`, returning the matching error.
    pub(crate) fn protocol_violation(
        &mut self,
        code: H3ErrorCode,
        detail: impl Into<String>,
    ) -> Error {
        let detail = detail.into();
        self.close_on_violation(code, detail.clone());
        Error::protocol(code, detail)
    }

    fn close_on_violation(&mut self, code: H3ErrorCode, detail: String) {
        if self.state != SessionState::Closed {
            warn!(
                server = %self.config.server_id,
                %code,
                %detail,
                "closing connection on protocol violation"
            );
            self.transport.close(code.code(), detail.as_bytes());
            self.teardown(CloseRecord::new(
                CloseCode::Application(code.code()),
                detail,
                CloseDirection::Local,
            ));
        }
    }

    // ── Stream operations (via StreamRef) ───────────────────────────

    pub(crate) fn stream_entry(&self, id: StreamId) -> Option<&ClientStream> {
        self.streams.get(&id)
    }

    pub(crate) fn add_stream_callbacks(&mut self, id: StreamId, callbacks: Box<dyn StreamCallbacks>) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.set_callbacks(callbacks);
        }
    }

    pub(crate) fn encode_headers(
        &mut self,
        id: StreamId,
        headers: HeaderMap,
        end_stream: bool,
    ) -> Result<(), Error> {
        if self.writable_stream(id)?.headers_sent {
            return Err(Error::InvalidState("request headers already sent"));
        }
        let fields = headers.into_request_fields().map_err(Error::InvalidState)?;
        if let Some(limit) = self.peer_settings.as_ref().and_then(|s| s.max_field_section_size) {
            let size: usize = fields.iter().map(HeaderField::size).sum();
            if size as u64 > limit {
                return Err(Error::ResourceExhausted(
                    "request headers exceed peer field section limit",
                ));
            }
        }

        let mut block = BytesMut::new();
        self.codec.encode(&fields, &mut block);
        let frame = Frame::Headers(block.freeze()).to_bytes();
        let len = frame.len() as u64;
        self.send_on_stream(id, frame, end_stream)?;

        self.stats.header_bytes_sent += len;
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.headers_sent = true;
        }
        trace!(stream_id = %id, end_stream, "request headers sent");
        Ok(())
    }

    pub(crate) fn encode_data(
        &mut self,
        id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), Error> {
        if !self.writable_stream(id)?.headers_sent {
            return Err(Error::InvalidState("request body before headers"));
        }
        if data.is_empty() {
            return self.send_on_stream(id, Bytes::new(), end_stream);
        }
        let frame = Frame::Data(data).to_bytes();
        let len = frame.len() as u64;
        self.send_on_stream(id, frame, end_stream)?;
        self.stats.body_bytes_sent += len;
        Ok(())
    }

    /// Reset `id` from this side with `error_code`.
    pub(crate) fn reset_stream_local(&mut self, id: StreamId, error_code: u64) {
        let Some(mut stream) = self.remove_stream(id) else {
            return;
        };
        debug!(stream_id = %id, code = %application_code_name(error_code), "stream reset locally");
        self.abandon_on_transport(&stream, error_code);
        self.finish_reset(&mut stream, StreamResetReason::LocalReset, error_code);
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn writable_stream(&self, id: StreamId) -> Result<&ClientStream, Error> {
        if self.state == SessionState::Closed {
            return Err(Error::InvalidState("session is closed"));
        }
        let stream = self
            .streams
            .get(&id)
            .ok_or(Error::InvalidState("stream is not active"))?;
        if stream.write == HalfState::Closed {
            return Err(Error::InvalidState("write side closed"));
        }
        Ok(stream)
    }

    /// Hand `bytes` to the transport, buffering what it does not take, and
    /// optionally end the write side.
    fn send_on_stream(&mut self, id: StreamId, bytes: Bytes, fin: bool) -> Result<(), Error> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(Error::InvalidState("stream is not active"))?;
        stream.send.check(bytes.len())?;

        let mut rest = bytes;
        if stream.send.is_empty() && !rest.is_empty() {
            match self.transport.stream_send(id, &rest) {
                Ok(n) => {
                    metrics::BYTES_SENT.add(n as u64);
                    rest.advance(n.min(rest.len()));
                }
                Err(e) => {
                    self.stream_send_failed(id, e)?;
                    return Err(Error::InvalidState("stream reset while writing"));
                }
            }
        }

        if let Some(mark) = stream.send.push(rest)? {
            stream.notify_watermark(mark);
        }
        if fin {
            stream.write = HalfState::Closed;
            if stream.send.is_empty() {
                if let Err(e) = self.transport.stream_finish(id) {
                    self.stream_send_failed(id, e)?;
                    return Err(Error::InvalidState("stream reset while writing"));
                }
            } else {
                stream.fin_pending = true;
            }
        }
        self.maybe_complete(id);
        Ok(())
    }

    fn flush_stream(&mut self, id: StreamId) -> Result<(), Error> {
        let Some(stream) = self.streams.get_mut(&id) else {
            return Ok(());
        };
        let transport = &mut self.transport;
        let (written, mark) = match stream.send.flush(|chunk| transport.stream_send(id, chunk)) {
            Ok(result) => result,
            Err(e) => return self.stream_send_failed(id, e),
        };
        metrics::BYTES_SENT.add(written as u64);
        if let Some(mark) = mark {
            stream.notify_watermark(mark);
        }
        if stream.fin_pending && stream.send.is_empty() {
            stream.fin_pending = false;
            if let Err(e) = self.transport.stream_finish(id) {
                return self.stream_send_failed(id, e);
            }
        }
        self.maybe_complete(id);
        Ok(())
    }

    /// Route a failed stream write. Stream-level failures end the stream
    /// with a reset callback; connection-level ones tear the session down.
    fn stream_send_failed(&mut self, id: StreamId, err: TransportError) -> Result<(), Error> {
        match err {
            TransportError::Stopped(code) | TransportError::Reset(code) => {
                self.on_stream_reset(id, code);
                Ok(())
            }
            TransportError::ClosedStream | TransportError::UnknownStream(_) => {
                self.reset_stream_local(id, H3ErrorCode::InternalError.code());
                Ok(())
            }
            err => Err(self.transport_failed(err)),
        }
    }

    pub(crate) fn transport_failed(&mut self, err: TransportError) -> Error {
        if err.is_connection_fatal() && self.state != SessionState::Closed {
            warn!(server = %self.config.server_id, error = %err, "transport failed");
            self.teardown(CloseRecord::new(
                CloseCode::Application(H3ErrorCode::InternalError.code()),
                err.to_string(),
                CloseDirection::Local,
            ));
        }
        Error::Transport(err)
    }

    /// Tell the transport to abandon whichever halves are still live.
    fn abandon_on_transport(&mut self, stream: &ClientStream, error_code: u64) {
        if stream.write == HalfState::Open || !stream.send_idle() {
            if let Err(e) = self.transport.reset_stream(stream.id, error_code) {
                trace!(stream_id = %stream.id, error = %e, "reset_stream failed");
            }
        }
        if stream.read == HalfState::Open
            && let Err(e) = self.transport.stop_sending(stream.id, error_code)
        {
            trace!(stream_id = %stream.id, error = %e, "stop_sending failed");
        }
    }

    fn finish_reset(&mut self, stream: &mut ClientStream, reason: StreamResetReason, code: u64) {
        stream.close_both();
        self.stats.streams_reset += 1;
        metrics::STREAMS_RESET.increment();
        stream.notify_reset(reason, code);
    }

    fn apply_go_away(&mut self, last_stream_id: u64, code: GoAwayErrorCode) {
        let limit = self
            .go_away_id
            .map_or(last_stream_id, |previous| previous.min(last_stream_id));
        self.go_away_id = Some(limit);
        if self.state == SessionState::Open {
            self.state = SessionState::RemoteClosing;
        }
        metrics::GOAWAY_RECEIVED.increment();
        debug!(server = %self.config.server_id, last_stream_id = limit, ?code, "GOAWAY received");
        for observer in &mut self.observers {
            observer.on_go_away(code);
        }
    }

    /// Record the close, reset every stream in creation order, then tell
    /// the connection observers.
    fn teardown(&mut self, record: CloseRecord) {
        if self.state == SessionState::Closed {
            trace!(reason = %record, "close after close ignored");
            return;
        }
        debug!(server = %self.config.server_id, reason = %record, "session closed");
        self.state = SessionState::Closed;
        let event = record.event();
        let code = record.raw_code();
        self.close.get_or_insert(record);
        metrics::CONNECTIONS_CLOSED.increment();

        let streams = std::mem::take(&mut self.streams);
        metrics::STREAMS_ACTIVE.sub(streams.len() as i64);
        for (_, mut stream) in streams {
            self.finish_reset(&mut stream, StreamResetReason::ConnectionTermination, code);
        }
        for observer in &mut self.observers {
            observer.on_event(event);
        }
    }

    fn finish_read(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.read = HalfState::Closed;
        }
        self.maybe_complete(id);
    }

    fn maybe_complete(&mut self, id: StreamId) {
        if self.streams.get(&id).is_some_and(ClientStream::is_complete) {
            self.remove_stream(id);
            trace!(stream_id = %id, "stream complete");
        }
    }

    fn remove_stream(&mut self, id: StreamId) -> Option<ClientStream> {
        let stream = self.streams.remove(&id)?;
        metrics::STREAMS_ACTIVE.decrement();
        Some(stream)
    }

    fn all_sends_idle(&self) -> bool {
        self.streams.values().all(ClientStream::send_idle)
    }
}
