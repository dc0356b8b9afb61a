//! Shared test harness: an in-memory `Transport` and recording observers.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use quicmux::frame::{self, Frame};
use quicmux::qpack::encode_field_section;
use quicmux::{
    ClientSession, ConnectionCallbacks, ConnectionEvent, GoAwayErrorCode, HeaderField, HeaderMap,
    HttpClientConnection, ResponseDecoder, ServerId, SessionConfig, Settings, StreamCallbacks,
    StreamId, StreamResetReason,
};
use quicmux_transport::{ConnectionState, Error as TransportError, Transport, TransportEvent};

// ── Logging ──────────────────────────────────────────────────────────

pub fn test_log() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Mock transport ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Inbound {
    pub data: VecDeque<u8>,
    pub fin: bool,
    pub reset: Option<u64>,
}

/// A transport that records every call and serves scripted inbound bytes.
#[derive(Debug)]
pub struct MockTransport {
    pub state: ConnectionState,
    /// Bidirectional streams the peer allows in total.
    pub max_bidi: usize,
    /// Bytes `stream_send` accepts before blocking; `None` is unlimited.
    pub credit: Option<usize>,
    pub sent: BTreeMap<StreamId, Vec<u8>>,
    pub finished: Vec<StreamId>,
    pub resets: Vec<(StreamId, u64)>,
    pub stops: Vec<(StreamId, u64)>,
    pub closes: Vec<(u64, String)>,
    /// Streams the peer sent STOP_SENDING on; writes fail with this code.
    pub stopped: HashMap<StreamId, u64>,
    pub inbound: HashMap<StreamId, Inbound>,
    pub events: VecDeque<TransportEvent>,
    next_bidi: u64,
    next_uni: u64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            state: ConnectionState::Established,
            max_bidi: 100,
            credit: None,
            sent: BTreeMap::new(),
            finished: Vec::new(),
            resets: Vec::new(),
            stops: Vec::new(),
            closes: Vec::new(),
            stopped: HashMap::new(),
            inbound: HashMap::new(),
            events: VecDeque::new(),
            next_bidi: 0,
            next_uni: 0,
        }
    }
}

impl MockTransport {
    /// Queue peer bytes on `id` and a readable event for them.
    pub fn deliver(&mut self, id: StreamId, bytes: &[u8], fin: bool) {
        let inbound = self.inbound.entry(id).or_default();
        inbound.data.extend(bytes);
        inbound.fin |= fin;
        self.events
            .push_back(TransportEvent::StreamReadable { stream: id });
    }

    /// Open a peer unidirectional stream carrying `bytes`.
    pub fn open_peer_uni(&mut self, id: StreamId, bytes: &[u8]) {
        let inbound = self.inbound.entry(id).or_default();
        inbound.data.extend(bytes);
        self.events.push_back(TransportEvent::StreamOpened {
            stream: id,
            bidi: false,
        });
    }

    /// The peer reset `id`; the next read reports it.
    pub fn peer_reset(&mut self, id: StreamId, code: u64) {
        self.inbound.entry(id).or_default().reset = Some(code);
        self.events
            .push_back(TransportEvent::StreamReadable { stream: id });
    }

    pub fn grant(&mut self, bytes: usize) {
        if let Some(credit) = self.credit.as_mut() {
            *credit += bytes;
        }
    }

    pub fn sent_bytes(&self, id: StreamId) -> &[u8] {
        self.sent.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every complete frame written to `id`. Skips a leading uni stream
    /// type when `uni` is set.
    pub fn sent_frames(&self, id: StreamId, uni: bool) -> Vec<Frame> {
        let mut buf = BytesMut::from(self.sent_bytes(id));
        if uni {
            let (_, n) = frame::peek_varint(&buf).unwrap();
            let _ = buf.split_to(n);
        }
        let mut frames = Vec::new();
        while let Some(frame) = frame::decode_frame(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn check_open(&self) -> Result<(), TransportError> {
        match self.state {
            ConnectionState::Closed => Err(TransportError::ConnectionClosed),
            _ => Ok(()),
        }
    }
}

impl Transport for MockTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn open_bidi(&mut self) -> Result<Option<StreamId>, TransportError> {
        self.check_open()?;
        if self.next_bidi as usize >= self.max_bidi {
            return Ok(None);
        }
        let id = StreamId::client_bidi(self.next_bidi);
        self.next_bidi += 1;
        Ok(Some(id))
    }

    fn open_uni(&mut self) -> Result<Option<StreamId>, TransportError> {
        self.check_open()?;
        let id = StreamId::client_uni(self.next_uni);
        self.next_uni += 1;
        Ok(Some(id))
    }

    fn stream_send(&mut self, stream: StreamId, data: &[u8]) -> Result<usize, TransportError> {
        self.check_open()?;
        if let Some(&code) = self.stopped.get(&stream) {
            return Err(TransportError::Stopped(code));
        }
        if self.finished.contains(&stream) {
            return Err(TransportError::ClosedStream);
        }
        let n = match self.credit.as_mut() {
            Some(credit) => {
                let n = data.len().min(*credit);
                *credit -= n;
                n
            }
            None => data.len(),
        };
        self.sent
            .entry(stream)
            .or_default()
            .extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn stream_recv(
        &mut self,
        stream: StreamId,
        buf: &mut [u8],
    ) -> Result<(usize, bool), TransportError> {
        self.check_open()?;
        let Some(inbound) = self.inbound.get_mut(&stream) else {
            return Ok((0, false));
        };
        if let Some(code) = inbound.reset {
            return Err(TransportError::Reset(code));
        }
        let n = buf.len().min(inbound.data.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.data.drain(..n)) {
            *slot = byte;
        }
        Ok((n, inbound.fin && inbound.data.is_empty()))
    }

    fn stream_finish(&mut self, stream: StreamId) -> Result<(), TransportError> {
        self.check_open()?;
        self.finished.push(stream);
        Ok(())
    }

    fn reset_stream(&mut self, stream: StreamId, error_code: u64) -> Result<(), TransportError> {
        self.check_open()?;
        self.resets.push((stream, error_code));
        Ok(())
    }

    fn stop_sending(&mut self, stream: StreamId, error_code: u64) -> Result<(), TransportError> {
        self.check_open()?;
        self.stops.push((stream, error_code));
        Ok(())
    }

    fn close(&mut self, error_code: u64, reason: &[u8]) {
        self.closes
            .push((error_code, String::from_utf8_lossy(reason).into_owned()));
        self.state = ConnectionState::Closed;
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

// ── Recording observers ──────────────────────────────────────────────

/// Shared, ordered log of every callback.
pub type Log = Rc<RefCell<Vec<String>>>;

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

/// Records response events as `"<tag> headers 200 end=false"` and similar.
pub struct RecordingDecoder {
    tag: String,
    log: Log,
}

impl RecordingDecoder {
    pub fn boxed(tag: &str, log: &Log) -> Box<Self> {
        Box::new(Self {
            tag: tag.to_string(),
            log: log.clone(),
        })
    }
}

impl ResponseDecoder for RecordingDecoder {
    fn decode_headers(&mut self, headers: HeaderMap, end_stream: bool) {
        let status = headers.status().unwrap_or_default();
        self.log
            .borrow_mut()
            .push(format!("{} headers {status} end={end_stream}", self.tag));
    }

    fn decode_informational(&mut self, headers: HeaderMap) {
        let status = headers.status().unwrap_or_default();
        self.log
            .borrow_mut()
            .push(format!("{} info {status}", self.tag));
    }

    fn decode_data(&mut self, data: Bytes, end_stream: bool) {
        self.log.borrow_mut().push(format!(
            "{} data {} end={end_stream}",
            self.tag,
            String::from_utf8_lossy(&data)
        ));
    }

    fn decode_trailers(&mut self, trailers: HeaderMap) {
        self.log
            .borrow_mut()
            .push(format!("{} trailers {}", self.tag, trailers.len()));
    }
}

/// Records `"<tag> reset <Reason> <code:#x>"`, `"<tag> high"`, `"<tag> low"`.
pub struct RecordingCallbacks {
    tag: String,
    log: Log,
}

impl RecordingCallbacks {
    pub fn boxed(tag: &str, log: &Log) -> Box<Self> {
        Box::new(Self {
            tag: tag.to_string(),
            log: log.clone(),
        })
    }
}

impl StreamCallbacks for RecordingCallbacks {
    fn on_reset_stream(&mut self, reason: StreamResetReason, error_code: u64) {
        self.log
            .borrow_mut()
            .push(format!("{} reset {reason:?} {error_code:#x}", self.tag));
    }

    fn on_above_write_buffer_high_watermark(&mut self) {
        self.log.borrow_mut().push(format!("{} high", self.tag));
    }

    fn on_below_write_buffer_low_watermark(&mut self) {
        self.log.borrow_mut().push(format!("{} low", self.tag));
    }
}

/// Records `"conn <Event>"` and `"goaway <Code>"`.
pub struct RecordingObserver {
    log: Log,
}

impl RecordingObserver {
    pub fn boxed(log: &Log) -> Box<Self> {
        Box::new(Self { log: log.clone() })
    }
}

impl ConnectionCallbacks for RecordingObserver {
    fn on_event(&mut self, event: ConnectionEvent) {
        self.log.borrow_mut().push(format!("conn {event:?}"));
    }

    fn on_go_away(&mut self, code: GoAwayErrorCode) {
        self.log.borrow_mut().push(format!("goaway {code:?}"));
    }
}

// ── Builders ─────────────────────────────────────────────────────────

pub fn config() -> SessionConfig {
    SessionConfig::new(ServerId::new("example.com", 443, false))
}

/// A session over a fresh mock transport with a recording observer.
pub fn session_with(config: SessionConfig) -> (ClientSession<MockTransport>, Log) {
    test_log();
    let log = new_log();
    let mut session = ClientSession::new(MockTransport::default(), config);
    session.add_connection_callbacks(RecordingObserver::boxed(&log));
    (session, log)
}

pub fn session() -> (ClientSession<MockTransport>, Log) {
    session_with(config())
}

/// Open a stream whose decoder and callbacks log under `tag`.
pub fn open(session: &mut ClientSession<MockTransport>, tag: &str, log: &Log) -> StreamId {
    let mut stream = session.open_stream(RecordingDecoder::boxed(tag, log)).unwrap();
    stream.add_callbacks(RecordingCallbacks::boxed(tag, log));
    stream.id()
}

pub fn get_request() -> HeaderMap {
    [(":authority", "a"), (":method", "GET"), (":path", "/")]
        .into_iter()
        .collect()
}

pub fn fields(pairs: &[(&'static str, &'static str)]) -> Vec<HeaderField> {
    pairs
        .iter()
        .map(|&(name, value)| HeaderField::new(name, value))
        .collect()
}

pub fn status(code: &'static str) -> Vec<HeaderField> {
    fields(&[(":status", code)])
}

// ── Wire helpers ─────────────────────────────────────────────────────

pub fn headers_frame(pairs: &[(&'static str, &'static str)]) -> Vec<u8> {
    let mut block = BytesMut::new();
    encode_field_section(&fields(pairs), &mut block);
    Frame::Headers(block.freeze()).to_bytes().to_vec()
}

pub fn data_frame(payload: &'static [u8]) -> Vec<u8> {
    Frame::Data(Bytes::from_static(payload)).to_bytes().to_vec()
}

/// Peer control stream: type 0x00 then `frames`.
/// Type and length varints of a frame whose payload follows separately.
pub fn frame_head(frame_type: u64, payload_len: u64) -> Vec<u8> {
    let mut buf = BytesMut::new();
    frame::put_varint(&mut buf, frame_type);
    frame::put_varint(&mut buf, payload_len);
    buf.to_vec()
}

pub fn control_stream(frames: &[Frame]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    frame::put_varint(&mut buf, 0x00);
    for frame in frames {
        frame.encode(&mut buf);
    }
    buf.to_vec()
}

pub const PEER_CONTROL: StreamId = StreamId::server_uni(0);

/// A facade that has seen `Connected` and the peer's SETTINGS.
pub fn connected() -> (HttpClientConnection<MockTransport>, Log) {
    let (session, log) = session();
    let mut conn = HttpClientConnection::new(session);
    let transport = conn.session_mut().transport_mut();
    transport.events.push_back(TransportEvent::Connected);
    transport.open_peer_uni(
        PEER_CONTROL,
        &control_stream(&[Frame::Settings(Settings::default())]),
    );
    conn.poll().unwrap();
    (conn, log)
}
