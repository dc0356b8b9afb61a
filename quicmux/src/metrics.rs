//! quicmux process-wide metrics.
//!
//! Counters aggregate over every session in the process; per-session numbers
//! live in [`SessionStats`](crate::SessionStats).

use metriken::{Counter, Gauge, metric};

// ── Streams ──────────────────────────────────────────────────────

#[metric(
    name = "quicmux/streams/opened",
    description = "Total request streams opened"
)]
pub static STREAMS_OPENED: Counter = Counter::new();

#[metric(
    name = "quicmux/streams/reset",
    description = "Total request streams ended by a reset callback"
)]
pub static STREAMS_RESET: Counter = Counter::new();

#[metric(
    name = "quicmux/streams/active",
    description = "Request streams currently registered"
)]
pub static STREAMS_ACTIVE: Gauge = Gauge::new();

// ── Connections ──────────────────────────────────────────────────

#[metric(
    name = "quicmux/connections/closed",
    description = "Total sessions closed, either direction"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "quicmux/goaway/received",
    description = "Total GOAWAY signals received"
)]
pub static GOAWAY_RECEIVED: Counter = Counter::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(
    name = "quicmux/bytes/sent",
    description = "Request stream bytes accepted by the transport"
)]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "quicmux/bytes/received",
    description = "Request stream frame payload bytes received"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();
