//! Per-stream send buffering with watermark tracking.
//!
//! Bytes the transport does not take immediately are held here, bounded by
//! the session's send buffer limit. The owner is told when the buffer fills
//! (high watermark) and when it drains back to half the limit (low
//! watermark), once per crossing.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

use crate::error::Error;

/// Watermark crossing produced by a buffer mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// The buffer reached its limit.
    High,
    /// The buffer drained to half its limit after a high crossing.
    Low,
}

#[derive(Debug)]
pub struct SendBuffer {
    chunks: VecDeque<Bytes>,
    used: usize,
    limit: usize,
    above_high: bool,
}

impl SendBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            used: 0,
            limit,
            above_high: false,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn available(&self) -> usize {
        self.limit - self.used
    }

    /// Check that `len` more bytes fit without buffering anything.
    pub fn check(&self, len: usize) -> Result<(), Error> {
        match self.used.checked_add(len) {
            Some(total) if total <= self.limit => Ok(()),
            _ => Err(Error::ResourceExhausted("stream send buffer full")),
        }
    }

    /// Queue `data`. Fails without changing state if it does not fit.
    pub fn push(&mut self, data: Bytes) -> Result<Option<Watermark>, Error> {
        self.check(data.len())?;
        if data.is_empty() {
            return Ok(None);
        }
        self.used += data.len();
        self.chunks.push_back(data);
        if self.used >= self.limit && !self.above_high {
            self.above_high = true;
            return Ok(Some(Watermark::High));
        }
        Ok(None)
    }

    /// Offer queued bytes to `write` in order until it accepts less than it
    /// was given. `write` returns how many bytes it took.
    pub fn flush<F, E>(&mut self, mut write: F) -> Result<(usize, Option<Watermark>), E>
    where
        F: FnMut(&[u8]) -> Result<usize, E>,
    {
        let mut written = 0;
        while let Some(front) = self.chunks.front_mut() {
            let n = write(&front[..])?.min(front.len());
            written += n;
            self.used -= n;
            if n < front.len() {
                front.advance(n);
                break;
            }
            self.chunks.pop_front();
        }
        Ok((written, self.low_crossing()))
    }

    /// Drop everything queued, e.g. when the stream is reset.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.used = 0;
        self.above_high = false;
    }

    fn low_crossing(&mut self) -> Option<Watermark> {
        if self.above_high && self.used <= self.limit / 2 {
            self.above_high = false;
            return Some(Watermark::Low);
        }
        None
    }
}
