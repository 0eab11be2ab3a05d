//! Fixed-capacity response buffer ("LineReader" in the design doc).
//!
//! Owns the bytes accumulated from one upstream read cycle and knows only
//! how to tell a caller "not a complete reply yet", "here is one complete
//! reply", or "overflowed without ever completing". It does not know
//! anything about protocols; `classify` is the pure function layered on
//! top of a completed reply.
//!
//! Modeled with the same `start/pos/last/end` cursor scheme nginx's own
//! buffers use rather than a growable `BytesMut`: growth would defeat the
//! overflow detection this type exists to provide, and resetting to
//! `start` after each consumed reply (invariant 2 in the design doc) is a
//! single pointer reset instead of a reallocation.

/// Outcome of trying to find one complete reply at the front of the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum LineStatus<'a> {
    /// Fewer than 4 bytes, or no trailing CRLF yet: read more.
    Again,
    /// A complete reply (`b"..." ending in CRLF`), including the CRLF.
    Complete(&'a [u8]),
    /// Buffer filled up without ever finding a terminating CRLF.
    Overflow,
}

pub struct Buffer {
    data: Vec<u8>,
    pos: usize,
    last: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            pos: 0,
            last: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Slice available to read more upstream bytes into (`last..end`).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.last..]
    }

    /// Record that `n` bytes were just read into the spare slice.
    pub fn advance(&mut self, n: usize) {
        self.last += n;
        debug_assert!(self.last <= self.data.len());
    }

    /// Reset to empty, ready for the next reply (design invariant 2).
    pub fn reset(&mut self) {
        self.pos = 0;
        self.last = 0;
    }

    /// Record that `n` bytes at the front of `filled()` were written out,
    /// compacting any remainder to the front so `spare_mut()` always sees
    /// the buffer's full capacity again once it drains.
    pub fn consume(&mut self, n: usize) {
        self.pos += n;
        debug_assert!(self.pos <= self.last);
        if self.pos == self.last {
            self.pos = 0;
            self.last = 0;
        } else if self.pos > 0 {
            self.data.copy_within(self.pos..self.last, 0);
            self.last -= self.pos;
            self.pos = 0;
        }
    }

    /// Bytes currently accumulated, from `pos` to `last`.
    pub fn filled(&self) -> &[u8] {
        &self.data[self.pos..self.last]
    }

    pub fn is_full(&self) -> bool {
        self.last == self.data.len()
    }

    /// Check whether `filled()` is a complete CRLF-terminated reply.
    pub fn poll_complete(&self) -> LineStatus<'_> {
        let buf = self.filled();
        if buf.len() < 4 {
            return if self.is_full() {
                LineStatus::Overflow
            } else {
                LineStatus::Again
            };
        }
        if buf[buf.len() - 2] != b'\r' || buf[buf.len() - 1] != b'\n' {
            return if self.is_full() {
                LineStatus::Overflow
            } else {
                LineStatus::Again
            };
        }
        LineStatus::Complete(buf)
    }
}
