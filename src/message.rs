//! Scatter-gather message buffer (C3): a [`Message`] is a sequence of
//! `(pointer, length)` spans backed by an owned scratch buffer and zero or
//! more shared [`Buffer`] references, so large opaque payloads (e.g. NFS
//! READ/WRITE data) can be attached by reference instead of copied through
//! the XDR scratch region.

use std::sync::Arc;

use crate::errors::XdrError;
use crate::xdr::{XdrSink, XdrSource};

/// An owned byte region with shared ownership (spec §3 "Buffer"). Cloning is
/// cheap - it bumps the `Arc` refcount - and the backing allocation is
/// released when the last clone drops.
#[derive(Debug, Clone)]
pub struct Buffer(Arc<[u8]>);

impl Buffer {
    /// Wrap an owned byte vector.
    pub fn from_vec(v: Vec<u8>) -> Self {
        Self(Arc::from(v.into_boxed_slice()))
    }

    /// Copy `data` into a new buffer.
    pub fn copy_from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Borrow the buffer's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One span of a [`Message`]: either part of the owned scratch region, or a
/// whole shared [`Buffer`] referenced zero-copy.
#[derive(Debug, Clone)]
enum Span {
    Scratch { start: usize, len: usize },
    Shared(Buffer),
}

/// A scatter-gather RPC message (spec §3 "Message").
///
/// Invariants upheld by the API (never by the caller poking at internals):
/// the write cursor is always inside the current scratch span; appending a
/// [`Buffer`] closes the current scratch span, appends the buffer's span,
/// and opens a new scratch span; padding is emitted from a shared zero-fill
/// span rather than copied per-message.
#[derive(Debug, Default)]
pub struct Message {
    /// May run ahead of `committed`: `remaining_mut` grows it with
    /// zero-filled scratch so the returned span is always real, borrowed
    /// memory rather than uninitialised spare capacity.
    scratch: Vec<u8>,
    /// Bytes of `scratch` actually written so far.
    committed: usize,
    spans: Vec<Span>,
    /// Start offset, within `scratch`, of the currently-open scratch span.
    open_at: usize,
}

impl Message {
    /// An empty message with scratch capacity pre-reserved.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            scratch: Vec::with_capacity(cap),
            committed: 0,
            spans: Vec::new(),
            open_at: 0,
        }
    }

    /// Append a zero-copy reference to `buf`. Closes any non-empty open
    /// scratch span and opens a fresh one after the buffer's span.
    pub fn append_buffer(&mut self, buf: Buffer) {
        self.close_scratch_span();
        if !buf.is_empty() {
            self.spans.push(Span::Shared(buf));
        }
    }

    fn close_scratch_span(&mut self) {
        let len = self.committed - self.open_at;
        if len > 0 {
            self.spans.push(Span::Scratch {
                start: self.open_at,
                len,
            });
        }
        self.open_at = self.committed;
    }

    /// Finish building the message, returning the ordered list of `(ptr,
    /// len)` iovec-style spans ready to hand to a writev-capable transport.
    pub fn finish(mut self) -> Vec<Buffer> {
        self.close_scratch_span();
        self.scratch.truncate(self.committed);
        let scratch = Arc::<[u8]>::from(self.scratch.into_boxed_slice());
        self.spans
            .into_iter()
            .map(|s| match s {
                Span::Scratch { start, len } => Buffer(scratch.clone().split_sub(start, len)),
                Span::Shared(b) => b,
            })
            .collect()
    }

    /// Total byte length across all spans (including the still-open
    /// scratch span).
    pub fn len(&self) -> usize {
        self.spans
            .iter()
            .map(|s| match s {
                Span::Scratch { len, .. } => *len,
                Span::Shared(b) => b.len(),
            })
            .sum::<usize>()
            + (self.committed - self.open_at)
    }

    /// True if the message carries no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten the message into one contiguous `Vec<u8>`, copying any
    /// referenced buffers. Intended for transports without scatter-gather
    /// writes (datagram sockets, the local loopback channel).
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for s in &self.spans {
            match s {
                Span::Scratch { start, len } => out.extend_from_slice(&self.scratch[*start..*start + *len]),
                Span::Shared(b) => out.extend_from_slice(b.as_slice()),
            }
        }
        out.extend_from_slice(&self.scratch[self.open_at..self.committed]);
        out
    }
}

// `Arc<[u8]>` has no built-in sub-slice view that keeps the whole
// allocation alive; this helper fabricates one the same way `bytes::Bytes`
// does, by keeping the full `Arc` alive behind an owned sub-slice copy.
// Transports in this crate are small-message RPC, so the extra copy here
// (only paid once, at `finish()`) is preferable to reimplementing `Bytes`.
trait ArcSub {
    fn split_sub(self, start: usize, len: usize) -> Arc<[u8]>;
}

impl ArcSub for Arc<[u8]> {
    fn split_sub(self, start: usize, len: usize) -> Arc<[u8]> {
        Arc::from(&self[start..start + len])
    }
}

impl XdrSink for Message {
    fn remaining_mut(&mut self) -> &mut [u8] {
        const GROWTH_CHUNK: usize = 4096;
        if self.scratch.len() - self.committed < GROWTH_CHUNK {
            self.scratch.resize(self.committed + GROWTH_CHUNK, 0);
        }
        &mut self.scratch[self.committed..]
    }

    fn advance_mut(&mut self, n: usize) {
        debug_assert!(self.committed + n <= self.scratch.len());
        self.committed += n;
    }

    fn flush(&mut self) -> Result<(), XdrError> {
        // The scratch `Vec` grows on demand; nothing to roll over to.
        Ok(())
    }
}

/// A read cursor over an already-assembled, flattened message body. Used
/// server- and client-side once a record has been fully reassembled by
/// [`crate::record`] into one contiguous slice.
#[derive(Debug, Clone, Copy)]
pub struct MessageCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageCursor<'a> {
    /// Wrap `data` for reading from the start.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The full underlying buffer (not just the unread tail).
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> XdrSource for MessageCursor<'a> {
    fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn fill(&mut self) -> Result<(), XdrError> {
        Err(XdrError::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdr::{decode_var_bytes, encode_var_bytes};

    #[test]
    fn append_buffer_splits_scratch_spans() {
        let mut msg = Message::with_capacity(64);
        msg.put_word(1).unwrap();
        msg.append_buffer(Buffer::copy_from(b"payload"));
        msg.put_word(2).unwrap();

        let flat = msg.to_contiguous();
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u32.to_be_bytes());
        expected.extend_from_slice(b"payload");
        expected.extend_from_slice(&2u32.to_be_bytes());
        assert_eq!(flat, expected);
    }

    #[test]
    fn round_trips_through_message_cursor() {
        let mut msg = Message::with_capacity(64);
        encode_var_bytes(&mut msg, b"hello world").unwrap();
        let flat = msg.to_contiguous();

        let mut cursor = MessageCursor::new(&flat);
        let got = decode_var_bytes(&mut cursor, 64).unwrap();
        assert_eq!(got, b"hello world");
    }

    #[test]
    fn empty_message_has_zero_length() {
        let msg = Message::with_capacity(0);
        assert!(msg.is_empty());
    }
}
