//! A single growable in-memory region backing [`super::XdrSink`]/[`super::XdrSource`].
//!
//! This is the simplest possible implementation of the two traits: there is
//! only ever one region, so `flush`/`fill` never roll over to anything new
//! and simply report overflow/end-of-stream. Transports that need several
//! regions (the record framer, the scatter-gather [`crate::message::Message`])
//! implement the traits directly against their own buffers instead.

use crate::errors::XdrError;
use crate::xdr::{XdrSink, XdrSource};

/// Write-only XDR sink over an owned, growable `Vec<u8>`.
///
/// `buf` may be longer than the committed output: `remaining_mut` grows it
/// with zero-filled scratch ahead of `len` so the returned slice is always a
/// real, safely-borrowed span rather than uninitialised spare capacity.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Vec<u8>,
    len: usize,
}

impl MemorySink {
    /// Construct an empty sink.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            len: 0,
        }
    }

    /// Construct a sink with `cap` bytes of pre-allocated capacity (typical
    /// usage: size the payload first with [`crate::xdr::SizeSink`]).
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
            len: 0,
        }
    }

    /// Consume the sink, returning the bytes written.
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

const GROWTH_CHUNK: usize = 4096;

impl XdrSink for MemorySink {
    fn remaining_mut(&mut self) -> &mut [u8] {
        if self.buf.len() - self.len < GROWTH_CHUNK {
            self.buf.resize(self.len + GROWTH_CHUNK, 0);
        }
        &mut self.buf[self.len..]
    }

    fn advance_mut(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.buf.len());
        self.len += n;
    }

    fn flush(&mut self) -> Result<(), XdrError> {
        // `remaining_mut` grows the backing `Vec` on demand; there is no
        // fixed capacity to exhaust.
        Ok(())
    }
}

/// Read-only XDR source over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct MemorySource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemorySource<'a> {
    /// Construct a source reading from `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unread tail of the underlying slice.
    pub fn tail(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl<'a> XdrSource for MemorySource<'a> {
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
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn memory_sink_accumulates_committed_bytes_only() {
        let mut sink = MemorySink::new();
        sink.put_word(0xdead_beef).unwrap();
        sink.put_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(sink.into_inner(), vec![0xde, 0xad, 0xbe, 0xef, 1, 2, 3]);
    }

    #[test]
    fn memory_source_reads_back_what_was_written() {
        let mut sink = MemorySink::new();
        sink.put_word(7).unwrap();
        let bytes = sink.into_inner();

        let mut src = MemorySource::new(&bytes);
        assert_eq!(src.get_word().unwrap(), 7);
    }

    proptest! {
        #[test]
        fn prop_fixed_bytes_round_trip(
            data in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut sink = MemorySink::new();
            crate::xdr::encode_fixed_bytes(&mut sink, &data).unwrap();
            let wire = sink.into_inner();

            let mut src = MemorySource::new(&wire);
            let got = crate::xdr::decode_fixed_bytes(&mut src, data.len()).unwrap();
            assert_eq!(data, got);
        }

        #[test]
        fn prop_var_bytes_round_trip(
            data in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut sink = MemorySink::new();
            crate::xdr::encode_var_bytes(&mut sink, &data).unwrap();
            let wire = sink.into_inner();

            let mut src = MemorySource::new(&wire);
            let got = crate::xdr::decode_var_bytes(&mut src, data.len() as u32).unwrap();
            assert_eq!(data, got);
        }

        #[test]
        fn prop_word_round_trip(v in any::<u32>()) {
            let mut sink = MemorySink::new();
            sink.put_word(v).unwrap();
            let wire = sink.into_inner();

            let mut src = MemorySource::new(&wire);
            assert_eq!(src.get_word().unwrap(), v);
        }
    }
}
