//! The record framer (C2): RFC 1831 §10 last-fragment-bit framing for
//! stream transports. Each fragment is a big-endian `u32` header (bit 31 =
//! last-fragment flag, bits 30..0 = byte length) followed by that many
//! bytes.

use crate::errors::RecordError;

const LAST_FRAGMENT_BIT: u32 = 1 << 31;
const LENGTH_MASK: u32 = !LAST_FRAGMENT_BIT;

/// Buffers fragments for a single outgoing record and emits them as raw
/// bytes ready to `write_all` onto a stream socket.
///
/// `push_record` finishes the working fragment with the last-fragment bit
/// set; `flush` (an intermediate fragment boundary, e.g. because the
/// working buffer filled up) emits with the bit clear.
#[derive(Debug, Default)]
pub struct RecordWriter {
    working: Vec<u8>,
}

impl RecordWriter {
    /// A writer with an empty working fragment.
    pub fn new() -> Self {
        Self {
            working: Vec::new(),
        }
    }

    /// Append bytes to the working fragment (no framing emitted yet).
    pub fn write(&mut self, data: &[u8]) {
        self.working.extend_from_slice(data);
    }

    /// Emit the working fragment as a non-final fragment, clearing it for
    /// more data.
    pub fn flush(&mut self) -> Vec<u8> {
        self.frame(false)
    }

    /// Emit the working fragment as the final fragment of the record,
    /// clearing it so the writer is ready for the next record.
    pub fn push_record(&mut self) -> Vec<u8> {
        self.frame(true)
    }

    fn frame(&mut self, last: bool) -> Vec<u8> {
        let body = std::mem::take(&mut self.working);
        let mut header = body.len() as u32 & LENGTH_MASK;
        if last {
            header |= LAST_FRAGMENT_BIT;
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// What the reader is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Accumulating the 4-byte fragment header; `header_have` bytes seen so
    /// far.
    Header { header_have: usize },
    /// Accumulating `frag_remaining` more bytes of the current fragment's
    /// body.
    Body { frag_remaining: u32 },
    /// A full record has been reassembled and is waiting for
    /// [`RecordReader::end_record`] before the next one can start.
    Boundary,
}

/// Reassembles fragments read off a stream transport into records.
///
/// Tracks the unread bytes of the fragment currently being consumed and
/// whether it is the record's last, per spec §4.2. Reading past the last
/// fragment is refused until the consumer calls [`RecordReader::end_record`].
#[derive(Debug)]
pub struct RecordReader {
    buf: Vec<u8>,
    state: ReadState,
    last_fragment: bool,
    header_buf: [u8; 4],
    max_record: usize,
}

impl RecordReader {
    /// A reader with no buffered data, capping reassembled records at
    /// `max_record` bytes.
    pub fn new(max_record: usize) -> Self {
        Self {
            buf: Vec::new(),
            state: ReadState::Header { header_have: 0 },
            last_fragment: false,
            header_buf: [0; 4],
            max_record,
        }
    }

    /// Feed newly-arrived bytes from the transport. May be called with any
    /// chunk size; fragment headers and bodies are reassembled incrementally.
    /// Once a record is fully buffered, further calls are a no-op until
    /// [`RecordReader::end_record`] is called.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<(), RecordError> {
        while !data.is_empty() {
            match self.state {
                ReadState::Boundary => return Ok(()),
                ReadState::Header { header_have } => {
                    let need = 4 - header_have;
                    let take = need.min(data.len());
                    self.header_buf[header_have..header_have + take].copy_from_slice(&data[..take]);
                    data = &data[take..];
                    if header_have + take == 4 {
                        let word = u32::from_be_bytes(self.header_buf);
                        self.last_fragment = word & LAST_FRAGMENT_BIT != 0;
                        self.state = ReadState::Body {
                            frag_remaining: word & LENGTH_MASK,
                        };
                    } else {
                        self.state = ReadState::Header {
                            header_have: header_have + take,
                        };
                    }
                }
                ReadState::Body { frag_remaining } => {
                    let take = (frag_remaining as usize).min(data.len());
                    self.buf.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.buf.len() > self.max_record {
                        return Err(RecordError::RecordTooLarge {
                            max: self.max_record,
                            got: self.buf.len(),
                        });
                    }

                    let remaining = frag_remaining - take as u32;
                    if remaining == 0 {
                        self.state = if self.last_fragment {
                            ReadState::Boundary
                        } else {
                            ReadState::Header { header_have: 0 }
                        };
                    } else {
                        self.state = ReadState::Body {
                            frag_remaining: remaining,
                        };
                    }
                }
            }
        }
        Ok(())
    }

    /// True once a full record (all fragments through the last-fragment
    /// bit) has been buffered and is ready to read via
    /// [`RecordReader::record`].
    pub fn record_ready(&self) -> bool {
        self.state == ReadState::Boundary
    }

    /// Borrow the reassembled record's bytes. Only meaningful when
    /// [`RecordReader::record_ready`] is true. Single-fragment records take
    /// a fast path with no extra copy beyond the original `feed` calls.
    pub fn record(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the current record and reset state to read the next one.
    pub fn end_record(&mut self) {
        self.buf.clear();
        self.state = ReadState::Header { header_have: 0 };
        self.last_fragment = false;
    }
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn single_fragment_round_trips() {
        let mut w = RecordWriter::new();
        w.write(b"hello");
        let wire = w.push_record();

        let mut r = RecordReader::new(1024);
        r.feed(&wire).unwrap();
        assert!(r.record_ready());
        assert_eq!(r.record(), b"hello");
    }

    #[test]
    fn multi_fragment_record_concatenates() {
        let mut w = RecordWriter::new();
        w.write(b"hello ");
        let frag1 = w.flush();
        w.write(b"world");
        let frag2 = w.push_record();

        let mut r = RecordReader::new(1024);
        r.feed(&frag1).unwrap();
        assert!(!r.record_ready());
        r.feed(&frag2).unwrap();
        assert!(r.record_ready());
        assert_eq!(r.record(), b"hello world");
    }

    #[test]
    fn arbitrary_chunking_preserves_record_boundaries() {
        let mut w = RecordWriter::new();
        w.write(b"0123456789");
        let wire = w.push_record();

        for chunk_size in 1..=wire.len() {
            let mut r = RecordReader::new(1024);
            for chunk in wire.chunks(chunk_size) {
                r.feed(chunk).unwrap();
            }
            assert!(r.record_ready(), "chunk_size={chunk_size}");
            assert_eq!(r.record(), b"0123456789", "chunk_size={chunk_size}");
        }
    }

    #[test]
    fn oversized_record_is_rejected() {
        let mut w = RecordWriter::new();
        w.write(&vec![0u8; 64]);
        let wire = w.push_record();

        let mut r = RecordReader::new(16);
        let err = r.feed(&wire).unwrap_err();
        assert_eq!(
            err,
            RecordError::RecordTooLarge {
                max: 16,
                got: 64,
            }
        );
    }

    #[test]
    fn end_record_resets_for_the_next_one() {
        let mut w = RecordWriter::new();
        w.write(b"one");
        let first = w.push_record();
        w.write(b"two");
        let second = w.push_record();

        let mut r = RecordReader::new(1024);
        r.feed(&first).unwrap();
        assert_eq!(r.record(), b"one");
        r.end_record();
        assert!(!r.record_ready());

        r.feed(&second).unwrap();
        assert!(r.record_ready());
        assert_eq!(r.record(), b"two");
    }

    proptest! {
        #[test]
        fn prop_arbitrary_chunking_reassembles_the_record(
            body in prop::collection::vec(any::<u8>(), 0..512),
            chunk_size in 1..600usize,
        ) {
            let mut w = RecordWriter::new();
            w.write(&body);
            let wire = w.push_record();

            let mut r = RecordReader::new(4096);
            for chunk in wire.chunks(chunk_size) {
                r.feed(chunk).unwrap();
            }
            assert!(r.record_ready());
            assert_eq!(r.record(), body.as_slice());
        }

        #[test]
        fn prop_multi_fragment_record_concatenates_in_order(
            fragments in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
            chunk_size in 1..128usize,
        ) {
            let mut w = RecordWriter::new();
            let mut wire = Vec::new();
            let (last, rest) = fragments.split_last().unwrap();
            for frag in rest {
                w.write(frag);
                wire.extend(w.flush());
            }
            w.write(last);
            wire.extend(w.push_record());

            let mut r = RecordReader::new(4096);
            for chunk in wire.chunks(chunk_size) {
                r.feed(chunk).unwrap();
            }
            assert!(r.record_ready());
            let expected: Vec<u8> = fragments.into_iter().flatten().collect();
            assert_eq!(r.record(), expected.as_slice());
        }
    }
}
