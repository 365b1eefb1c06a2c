//! A size-only sink (spec §4.1 "sizing mode"): counts the bytes an encode
//! would produce without materialising them, so callers can pre-allocate
//! the real buffer ([`crate::xdr::MemorySink::with_capacity`]).

use crate::errors::XdrError;
use crate::xdr::XdrSink;

/// Counts encoded bytes without writing them anywhere.
#[derive(Debug, Default)]
pub struct SizeSink {
    len: usize,
}

impl SizeSink {
    /// A fresh, zeroed counter.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// The number of bytes that would have been written.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing has been counted yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl XdrSink for SizeSink {
    // `SizeSink` has no real backing storage, so it overrides every
    // operation that would otherwise touch `remaining_mut`/`advance_mut`
    // directly, rather than relying on the generic loop-based defaults.

    fn remaining_mut(&mut self) -> &mut [u8] {
        &mut []
    }

    fn advance_mut(&mut self, _n: usize) {
        unreachable!("SizeSink overrides every method that could call advance_mut")
    }

    fn flush(&mut self) -> Result<(), XdrError> {
        Ok(())
    }

    fn put_word(&mut self, _v: u32) -> Result<(), XdrError> {
        self.len += 4;
        Ok(())
    }

    fn put_bytes(&mut self, data: &[u8]) -> Result<(), XdrError> {
        self.len += data.len();
        Ok(())
    }

    fn put_zeros(&mut self, n: usize) -> Result<(), XdrError> {
        self.len += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdr::{encode_string, encode_var_bytes, MemorySink};

    #[test]
    fn size_sink_matches_memory_sink() {
        let mut size = SizeSink::new();
        encode_string(&mut size, "hello").unwrap();

        let mut mem = MemorySink::new();
        encode_var_bytes(&mut mem, b"hello").unwrap();

        assert_eq!(size.len(), mem.into_inner().len());
    }
}
