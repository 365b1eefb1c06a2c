//! The XDR codec (C1): byte-exact, 4-byte-aligned serialisation of the RPC
//! data model over one or more buffered regions.
//!
//! [`XdrSink`] and [`XdrSource`] are the transport-independent primitive
//! operations described in spec §4.1. Each is built around a "current
//! region" the implementor exposes via `remaining_mut`/`remaining` and
//! `advance_mut`/`advance`; `flush`/`fill` are invoked when the region is
//! exhausted, and push the codec onto the next region of a [`crate::message::Message`]
//! or a record-framed stream.
//!
//! The composite codecs (arrays, opaque, strings, optionals, unions) are
//! free functions over these traits rather than methods on a concrete type,
//! mirroring `xdr()` overloads in the source.

mod memory;
mod size;

pub use memory::{MemorySink, MemorySource};
pub use size::SizeSink;

use byteorder::{BigEndian, ByteOrder};

use crate::errors::XdrError;

/// Round a byte length up to the next multiple of 4.
#[inline]
pub fn round_up(len: usize) -> usize {
    (len + 3) & !3
}

/// Padding length needed after `len` bytes of opaque data.
#[inline]
pub fn pad_len(len: usize) -> usize {
    round_up(len) - len
}

/// A shared zero-fill span long enough for any padding run we emit (opaque
/// data pads at most 3 bytes).
const ZERO_PAD: [u8; 4] = [0; 4];

/// Destination for XDR-encoded bytes.
///
/// Implementors provide access to "the current region" via
/// `remaining_mut`/`advance_mut`, and `flush` to roll over to a new region
/// once the current one is exhausted. The word/byte level operations are
/// provided in terms of those three primitives, matching the source's
/// `XdrSink::putWord`/`putBytes`/`flush` split.
pub trait XdrSink {
    /// The writable tail of the current region.
    fn remaining_mut(&mut self) -> &mut [u8];

    /// Mark `n` bytes of the current region (as previously returned by
    /// `remaining_mut`) as written.
    fn advance_mut(&mut self, n: usize);

    /// Called when `remaining_mut()` is empty but more data must be
    /// written; rolls over to a new region, or fails with
    /// [`XdrError::Overflow`] if no more capacity exists.
    fn flush(&mut self) -> Result<(), XdrError>;

    /// Write a single big-endian 32-bit word; the only alignment-safe unit.
    fn put_word(&mut self, v: u32) -> Result<(), XdrError> {
        if self.remaining_mut().len() < 4 {
            self.flush()?;
            if self.remaining_mut().len() < 4 {
                return Err(XdrError::Overflow);
            }
        }
        BigEndian::write_u32(&mut self.remaining_mut()[..4], v);
        self.advance_mut(4);
        Ok(())
    }

    /// Write `data` verbatim, with no padding (padding is the caller's
    /// responsibility - see [`encode_fixed_bytes`]/[`encode_var_bytes`]).
    fn put_bytes(&mut self, mut data: &[u8]) -> Result<(), XdrError> {
        while !data.is_empty() {
            if self.remaining_mut().is_empty() {
                self.flush()?;
                if self.remaining_mut().is_empty() {
                    return Err(XdrError::Overflow);
                }
            }
            let n = data.len().min(self.remaining_mut().len());
            self.remaining_mut()[..n].copy_from_slice(&data[..n]);
            self.advance_mut(n);
            data = &data[n..];
        }
        Ok(())
    }

    /// Write `n` zero bytes (used for opaque padding).
    fn put_zeros(&mut self, mut n: usize) -> Result<(), XdrError> {
        while n > 0 {
            if self.remaining_mut().is_empty() {
                self.flush()?;
                if self.remaining_mut().is_empty() {
                    return Err(XdrError::Overflow);
                }
            }
            let chunk = n.min(self.remaining_mut().len()).min(ZERO_PAD.len());
            self.remaining_mut()[..chunk].copy_from_slice(&ZERO_PAD[..chunk]);
            self.advance_mut(chunk);
            n -= chunk;
        }
        Ok(())
    }
}

/// Source of XDR-encoded bytes, the read-side mirror of [`XdrSink`].
pub trait XdrSource {
    /// The unread head of the current region.
    fn remaining(&self) -> &[u8];

    /// Mark `n` bytes of the current region as consumed.
    fn advance(&mut self, n: usize);

    /// Called when `remaining()` is empty but more data must be read; rolls
    /// over to the next region, or fails with [`XdrError::EndOfStream`] if
    /// none remains.
    fn fill(&mut self) -> Result<(), XdrError>;

    /// Read a single big-endian 32-bit word.
    fn get_word(&mut self) -> Result<u32, XdrError> {
        if self.remaining().len() < 4 {
            self.fill()?;
            if self.remaining().len() < 4 {
                return Err(XdrError::EndOfStream);
            }
        }
        let v = BigEndian::read_u32(&self.remaining()[..4]);
        self.advance(4);
        Ok(v)
    }

    /// Read exactly `buf.len()` bytes (no padding handling).
    fn get_bytes_into(&mut self, buf: &mut [u8]) -> Result<(), XdrError> {
        let mut off = 0;
        while off < buf.len() {
            if self.remaining().is_empty() {
                self.fill()?;
                if self.remaining().is_empty() {
                    return Err(XdrError::EndOfStream);
                }
            }
            let n = (buf.len() - off).min(self.remaining().len());
            buf[off..off + n].copy_from_slice(&self.remaining()[..n]);
            self.advance(n);
            off += n;
        }
        Ok(())
    }

    /// Read `n` bytes into a freshly allocated `Vec<u8>`.
    fn get_bytes(&mut self, n: usize) -> Result<Vec<u8>, XdrError> {
        let mut buf = vec![0u8; n];
        self.get_bytes_into(&mut buf)?;
        Ok(buf)
    }

    /// Skip `n` bytes (used to discard opaque padding).
    fn skip(&mut self, mut n: usize) -> Result<(), XdrError> {
        while n > 0 {
            if self.remaining().is_empty() {
                self.fill()?;
                if self.remaining().is_empty() {
                    return Err(XdrError::EndOfStream);
                }
            }
            let chunk = n.min(self.remaining().len());
            self.advance(chunk);
            n -= chunk;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Composite codecs (free functions, algorithmic per spec §4.1).
// ---------------------------------------------------------------------

/// Encode a signed 32-bit integer (same bits as `u32`).
pub fn encode_i32<S: XdrSink + ?Sized>(sink: &mut S, v: i32) -> Result<(), XdrError> {
    sink.put_word(v as u32)
}

/// Decode a signed 32-bit integer.
pub fn decode_i32<So: XdrSource + ?Sized>(src: &mut So) -> Result<i32, XdrError> {
    Ok(src.get_word()? as i32)
}

/// Encode an unsigned 64-bit integer as high word then low word.
pub fn encode_u64<S: XdrSink + ?Sized>(sink: &mut S, v: u64) -> Result<(), XdrError> {
    sink.put_word((v >> 32) as u32)?;
    sink.put_word(v as u32)
}

/// Decode an unsigned 64-bit integer.
pub fn decode_u64<So: XdrSource + ?Sized>(src: &mut So) -> Result<u64, XdrError> {
    let hi = src.get_word()? as u64;
    let lo = src.get_word()? as u64;
    Ok((hi << 32) | lo)
}

/// Encode a signed 64-bit integer.
pub fn encode_i64<S: XdrSink + ?Sized>(sink: &mut S, v: i64) -> Result<(), XdrError> {
    encode_u64(sink, v as u64)
}

/// Decode a signed 64-bit integer.
pub fn decode_i64<So: XdrSource + ?Sized>(src: &mut So) -> Result<i64, XdrError> {
    Ok(decode_u64(src)? as i64)
}

/// Encode an IEEE-754 single precision float as raw bits.
pub fn encode_f32<S: XdrSink + ?Sized>(sink: &mut S, v: f32) -> Result<(), XdrError> {
    sink.put_word(v.to_bits())
}

/// Decode an IEEE-754 single precision float.
pub fn decode_f32<So: XdrSource + ?Sized>(src: &mut So) -> Result<f32, XdrError> {
    Ok(f32::from_bits(src.get_word()?))
}

/// Encode an IEEE-754 double precision float as raw bits.
pub fn encode_f64<S: XdrSink + ?Sized>(sink: &mut S, v: f64) -> Result<(), XdrError> {
    encode_u64(sink, v.to_bits())
}

/// Decode an IEEE-754 double precision float.
pub fn decode_f64<So: XdrSource + ?Sized>(src: &mut So) -> Result<f64, XdrError> {
    Ok(f64::from_bits(decode_u64(src)?))
}

/// Encode a bool as `u32 ∈ {0,1}`.
pub fn encode_bool<S: XdrSink + ?Sized>(sink: &mut S, v: bool) -> Result<(), XdrError> {
    sink.put_word(if v { 1 } else { 0 })
}

/// Decode a bool; any non-zero word decodes as `true`.
pub fn decode_bool<So: XdrSource + ?Sized>(src: &mut So) -> Result<bool, XdrError> {
    Ok(src.get_word()? != 0)
}

/// Encode a fixed-length byte array (`opaque<N>`), padded to a 4-byte
/// boundary. `data.len()` must equal `n`.
pub fn encode_fixed_bytes<S: XdrSink + ?Sized>(sink: &mut S, data: &[u8]) -> Result<(), XdrError> {
    sink.put_bytes(data)?;
    sink.put_zeros(pad_len(data.len()))
}

/// Decode a fixed-length byte array of exactly `n` bytes.
pub fn decode_fixed_bytes<So: XdrSource + ?Sized>(
    src: &mut So,
    n: usize,
) -> Result<Vec<u8>, XdrError> {
    let v = src.get_bytes(n)?;
    src.skip(pad_len(n))?;
    Ok(v)
}

/// Encode a variable-length byte array (`opaque<max>`): length word, data,
/// padding.
pub fn encode_var_bytes<S: XdrSink + ?Sized>(sink: &mut S, data: &[u8]) -> Result<(), XdrError> {
    sink.put_word(data.len() as u32)?;
    encode_fixed_bytes(sink, data)
}

/// Decode a variable-length byte array bounded by `max`, failing with
/// [`XdrError::ArrayOverflow`] if the wire length prefix exceeds it.
pub fn decode_var_bytes<So: XdrSource + ?Sized>(
    src: &mut So,
    max: u32,
) -> Result<Vec<u8>, XdrError> {
    let len = src.get_word()?;
    if len > max {
        return Err(XdrError::ArrayOverflow { got: len, max });
    }
    decode_fixed_bytes(src, len as usize)
}

/// Encode a string; identical wire layout to a variable byte array.
pub fn encode_string<S: XdrSink + ?Sized>(sink: &mut S, s: &str) -> Result<(), XdrError> {
    encode_var_bytes(sink, s.as_bytes())
}

/// Decode a string bounded by `max` bytes.
pub fn decode_string<So: XdrSource + ?Sized>(src: &mut So, max: u32) -> Result<String, XdrError> {
    let bytes = decode_var_bytes(src, max)?;
    String::from_utf8(bytes).map_err(|e| XdrError::Malformed(e.to_string()))
}

/// Encode an `Optional<T>` in the linked-list pointer form: a bool "more"
/// flag then the conditional value.
pub fn encode_option<S, T, F>(sink: &mut S, v: &Option<T>, mut encode_one: F) -> Result<(), XdrError>
where
    S: XdrSink + ?Sized,
    F: FnMut(&mut S, &T) -> Result<(), XdrError>,
{
    match v {
        Some(inner) => {
            encode_bool(sink, true)?;
            encode_one(sink, inner)
        }
        None => encode_bool(sink, false),
    }
}

/// Decode an `Optional<T>`.
pub fn decode_option<So, T, F>(src: &mut So, mut decode_one: F) -> Result<Option<T>, XdrError>
where
    So: XdrSource + ?Sized,
    F: FnMut(&mut So) -> Result<T, XdrError>,
{
    if decode_bool(src)? {
        Ok(Some(decode_one(src)?))
    } else {
        Ok(None)
    }
}

/// Encode a variable-length array: length word then `N × T`.
pub fn encode_var_array<S, T, F>(sink: &mut S, items: &[T], mut encode_one: F) -> Result<(), XdrError>
where
    S: XdrSink + ?Sized,
    F: FnMut(&mut S, &T) -> Result<(), XdrError>,
{
    sink.put_word(items.len() as u32)?;
    for item in items {
        encode_one(sink, item)?;
    }
    Ok(())
}

/// Decode a variable-length array bounded by `max` elements.
pub fn decode_var_array<So, T, F>(
    src: &mut So,
    max: u32,
    mut decode_one: F,
) -> Result<Vec<T>, XdrError>
where
    So: XdrSource + ?Sized,
    F: FnMut(&mut So) -> Result<T, XdrError>,
{
    let len = src.get_word()?;
    if len > max {
        return Err(XdrError::ArrayOverflow { got: len, max });
    }
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        out.push(decode_one(src)?);
    }
    Ok(out)
}
