//! Variable-length integer encoding utilities.
//!
//! Unsigned integers are written seven bits at a time, least-significant group
//! first, with the high bit of every byte except the last set as a continuation
//! flag. Term norms ride on the same encoding: the 32-bit IEEE-754 bit pattern of
//! an `f32` is encoded as an unsigned integer, which keeps four bytes of precision
//! without a separate float path.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, StrataError};

/// Maximum encoded length of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encoded_len(value));
    put_u64(&mut bytes, value);
    bytes
}

/// Append the variable-length encoding of `value` to `buf`.
pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        buf.push(byte);

        if val == 0 {
            break;
        }
    }
}

/// Number of bytes `encode_u64(value)` produces.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a u64 value from variable-length encoding.
///
/// Returns the value and the number of bytes consumed. Fails with
/// [`StrataError::Truncated`] when the input ends on a byte whose continuation
/// bit is set.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 || (shift == 63 && byte & 0x7F > 1) {
            return Err(StrataError::serialization("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(StrataError::Truncated)
}

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    encode_u64(value as u64)
}

/// Decode a u32 value from variable-length encoding.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    let value = u32::try_from(value).map_err(|_| StrataError::serialization("VarInt overflow"))?;
    Ok((value, read))
}

/// Encode an f32 through its 32-bit IEEE-754 bit pattern.
pub fn encode_f32(value: f32) -> Vec<u8> {
    encode_u64(value.to_bits() as u64)
}

/// Append the encoding of an f32 bit pattern to `buf`.
pub fn put_f32(buf: &mut Vec<u8>, value: f32) {
    put_u64(buf, value.to_bits() as u64);
}

/// Decode an f32 previously written by [`encode_f32`].
pub fn decode_f32(bytes: &[u8]) -> Result<(f32, usize)> {
    let (bits, read) = decode_u32(bytes)?;
    Ok((f32::from_bits(bits), read))
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = match reader.read_u8() {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && shift > 0 => {
                return Err(StrataError::Truncated);
            }
            Err(e) => return Err(e.into()),
        };

        if shift >= 64 || (shift == 63 && byte & 0x7F > 1) {
            return Err(StrataError::serialization("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// A forward-only cursor over an encoded byte slice.
///
/// Row values and postings chunks are decoded through this cursor so every
/// read reports how much input is left instead of panicking on short slices.
#[derive(Debug, Clone)]
pub struct VarintCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> VarintCursor<'a> {
    /// Create a cursor at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        VarintCursor { buf, pos: 0 }
    }

    /// Read the next u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let (value, read) = decode_u64(&self.buf[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    /// Read the next u32, rejecting values that do not fit.
    pub fn read_u32(&mut self) -> Result<u32> {
        let (value, read) = decode_u32(&self.buf[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    /// Read the next f32 bit pattern.
    pub fn read_f32(&mut self) -> Result<f32> {
        let (value, read) = decode_f32(&self.buf[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unread remainder.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// A trait for types that can be encoded as variable-length integers.
pub trait VarInt: Sized {
    /// Encode this value as a variable-length integer.
    fn encode_varint(&self) -> Vec<u8>;

    /// Decode a variable-length integer from bytes.
    fn decode_varint(bytes: &[u8]) -> Result<(Self, usize)>;
}

impl VarInt for u32 {
    fn encode_varint(&self) -> Vec<u8> {
        encode_u32(*self)
    }

    fn decode_varint(bytes: &[u8]) -> Result<(Self, usize)> {
        decode_u32(bytes)
    }
}

impl VarInt for u64 {
    fn encode_varint(&self) -> Vec<u8> {
        encode_u64(*self)
    }

    fn decode_varint(bytes: &[u8]) -> Result<(Self, usize)> {
        decode_u64(bytes)
    }
}

impl VarInt for f32 {
    fn encode_varint(&self) -> Vec<u8> {
        encode_f32(*self)
    }

    fn decode_varint(bytes: &[u8]) -> Result<(Self, usize)> {
        decode_f32(bytes)
    }
}
