//! The `(type, version)` header at the start of every persisted segment.
//!
//! ```text
//! u8 type length | type bytes (UTF-8) | u32 big-endian version
//! ```

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, StrataError};

/// Largest possible encoded header.
pub const MAX_HEADER_LEN: usize = 1 + u8::MAX as usize + 4;

/// Identifies the format that wrote a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentHeader {
    pub segment_type: String,
    pub version: u32,
}

impl SegmentHeader {
    pub fn new<S: Into<String>>(segment_type: S, version: u32) -> Self {
        SegmentHeader {
            segment_type: segment_type.into(),
            version,
        }
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + self.segment_type.len() + 4
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let type_len = u8::try_from(self.segment_type.len()).map_err(|_| {
            StrataError::invalid_config(format!(
                "segment type tag too long: {} bytes",
                self.segment_type.len()
            ))
        })?;
        if type_len == 0 {
            return Err(StrataError::invalid_config("segment type tag is empty"));
        }
        writer.write_u8(type_len)?;
        writer.write_all(self.segment_type.as_bytes())?;
        writer.write_u32::<BigEndian>(self.version)?;
        Ok(self.encoded_len())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write(&mut buf)?;
        Ok(buf)
    }

    /// Decode a header from the start of `bytes`, returning it with the number
    /// of bytes consumed.
    pub fn read(bytes: &[u8]) -> Result<(SegmentHeader, usize)> {
        let mut reader = bytes;
        let header = Self::read_from(&mut reader)?;
        Ok((header, bytes.len() - reader.len()))
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<SegmentHeader> {
        let truncated = |_| StrataError::corrupt_segment("truncated segment header");

        let type_len = reader.read_u8().map_err(truncated)? as usize;
        if type_len == 0 {
            return Err(StrataError::corrupt_segment("empty segment type tag"));
        }
        let mut type_bytes = vec![0u8; type_len];
        reader.read_exact(&mut type_bytes).map_err(truncated)?;
        let segment_type = String::from_utf8(type_bytes)
            .map_err(|e| StrataError::corrupt_segment(format!("invalid segment type tag: {e}")))?;
        let version = reader.read_u32::<BigEndian>().map_err(truncated)?;

        Ok(SegmentHeader {
            segment_type,
            version,
        })
    }
}
