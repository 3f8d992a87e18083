//! Type-tagged key/value rows for the inverted index.
//!
//! Every structural element of the index is stored as one key/value pair in an
//! ordered store. The first key byte names the row type, so rows of one type
//! (and, within a type, rows sharing a field id or term) sort next to each other
//! and can be read with a prefix scan.
//!
//! | Row | Key | Value |
//! |---|---|---|
//! | [`VersionRow`] | `v` | version byte |
//! | [`FieldRow`] | `f` field | name `0xFF` |
//! | [`DictionaryRow`] | `d` field term | varint count |
//! | [`TermFrequencyRow`] | `t` field term `0xFF` doc | varint freq, varint norm bits, term vectors |
//! | [`BackIndexRow`] | `b` doc | protobuf term/store entries |
//! | [`StoredRow`] | `s` doc `0xFF` field varint* | kind byte, raw bytes |
//! | [`InternalRow`] | `i` key | raw bytes |
//!
//! Field ids are two bytes, little-endian.
//!
//! # Examples
//!
//! ```
//! use strata::row::{FieldRow, KeyValueRow, Row};
//!
//! let row = FieldRow::new(513, "style");
//! assert_eq!(row.key(), vec![b'f', 0x01, 0x02]);
//!
//! let parsed = Row::parse(&row.key(), &row.value()).unwrap();
//! assert_eq!(parsed, Row::Field(row));
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, StrataError};

pub mod back_index;
pub mod dictionary;
pub mod field;
pub mod internal;
pub mod stored;
pub mod term_frequency;
pub mod version;

pub use back_index::{BackIndexRow, BackIndexStoreEntry, BackIndexTermEntry};
pub use dictionary::DictionaryRow;
pub use field::FieldRow;
pub use internal::InternalRow;
pub use stored::StoredRow;
pub use term_frequency::{TermFrequencyRow, TermVector};
pub use version::VersionRow;

/// Separator between variable-length key segments.
///
/// `0xFF` never occurs in UTF-8, so it cannot begin a field name, term or
/// document id that follows it.
pub const BYTE_SEPARATOR: u8 = 0xFF;

/// The row types, keyed by their leading tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowType {
    Version,
    Field,
    Dictionary,
    TermFrequency,
    BackIndex,
    Stored,
    Internal,
}

impl RowType {
    /// The leading key byte for this row type.
    pub const fn tag(self) -> u8 {
        match self {
            RowType::Version => b'v',
            RowType::Field => b'f',
            RowType::Dictionary => b'd',
            RowType::TermFrequency => b't',
            RowType::BackIndex => b'b',
            RowType::Stored => b's',
            RowType::Internal => b'i',
        }
    }

    /// Resolve a tag byte.
    pub fn from_tag(tag: u8) -> Option<RowType> {
        match tag {
            b'v' => Some(RowType::Version),
            b'f' => Some(RowType::Field),
            b'd' => Some(RowType::Dictionary),
            b't' => Some(RowType::TermFrequency),
            b'b' => Some(RowType::BackIndex),
            b's' => Some(RowType::Stored),
            b'i' => Some(RowType::Internal),
            _ => None,
        }
    }

    /// Single-byte prefix covering every row of this type.
    pub fn prefix(self) -> [u8; 1] {
        [self.tag()]
    }
}

/// Encoding and decoding shared by every row type.
pub trait KeyValueRow: Sized {
    /// Row type written as the first key byte.
    const ROW_TYPE: RowType;

    /// Exact length of the encoded key.
    fn key_size(&self) -> usize;

    /// Append the encoded key to `buf`.
    fn write_key(&self, buf: &mut Vec<u8>);

    /// Encode the value.
    fn value(&self) -> Vec<u8>;

    /// Decode a row of this type. Fails unless `key` starts with
    /// [`ROW_TYPE`](Self::ROW_TYPE)'s tag.
    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self>;

    /// Encode the key.
    fn key(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.key_size());
        self.write_key(&mut buf);
        buf
    }
}

/// A decoded row of any type.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Version(VersionRow),
    Field(FieldRow),
    Dictionary(DictionaryRow),
    TermFrequency(TermFrequencyRow),
    BackIndex(BackIndexRow),
    Stored(StoredRow),
    Internal(InternalRow),
}

impl Row {
    /// Decode a key/value pair by dispatching on the leading key byte.
    pub fn parse(key: &[u8], value: &[u8]) -> Result<Row> {
        let Some(&tag) = key.first() else {
            return Err(StrataError::malformed_row("empty key"));
        };
        let row_type = RowType::from_tag(tag).ok_or(StrataError::UnknownRowType(tag))?;

        Ok(match row_type {
            RowType::Version => Row::Version(VersionRow::parse_kv(key, value)?),
            RowType::Field => Row::Field(FieldRow::parse_kv(key, value)?),
            RowType::Dictionary => Row::Dictionary(DictionaryRow::parse_kv(key, value)?),
            RowType::TermFrequency => {
                Row::TermFrequency(TermFrequencyRow::parse_kv(key, value)?)
            }
            RowType::BackIndex => Row::BackIndex(BackIndexRow::parse_kv(key, value)?),
            RowType::Stored => Row::Stored(StoredRow::parse_kv(key, value)?),
            RowType::Internal => Row::Internal(InternalRow::parse_kv(key, value)?),
        })
    }

    /// The row's type.
    pub fn row_type(&self) -> RowType {
        match self {
            Row::Version(_) => RowType::Version,
            Row::Field(_) => RowType::Field,
            Row::Dictionary(_) => RowType::Dictionary,
            Row::TermFrequency(_) => RowType::TermFrequency,
            Row::BackIndex(_) => RowType::BackIndex,
            Row::Stored(_) => RowType::Stored,
            Row::Internal(_) => RowType::Internal,
        }
    }

    /// Encode the key.
    pub fn key(&self) -> Vec<u8> {
        match self {
            Row::Version(row) => row.key(),
            Row::Field(row) => row.key(),
            Row::Dictionary(row) => row.key(),
            Row::TermFrequency(row) => row.key(),
            Row::BackIndex(row) => row.key(),
            Row::Stored(row) => row.key(),
            Row::Internal(row) => row.key(),
        }
    }

    /// Encode the value.
    pub fn value(&self) -> Vec<u8> {
        match self {
            Row::Version(row) => row.value(),
            Row::Field(row) => row.value(),
            Row::Dictionary(row) => row.value(),
            Row::TermFrequency(row) => row.value(),
            Row::BackIndex(row) => row.value(),
            Row::Stored(row) => row.value(),
            Row::Internal(row) => row.value(),
        }
    }
}

macro_rules! impl_from_row {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Row {
                fn from(row: $ty) -> Self {
                    Row::$variant(row)
                }
            }
        )*
    };
}

impl_from_row!(
    Version => VersionRow,
    Field => FieldRow,
    Dictionary => DictionaryRow,
    TermFrequency => TermFrequencyRow,
    BackIndex => BackIndexRow,
    Stored => StoredRow,
    Internal => InternalRow,
);

/// The key bytes after the tag, once the tag is checked against `row_type`.
pub(crate) fn key_body<'a>(key: &'a [u8], row_type: RowType, row: &str) -> Result<&'a [u8]> {
    match key.split_first() {
        Some((&tag, body)) if tag == row_type.tag() => Ok(body),
        Some((&tag, _)) => Err(StrataError::malformed_row(format!(
            "{row} row: unexpected tag {:?}",
            tag as char
        ))),
        None => Err(StrataError::malformed_row(format!("{row} row: empty key"))),
    }
}

/// Append a field id in its two-byte wire form.
pub(crate) fn put_field_id(buf: &mut Vec<u8>, field: u16) {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, field);
    buf.extend_from_slice(&bytes);
}

/// Read a two-byte field id at `offset`, naming `row` in the error.
pub(crate) fn read_field_id(bytes: &[u8], offset: usize, row: &str) -> Result<u16> {
    if bytes.len() < offset + 2 {
        return Err(StrataError::malformed_row(format!(
            "{row} row: missing field id"
        )));
    }
    Ok(LittleEndian::read_u16(&bytes[offset..offset + 2]))
}

/// Decode UTF-8 text from a row segment.
pub(crate) fn read_utf8(bytes: &[u8], row: &str, what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| StrataError::malformed_row(format!("{row} row: invalid {what}: {e}")))
}

/// Wrap a low-level decode failure as a malformed row.
pub(crate) fn malformed(row: &str, what: &str) -> impl FnOnce(StrataError) -> StrataError {
    let message = format!("{row} row: {what}");
    move |e| StrataError::malformed_row(format!("{message} ({e})"))
}
