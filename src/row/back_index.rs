//! Back-index rows: every term and stored entry a document owns.
//!
//! Deleting or reindexing a document starts here. The row lists each
//! `(term, field)` posting and each stored field the document wrote, so the
//! stale rows can be removed without scanning the store.
//!
//! The value is a protobuf record:
//!
//! ```text
//! message BackIndexTermEntry  { required string term = 1; required uint32 field = 2; }
//! message BackIndexStoreEntry { required uint32 field = 1; }
//! message BackIndexRowValue {
//!     repeated BackIndexTermEntry  termEntries   = 1;
//!     repeated BackIndexStoreEntry storedEntries = 2;
//! }
//! ```

use prost::Message;

use crate::error::{Result, StrataError};
use crate::row::{KeyValueRow, RowType, key_body, read_utf8};

/// A `(term, field)` posting owned by a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackIndexTermEntry {
    pub term: Vec<u8>,
    pub field: u32,
}

impl BackIndexTermEntry {
    pub fn new<T: Into<Vec<u8>>>(term: T, field: u16) -> Self {
        BackIndexTermEntry {
            term: term.into(),
            field: field as u32,
        }
    }
}

/// A stored field owned by a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackIndexStoreEntry {
    pub field: u32,
}

impl BackIndexStoreEntry {
    pub fn new(field: u16) -> Self {
        BackIndexStoreEntry {
            field: field as u32,
        }
    }
}

// Wire messages. Fields decode as optional; a missing one is rejected when
// converting to the public entries.
#[derive(Clone, PartialEq, Message)]
struct TermEntryMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    term: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    field: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
struct StoreEntryMessage {
    #[prost(uint32, optional, tag = "1")]
    field: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
struct BackIndexRowValue {
    #[prost(message, repeated, tag = "1")]
    term_entries: Vec<TermEntryMessage>,
    #[prost(message, repeated, tag = "2")]
    stored_entries: Vec<StoreEntryMessage>,
}

impl From<&BackIndexTermEntry> for TermEntryMessage {
    fn from(entry: &BackIndexTermEntry) -> Self {
        TermEntryMessage {
            term: Some(entry.term.clone()),
            field: Some(entry.field),
        }
    }
}

impl TryFrom<TermEntryMessage> for BackIndexTermEntry {
    type Error = StrataError;

    fn try_from(message: TermEntryMessage) -> Result<Self> {
        match (message.term, message.field) {
            (Some(term), Some(field)) => Ok(BackIndexTermEntry { term, field }),
            (None, _) => Err(StrataError::malformed_row(
                "back index row: term entry without a term",
            )),
            (_, None) => Err(StrataError::malformed_row(
                "back index row: term entry without a field",
            )),
        }
    }
}

impl TryFrom<StoreEntryMessage> for BackIndexStoreEntry {
    type Error = StrataError;

    fn try_from(message: StoreEntryMessage) -> Result<Self> {
        let field = message.field.ok_or_else(|| {
            StrataError::malformed_row("back index row: store entry without a field")
        })?;
        Ok(BackIndexStoreEntry { field })
    }
}

/// Reverse index from a document to the rows it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackIndexRow {
    pub doc_id: String,
    pub term_entries: Vec<BackIndexTermEntry>,
    pub stored_entries: Vec<BackIndexStoreEntry>,
}

impl BackIndexRow {
    pub fn new<S: Into<String>>(
        doc_id: S,
        term_entries: Vec<BackIndexTermEntry>,
        stored_entries: Vec<BackIndexStoreEntry>,
    ) -> Self {
        BackIndexRow {
            doc_id: doc_id.into(),
            term_entries,
            stored_entries,
        }
    }

    /// Key of the back-index row for `doc_id`.
    pub fn key_for(doc_id: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + doc_id.len());
        buf.push(Self::ROW_TYPE.tag());
        buf.extend_from_slice(doc_id.as_bytes());
        buf
    }

    /// Field ids checked against 16 bits, since the wire form is 32-bit.
    pub fn term_fields(&self) -> Result<Vec<(&[u8], u16)>> {
        self.term_entries
            .iter()
            .map(|entry| Ok((entry.term.as_slice(), narrow_field(entry.field)?)))
            .collect()
    }

    /// Stored field ids, checked against 16 bits.
    pub fn stored_fields(&self) -> Result<Vec<u16>> {
        self.stored_entries
            .iter()
            .map(|entry| narrow_field(entry.field))
            .collect()
    }
}

fn narrow_field(field: u32) -> Result<u16> {
    u16::try_from(field).map_err(|_| {
        StrataError::malformed_row(format!("back index row: field {field} out of range"))
    })
}

impl KeyValueRow for BackIndexRow {
    const ROW_TYPE: RowType = RowType::BackIndex;

    fn key_size(&self) -> usize {
        1 + self.doc_id.len()
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
        buf.extend_from_slice(self.doc_id.as_bytes());
    }

    fn value(&self) -> Vec<u8> {
        let message = BackIndexRowValue {
            term_entries: self.term_entries.iter().map(TermEntryMessage::from).collect(),
            stored_entries: self
                .stored_entries
                .iter()
                .map(|entry| StoreEntryMessage {
                    field: Some(entry.field),
                })
                .collect(),
        };
        message.encode_to_vec()
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        let body = key_body(key, Self::ROW_TYPE, "back index")?;
        if body.is_empty() {
            return Err(StrataError::malformed_row(
                "back index row: missing document id",
            ));
        }
        let doc_id = read_utf8(body, "back index", "document id")?;

        let decoded = BackIndexRowValue::decode(value).map_err(|e| {
            StrataError::malformed_row(format!("back index row: invalid value ({e})"))
        })?;

        Ok(BackIndexRow {
            doc_id,
            term_entries: decoded
                .term_entries
                .into_iter()
                .map(BackIndexTermEntry::try_from)
                .collect::<Result<_>>()?,
            stored_entries: decoded
                .stored_entries
                .into_iter()
                .map(BackIndexStoreEntry::try_from)
                .collect::<Result<_>>()?,
        })
    }
}
