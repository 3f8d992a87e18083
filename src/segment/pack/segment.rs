//! In-memory and on-disk representation of a pack segment.
//!
//! ```text
//! header | u64 BE body length | bincode body | u32 BE crc32(body)
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::{Deref, Range};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use log::debug;
use memmap2::{Mmap, MmapOptions};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::analysis::{FieldCatalog, StoredValue};
use crate::error::{Result, StrataError};
use crate::segment::header::SegmentHeader;
use crate::segment::pack::PackFormat;
use crate::segment::pack::postings::{ChunkedPostingsIterator, TermPostings};
use crate::segment::{EmptyPostingsIterator, PostingsIterator, Segment, SegmentFormat};

/// Everything a pack segment stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PackData {
    pub chunk_factor: u32,
    pub fields: FieldCatalog,
    pub doc_ids: Vec<String>,
    pub stored: Vec<Vec<(u16, StoredValue)>>,
    /// Term dictionary per field id.
    pub terms: Vec<BTreeMap<Vec<u8>, TermPostings>>,
}

impl PackData {
    fn validate(&self, format: PackFormat) -> Result<()> {
        if self.chunk_factor == 0 {
            return Err(StrataError::corrupt_segment("chunk factor is zero"));
        }
        if self.doc_ids.len() != self.stored.len() {
            return Err(StrataError::corrupt_segment(format!(
                "{} document ids but {} stored entries",
                self.doc_ids.len(),
                self.stored.len()
            )));
        }
        if self.terms.len() != self.fields.len() {
            return Err(StrataError::corrupt_segment(format!(
                "{} term dictionaries for {} fields",
                self.terms.len(),
                self.fields.len()
            )));
        }
        if self
            .stored
            .iter()
            .flatten()
            .any(|(field, _)| !self.fields.contains(*field))
        {
            return Err(StrataError::corrupt_segment(
                "stored value references an unknown field",
            ));
        }

        let doc_count = self.doc_ids.len() as u64;
        for postings in self.terms.iter().flat_map(|terms| terms.values()) {
            match postings {
                TermPostings::SingleHit { doc } => {
                    if !format.single_hit() {
                        return Err(StrataError::corrupt_segment(format!(
                            "single-hit postings in a version {} segment",
                            format.version()
                        )));
                    }
                    if *doc as u64 >= doc_count {
                        return Err(StrataError::corrupt_segment(
                            "single-hit posting past the end of the segment",
                        ));
                    }
                }
                TermPostings::List(list) => list.validate(doc_count, self.chunk_factor)?,
            }
        }
        Ok(())
    }
}

/// Encoded body bytes: owned after a build, mapped after an open.
#[derive(Debug)]
enum Body {
    Owned(Vec<u8>),
    Mapped { mmap: Mmap, range: Range<usize> },
}

impl Deref for Body {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Body::Owned(bytes) => bytes,
            Body::Mapped { mmap, range } => &mmap[range.clone()],
        }
    }
}

/// A pack segment, either freshly built or opened from disk.
#[derive(Debug)]
pub struct PackSegment {
    format: PackFormat,
    data: PackData,
    body: Body,
}

impl PackSegment {
    pub(crate) fn from_data(format: PackFormat, data: PackData) -> Result<Self> {
        let body = bincode::serialize(&data)
            .map_err(|e| StrataError::serialization(format!("pack segment body: {e}")))?;
        Ok(PackSegment {
            format,
            data,
            body: Body::Owned(body),
        })
    }

    fn header(&self) -> SegmentHeader {
        SegmentHeader::new(self.format.segment_type(), self.format.version())
    }

    /// Documents per postings chunk.
    pub fn chunk_factor(&self) -> u32 {
        self.data.chunk_factor
    }

    /// Write the full file image, returning the bytes written.
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let header_len = self.header().write(writer)?;
        writer.write_u64::<BigEndian>(self.body.len() as u64)?;
        writer.write_all(&self.body)?;
        writer.write_u32::<BigEndian>(crc32fast::hash(&self.body))?;
        Ok((header_len + 8 + self.body.len() + 4) as u64)
    }

    /// Open and verify a pack segment file written by `format`.
    pub(crate) fn open(format: PackFormat, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(StrataError::corrupt_segment(format!(
                "{} is empty",
                path.display()
            )));
        }

        // The file is never written once published.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let (header, offset) = SegmentHeader::read(&mmap)?;
        if header.segment_type != format.segment_type() || header.version != format.version() {
            return Err(StrataError::corrupt_segment(format!(
                "{} holds {} v{}, expected {} v{}",
                path.display(),
                header.segment_type,
                header.version,
                format.segment_type(),
                format.version()
            )));
        }

        let body_start = offset + 8;
        if len < body_start {
            return Err(StrataError::corrupt_segment("truncated body length"));
        }
        let body_len = BigEndian::read_u64(&mmap[offset..body_start]) as usize;
        let body_end = body_start
            .checked_add(body_len)
            .filter(|&end| end.checked_add(4) == Some(len))
            .ok_or_else(|| {
                StrataError::corrupt_segment(format!(
                    "body length {body_len} does not match file length {len}"
                ))
            })?;

        let body = &mmap[body_start..body_end];
        let checksum = BigEndian::read_u32(&mmap[body_end..]);
        if crc32fast::hash(body) != checksum {
            return Err(StrataError::corrupt_segment(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        let data: PackData = bincode::deserialize(body)
            .map_err(|e| StrataError::corrupt_segment(format!("invalid body: {e}")))?;
        data.validate(format)?;

        debug!(
            "Opened {} v{} segment {} ({} docs)",
            format.segment_type(),
            format.version(),
            path.display(),
            data.doc_ids.len()
        );

        Ok(PackSegment {
            format,
            data,
            body: Body::Mapped {
                mmap,
                range: body_start..body_end,
            },
        })
    }

    fn stored_entry(&self, doc: u64) -> Result<&Vec<(u16, StoredValue)>> {
        usize::try_from(doc)
            .ok()
            .and_then(|doc| self.data.stored.get(doc))
            .ok_or(StrataError::DocumentNotFound(doc))
    }
}

impl Segment for PackSegment {
    fn segment_type(&self) -> &str {
        self.format.segment_type()
    }

    fn version(&self) -> u32 {
        self.format.version()
    }

    fn doc_count(&self) -> u64 {
        self.data.doc_ids.len() as u64
    }

    fn fields(&self) -> &FieldCatalog {
        &self.data.fields
    }

    fn terms(&self, field: u16) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .data
            .terms
            .get(field as usize)
            .map(|terms| terms.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn dictionary_entry(&self, field: u16, term: &[u8]) -> Result<Option<u64>> {
        Ok(self
            .data
            .terms
            .get(field as usize)
            .and_then(|terms| terms.get(term))
            .map(TermPostings::doc_freq))
    }

    fn postings<'a>(
        &'a self,
        field: u16,
        term: &[u8],
        except: Option<&RoaringBitmap>,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator + 'a>> {
        let Some(postings) = self
            .data
            .terms
            .get(field as usize)
            .and_then(|terms| terms.get(term))
        else {
            return Ok(Box::new(EmptyPostingsIterator));
        };

        match postings {
            TermPostings::SingleHit { doc } => {
                if except.is_some_and(|except| except.contains(*doc)) {
                    return Ok(Box::new(EmptyPostingsIterator));
                }
                self.format.postings_from_single_hit(
                    *doc as u64,
                    include_freq_norm,
                    include_locations,
                )
            }
            TermPostings::List(list) => Ok(Box::new(ChunkedPostingsIterator::new(
                list,
                self.data.chunk_factor,
                except,
                include_freq_norm,
                include_locations,
            )?)),
        }
    }

    fn document_id(&self, doc: u64) -> Result<&str> {
        usize::try_from(doc)
            .ok()
            .and_then(|doc| self.data.doc_ids.get(doc))
            .map(String::as_str)
            .ok_or(StrataError::DocumentNotFound(doc))
    }

    fn stored_fields(&self, doc: u64) -> Result<Vec<(u16, StoredValue)>> {
        Ok(self.stored_entry(doc)?.clone())
    }

    fn size_in_bytes(&self) -> u64 {
        (self.header().encoded_len() + 8 + self.body.len() + 4) as u64
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let written = write_atomically(path, |writer| self.write_to(writer))?;
        debug!("Persisted segment {} ({written} bytes)", path.display());
        Ok(())
    }
}

/// Write a file through a temporary sibling, renaming it into place only if
/// `write` succeeds.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<u64>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)?;

    let written = {
        let mut writer = BufWriter::new(temp.as_file());
        let written = write(&mut writer)?;
        writer.flush()?;
        written
    };
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StrataError::Io(e.error))?;
    Ok(written)
}
