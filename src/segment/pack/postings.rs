//! Chunked postings lists and their iterators.
//!
//! A postings list is a roaring bitmap of document numbers plus one chunk per
//! `chunk_factor` postings. Each chunk carries two blocks:
//!
//! ```text
//! freq/norm block:  (varint freq | varint norm bits | varint location bytes)*
//! location block:   (varint field | varint pos | varint start | varint end
//!                    | varint n | varint array position * n)*
//! ```
//!
//! The location length in the freq/norm block lets readers step over location
//! bytes they were not asked for.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::segment::{Location, Posting, PostingsIterator};
use crate::util::varint::{VarintCursor, put_f32, put_u64};

/// Marks a consumed single-hit iterator.
pub const SINGLE_HIT_FINISHED: u64 = u64::MAX;

/// How a term's postings are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum TermPostings {
    /// The term occurs once, in one document, with unit norm and no locations.
    SingleHit { doc: u32 },
    List(PostingsList),
}

impl TermPostings {
    /// Encode `postings`, which must be in strictly ascending document order.
    pub(crate) fn encode(
        postings: &[Posting],
        chunk_factor: u32,
        allow_single_hit: bool,
    ) -> Result<TermPostings> {
        if allow_single_hit
            && let [posting] = postings
            && is_single_hit(posting)
        {
            return Ok(TermPostings::SingleHit {
                doc: doc_number(posting.doc)?,
            });
        }
        PostingsList::encode(postings, chunk_factor).map(TermPostings::List)
    }

    /// Number of documents containing the term.
    pub(crate) fn doc_freq(&self) -> u64 {
        match self {
            TermPostings::SingleHit { .. } => 1,
            TermPostings::List(list) => list.doc_freq,
        }
    }
}

fn is_single_hit(posting: &Posting) -> bool {
    posting.frequency == 1 && posting.norm.to_bits() == 1.0f32.to_bits() && posting.locations.is_empty()
}

fn doc_number(doc: u64) -> Result<u32> {
    u32::try_from(doc)
        .map_err(|_| StrataError::construction(format!("document number {doc} exceeds u32")))
}

/// One block of `chunk_factor` postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PostingsChunk {
    pub freq_norm: Vec<u8>,
    pub locations: Vec<u8>,
}

/// A term's postings in chunked form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PostingsList {
    pub doc_freq: u64,
    /// Portable roaring serialization of the document numbers.
    pub docs: Vec<u8>,
    pub chunks: Vec<PostingsChunk>,
}

impl PostingsList {
    pub(crate) fn encode(postings: &[Posting], chunk_factor: u32) -> Result<PostingsList> {
        if chunk_factor == 0 {
            return Err(StrataError::construction("chunk factor must be positive"));
        }

        let mut bitmap = RoaringBitmap::new();
        let mut chunks = Vec::with_capacity(postings.len().div_ceil(chunk_factor as usize));
        for block in postings.chunks(chunk_factor as usize) {
            let mut chunk = PostingsChunk {
                freq_norm: Vec::new(),
                locations: Vec::new(),
            };
            for posting in block {
                let doc = doc_number(posting.doc)?;
                if bitmap.max().is_some_and(|max| max >= doc) {
                    return Err(StrataError::construction(format!(
                        "postings out of order at document {doc}"
                    )));
                }
                bitmap.insert(doc);

                let before = chunk.locations.len();
                for location in &posting.locations {
                    put_u64(&mut chunk.locations, location.field as u64);
                    put_u64(&mut chunk.locations, location.position);
                    put_u64(&mut chunk.locations, location.start);
                    put_u64(&mut chunk.locations, location.end);
                    put_u64(&mut chunk.locations, location.array_positions.len() as u64);
                    for &array_position in &location.array_positions {
                        put_u64(&mut chunk.locations, array_position);
                    }
                }

                put_u64(&mut chunk.freq_norm, posting.frequency);
                put_f32(&mut chunk.freq_norm, posting.norm);
                put_u64(&mut chunk.freq_norm, (chunk.locations.len() - before) as u64);
            }
            chunks.push(chunk);
        }

        let mut docs = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut docs)?;

        Ok(PostingsList {
            doc_freq: postings.len() as u64,
            docs,
            chunks,
        })
    }

    /// Decode the document bitmap.
    pub(crate) fn doc_bitmap(&self) -> Result<RoaringBitmap> {
        RoaringBitmap::deserialize_from(&self.docs[..])
            .map_err(|e| StrataError::corrupt_segment(format!("invalid postings bitmap: {e}")))
    }

    /// Check the list against a segment of `doc_count` documents.
    pub(crate) fn validate(&self, doc_count: u64, chunk_factor: u32) -> Result<()> {
        let bitmap = self.doc_bitmap()?;
        if bitmap.len() != self.doc_freq || self.doc_freq == 0 {
            return Err(StrataError::corrupt_segment(format!(
                "postings list claims {} documents, bitmap holds {}",
                self.doc_freq,
                bitmap.len()
            )));
        }
        if bitmap.max().is_some_and(|max| max as u64 >= doc_count) {
            return Err(StrataError::corrupt_segment(
                "postings reference a document past the end of the segment",
            ));
        }
        let expected_chunks = (self.doc_freq as usize).div_ceil(chunk_factor as usize);
        if self.chunks.len() != expected_chunks {
            return Err(StrataError::corrupt_segment(format!(
                "expected {expected_chunks} postings chunks, found {}",
                self.chunks.len()
            )));
        }
        Ok(())
    }
}

fn corrupt(what: &'static str) -> impl FnOnce(StrataError) -> StrataError {
    move |e| StrataError::corrupt_segment(format!("{what}: {e}"))
}

fn decode_locations(mut bytes: &[u8]) -> Result<Vec<Location>> {
    let mut locations = Vec::new();
    while !bytes.is_empty() {
        let mut cursor = VarintCursor::new(bytes);
        let field = cursor.read_u64().map_err(corrupt("location field"))?;
        let field = u16::try_from(field)
            .map_err(|_| StrataError::corrupt_segment(format!("location field {field} out of range")))?;
        let position = cursor.read_u64().map_err(corrupt("location position"))?;
        let start = cursor.read_u64().map_err(corrupt("location start"))?;
        let end = cursor.read_u64().map_err(corrupt("location end"))?;
        let count = cursor.read_u64().map_err(corrupt("array position count"))?;
        let mut array_positions = Vec::new();
        for _ in 0..count {
            array_positions.push(cursor.read_u64().map_err(corrupt("array position"))?);
        }
        locations.push(Location {
            field,
            position,
            start,
            end,
            array_positions,
        });
        bytes = cursor.remaining();
    }
    Ok(locations)
}

/// Iterates a [`PostingsList`], decoding one chunk at a time.
pub(crate) struct ChunkedPostingsIterator<'a> {
    chunks: &'a [PostingsChunk],
    docs: roaring::bitmap::IntoIter,
    except: Option<RoaringBitmap>,
    chunk_factor: usize,
    rank: usize,
    remaining: usize,
    freq_norm: VarintCursor<'a>,
    locations: &'a [u8],
    locations_offset: usize,
    include_freq_norm: bool,
    include_locations: bool,
}

impl<'a> ChunkedPostingsIterator<'a> {
    pub(crate) fn new(
        list: &'a PostingsList,
        chunk_factor: u32,
        except: Option<&RoaringBitmap>,
        include_freq_norm: bool,
        include_locations: bool,
    ) -> Result<Self> {
        let bitmap = list.doc_bitmap()?;
        let remaining = bitmap.len() as usize;
        Ok(ChunkedPostingsIterator {
            chunks: &list.chunks,
            docs: bitmap.into_iter(),
            except: except.cloned(),
            chunk_factor: chunk_factor.max(1) as usize,
            rank: 0,
            remaining,
            freq_norm: VarintCursor::new(&[]),
            locations: &[],
            locations_offset: 0,
            include_freq_norm,
            include_locations,
        })
    }

    fn is_excepted(&self, doc: u32) -> bool {
        self.except.as_ref().is_some_and(|except| except.contains(doc))
    }
}

impl PostingsIterator for ChunkedPostingsIterator<'_> {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        let decode = self.include_freq_norm || self.include_locations;
        loop {
            let Some(doc) = self.docs.next() else {
                return Ok(None);
            };
            let rank = self.rank;
            self.rank += 1;
            self.remaining = self.remaining.saturating_sub(1);

            if !decode {
                if self.is_excepted(doc) {
                    continue;
                }
                return Ok(Some(Posting::doc_only(doc as u64)));
            }

            if rank % self.chunk_factor == 0 {
                let chunk = self.chunks.get(rank / self.chunk_factor).ok_or_else(|| {
                    StrataError::corrupt_segment(format!("missing postings chunk for rank {rank}"))
                })?;
                self.freq_norm = VarintCursor::new(&chunk.freq_norm);
                self.locations = &chunk.locations;
                self.locations_offset = 0;
            }

            let frequency = self.freq_norm.read_u64().map_err(corrupt("frequency"))?;
            let norm = self.freq_norm.read_f32().map_err(corrupt("norm"))?;
            let location_len =
                self.freq_norm.read_u64().map_err(corrupt("location length"))? as usize;
            let start = self.locations_offset;
            let end = start
                .checked_add(location_len)
                .filter(|&end| end <= self.locations.len())
                .ok_or_else(|| StrataError::corrupt_segment("location block overrun"))?;
            self.locations_offset = end;

            if self.is_excepted(doc) {
                continue;
            }

            let locations = if self.include_locations {
                decode_locations(&self.locations[start..end])?
            } else {
                Vec::new()
            };

            let (frequency, norm) = if self.include_freq_norm {
                (frequency, norm)
            } else {
                (0, 0.0)
            };
            return Ok(Some(Posting {
                doc: doc as u64,
                frequency,
                norm,
                locations,
            }));
        }
    }

    fn size_hint(&self) -> usize {
        self.remaining
    }
}

/// Postings over an arbitrary document bitmap. Every posting has frequency 1
/// and norm 1.0 when frequency and norm are requested, and no locations.
pub(crate) struct BitmapPostingsIterator {
    docs: roaring::bitmap::IntoIter,
    remaining: usize,
    include_freq_norm: bool,
}

impl BitmapPostingsIterator {
    pub(crate) fn new(bitmap: &RoaringBitmap, include_freq_norm: bool) -> Self {
        BitmapPostingsIterator {
            docs: bitmap.clone().into_iter(),
            remaining: bitmap.len() as usize,
            include_freq_norm,
        }
    }
}

impl PostingsIterator for BitmapPostingsIterator {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        Ok(self.docs.next().map(|doc| {
            self.remaining = self.remaining.saturating_sub(1);
            unit_posting(doc as u64, self.include_freq_norm)
        }))
    }

    fn size_hint(&self) -> usize {
        self.remaining
    }
}

/// Postings holding one document.
pub(crate) struct SingleHitPostingsIterator {
    doc: u64,
    include_freq_norm: bool,
}

impl SingleHitPostingsIterator {
    pub(crate) fn new(doc: u64, include_freq_norm: bool) -> Self {
        SingleHitPostingsIterator {
            doc,
            include_freq_norm,
        }
    }
}

impl PostingsIterator for SingleHitPostingsIterator {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        if self.doc == SINGLE_HIT_FINISHED {
            return Ok(None);
        }
        let doc = std::mem::replace(&mut self.doc, SINGLE_HIT_FINISHED);
        Ok(Some(unit_posting(doc, self.include_freq_norm)))
    }

    fn advance(&mut self, target: u64) -> Result<Option<Posting>> {
        if self.doc < target {
            self.doc = SINGLE_HIT_FINISHED;
        }
        self.next_posting()
    }

    fn size_hint(&self) -> usize {
        usize::from(self.doc != SINGLE_HIT_FINISHED)
    }
}

fn unit_posting(doc: u64, include_freq_norm: bool) -> Posting {
    if include_freq_norm {
        Posting {
            doc,
            frequency: 1,
            norm: 1.0,
            locations: Vec::new(),
        }
    } else {
        Posting::doc_only(doc)
    }
}
