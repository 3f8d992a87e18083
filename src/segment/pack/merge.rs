//! Merging segments into a pack segment, and checking the result.

use std::collections::BTreeSet;
use std::path::Path;

use log::{debug, info, warn};
use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::analysis::FieldCatalog;
use crate::error::{Result, StrataError};
use crate::segment::pack::PackFormat;
use crate::segment::pack::builder::PackBuilder;
use crate::segment::pack::segment::{PackSegment, write_atomically};
use crate::segment::stats::{MergeEvent, StatsReporter};
use crate::segment::{CancelToken, DOC_NUM_DROPPED, Segment, live_doc_count};

fn is_dropped(drops: Option<&RoaringBitmap>, doc: u64) -> bool {
    drops.is_some_and(|drops| u32::try_from(doc).is_ok_and(|doc| drops.contains(doc)))
}

/// Merge `segments` into `path`. Documents keep their relative order: all
/// live documents of the first input, then the second, and so on.
pub(crate) fn merge(
    format: PackFormat,
    segments: &[&dyn Segment],
    drops: &[Option<RoaringBitmap>],
    path: &Path,
    chunk_factor: u32,
    cancel: &CancelToken,
    stats: &dyn StatsReporter,
) -> Result<(Vec<Vec<u64>>, u64)> {
    if drops.len() != segments.len() {
        return Err(StrataError::construction(format!(
            "{} deletion bitmaps for {} segments",
            drops.len(),
            segments.len()
        )));
    }
    if path.exists() {
        return Err(StrataError::construction(format!(
            "merge destination {} already exists",
            path.display()
        )));
    }
    info!(
        "Merging {} segments into {} (chunk factor {chunk_factor})",
        segments.len(),
        path.display()
    );

    // Union of the input catalogs, in first-seen order.
    let mut fields = FieldCatalog::new();
    let mut field_maps = Vec::with_capacity(segments.len());
    for segment in segments {
        let map = segment
            .fields()
            .iter()
            .map(|(_, name)| fields.add(name))
            .collect::<Result<Vec<u16>>>()?;
        field_maps.push(map);
    }
    let translate = |input: usize, field: u16| -> Result<u16> {
        field_maps[input].get(field as usize).copied().ok_or_else(|| {
            StrataError::corrupt_segment(format!("input {input} uses unknown field id {field}"))
        })
    };

    let mut builder = PackBuilder::new(fields.clone(), chunk_factor, format.single_hit())?;

    let mut remaps = Vec::with_capacity(segments.len());
    for (input, segment) in segments.iter().enumerate() {
        let drop = drops[input].as_ref();
        let doc_count = segment.doc_count();
        let mut remap = Vec::with_capacity(doc_count as usize);
        let mut dropped = 0;
        for doc in 0..doc_count {
            cancel.checkpoint("merge")?;
            if is_dropped(drop, doc) {
                remap.push(DOC_NUM_DROPPED);
                dropped += 1;
                continue;
            }
            let stored = segment
                .stored_fields(doc)?
                .into_iter()
                .map(|(field, value)| Ok((translate(input, field)?, value)))
                .collect::<Result<Vec<_>>>()?;
            remap.push(builder.add_document(segment.document_id(doc)?.to_string(), stored)?);
        }
        stats.report(MergeEvent::DocumentsMerged(doc_count - dropped));
        stats.report(MergeEvent::DocumentsDropped(dropped));
        remaps.push(remap);
    }

    for (field, name) in fields.iter() {
        let sources: Vec<(usize, u16)> = segments
            .iter()
            .enumerate()
            .filter_map(|(input, segment)| segment.fields().id(name).map(|id| (input, id)))
            .collect();

        let mut terms = BTreeSet::new();
        for &(input, source_field) in &sources {
            terms.extend(segments[input].terms(source_field)?);
        }

        let mut merged_terms = 0;
        for term in terms {
            cancel.checkpoint("merge")?;
            let mut merged = Vec::new();
            // Inputs are visited in order and each remap is increasing, so
            // the merged postings come out sorted.
            for &(input, source_field) in &sources {
                let mut postings = segments[input].postings(
                    source_field,
                    &term,
                    drops[input].as_ref(),
                    true,
                    true,
                )?;
                while let Some(mut posting) = postings.next_posting()? {
                    posting.doc = remaps[input]
                        .get(posting.doc as usize)
                        .copied()
                        .filter(|&doc| doc != DOC_NUM_DROPPED)
                        .ok_or_else(|| {
                            StrataError::corrupt_segment(format!(
                                "input {input} returned deleted or unknown document {}",
                                posting.doc
                            ))
                        })?;
                    for location in &mut posting.locations {
                        location.field = translate(input, location.field)?;
                    }
                    merged.push(posting);
                }
            }
            if !merged.is_empty() {
                builder.insert_term(field, term, merged)?;
                merged_terms += 1;
            }
        }
        stats.report(MergeEvent::TermsMerged(merged_terms));
    }

    let doc_count = builder.doc_count();
    let segment = PackSegment::from_data(format, builder.finish()?)?;
    let written = write_atomically(path, |writer| {
        let written = segment.write_to(writer)?;
        cancel.check("merge")?;
        Ok(written)
    })?;
    stats.report(MergeEvent::BytesWritten(written));

    info!(
        "Merged {} segments into {} ({doc_count} docs, {written} bytes)",
        segments.len(),
        path.display()
    );
    Ok((remaps, doc_count))
}

/// Check `merged` against the inputs and deletion bitmaps it came from.
pub(crate) fn validate_merge(
    segments: &[&dyn Segment],
    drops: &[Option<RoaringBitmap>],
    merged: &dyn Segment,
) -> Result<()> {
    if drops.len() != segments.len() {
        return Err(StrataError::merge_mismatch(format!(
            "{} deletion bitmaps for {} segments",
            drops.len(),
            segments.len()
        )));
    }

    let live: Vec<u64> = segments
        .iter()
        .zip(drops)
        .map(|(segment, drops)| live_doc_count(segment.doc_count(), drops.as_ref()))
        .collect();
    let expected: u64 = live.iter().sum();
    if merged.doc_count() != expected {
        warn!(
            "Merge validation failed: expected {expected} documents, found {}",
            merged.doc_count()
        );
        return Err(StrataError::merge_mismatch(format!(
            "document count: expected {expected}, merged segment has {}",
            merged.doc_count()
        )));
    }

    let bases: Vec<u64> = live
        .iter()
        .scan(0, |next, &count| {
            let base = *next;
            *next += count;
            Some(base)
        })
        .collect();

    segments
        .par_iter()
        .enumerate()
        .try_for_each(|(input, segment)| {
            validate_input(input, *segment, drops[input].as_ref(), bases[input], merged)
        })
        .inspect_err(|e| warn!("Merge validation failed: {e}"))?;

    debug!("Validated merge of {} segments", segments.len());
    Ok(())
}

fn validate_input(
    input: usize,
    segment: &dyn Segment,
    drops: Option<&RoaringBitmap>,
    base: u64,
    merged: &dyn Segment,
) -> Result<()> {
    let mut remap = Vec::with_capacity(segment.doc_count() as usize);
    let mut next = base;
    for doc in 0..segment.doc_count() {
        if is_dropped(drops, doc) {
            remap.push(DOC_NUM_DROPPED);
            continue;
        }
        let expected = segment.document_id(doc)?;
        let found = merged.document_id(next)?;
        if expected != found {
            return Err(StrataError::merge_mismatch(format!(
                "input {input} document {doc} ({expected}) became {next} ({found})"
            )));
        }
        remap.push(next);
        next += 1;
    }

    for (field, name) in segment.fields().iter() {
        let Some(merged_field) = merged.fields().id(name) else {
            return Err(StrataError::merge_mismatch(format!(
                "field {name} missing from merged segment"
            )));
        };
        for term in segment.terms(field)? {
            let mut merged_postings = merged.postings(merged_field, &term, None, true, false)?;
            let mut postings = segment.postings(field, &term, drops, true, false)?;
            while let Some(posting) = postings.next_posting()? {
                let doc = remap
                    .get(posting.doc as usize)
                    .copied()
                    .filter(|&doc| doc != DOC_NUM_DROPPED)
                    .ok_or_else(|| {
                        StrataError::corrupt_segment(format!(
                            "input {input} returned deleted or unknown document {}",
                            posting.doc
                        ))
                    })?;
                match merged_postings.advance(doc)? {
                    Some(found) if found.doc == doc && found.frequency == posting.frequency => {}
                    Some(found) if found.doc == doc => {
                        return Err(StrataError::merge_mismatch(format!(
                            "field {name} term {}: document {doc} has frequency {}, expected {}",
                            String::from_utf8_lossy(&term),
                            found.frequency,
                            posting.frequency
                        )));
                    }
                    _ => {
                        return Err(StrataError::merge_mismatch(format!(
                            "field {name} term {}: document {doc} missing from merged postings",
                            String::from_utf8_lossy(&term)
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
