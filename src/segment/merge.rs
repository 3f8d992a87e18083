//! Merge orchestration: running a format's merge, validating the result and
//! running merges in the background.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, bounded};
use log::{info, warn};
use roaring::RoaringBitmap;

use crate::config::MergeConfig;
use crate::error::{Result, StrataError};
use crate::segment::registry::SegmentRegistry;
use crate::segment::stats::StatsReporter;
use crate::segment::{CancelToken, Segment, SegmentFormat};

/// Result of a successful merge.
#[derive(Debug)]
pub struct MergeOutcome {
    /// Per input, old document number to new number or
    /// [`DOC_NUM_DROPPED`](crate::segment::DOC_NUM_DROPPED).
    pub remaps: Vec<Vec<u64>>,
    /// Documents in the merged segment.
    pub doc_count: u64,
    /// The merged segment, opened from its destination.
    pub segment: Box<dyn Segment>,
}

/// Runs merges with one format and configuration.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    config: MergeConfig,
    format: Arc<dyn SegmentFormat>,
}

impl MergeEngine {
    pub fn new(config: MergeConfig, format: Arc<dyn SegmentFormat>) -> Result<Self> {
        config.validate()?;
        Ok(MergeEngine { config, format })
    }

    /// An engine writing the registry's default format.
    pub fn with_registry(config: MergeConfig, registry: &SegmentRegistry) -> Result<Self> {
        Self::new(config, registry.default_format())
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn format(&self) -> &Arc<dyn SegmentFormat> {
        &self.format
    }

    /// Merge `inputs` into `dest`.
    ///
    /// The format writes into a staging directory next to `dest`. The result
    /// is opened from there and, with `validate_after_merge`, checked against
    /// its inputs; only then is it renamed to `dest`. On any error, including
    /// cancellation, nothing appears at `dest` and the staging files are
    /// removed.
    pub fn merge(
        &self,
        inputs: &[&dyn Segment],
        drops: &[Option<RoaringBitmap>],
        dest: &Path,
        cancel: &CancelToken,
        stats: &dyn StatsReporter,
    ) -> Result<MergeOutcome> {
        if dest.exists() {
            return Err(StrataError::construction(format!(
                "merge destination {} already exists",
                dest.display()
            )));
        }
        let file_name = dest.file_name().ok_or_else(|| {
            StrataError::construction(format!(
                "merge destination {} has no file name",
                dest.display()
            ))
        })?;
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Removed on drop, whatever happens below.
        let staging_dir = tempfile::Builder::new()
            .prefix(".merge-")
            .tempdir_in(dir)?;
        let staging = staging_dir.path().join(file_name);

        let cancel = cancel.with_check_interval(self.config.cancel_check_interval);
        let (remaps, doc_count) = match self.format.merge(
            inputs,
            drops,
            &staging,
            self.config.chunk_factor,
            &cancel,
            stats,
        ) {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                info!("Merge into {} cancelled", dest.display());
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let segment = self.format.open(&staging)?;
        if self.config.validate_after_merge
            && let Err(e) = self.format.validate_merge(inputs, drops, segment.as_ref())
        {
            warn!("Discarding merged segment for {}: {e}", dest.display());
            return Err(e);
        }

        std::fs::rename(&staging, dest)?;
        info!("Published merged segment {}", dest.display());

        Ok(MergeOutcome {
            remaps,
            doc_count,
            segment,
        })
    }

    /// Run [`merge`](Self::merge) on a background thread.
    pub fn spawn(
        &self,
        inputs: Vec<Arc<dyn Segment>>,
        drops: Vec<Option<RoaringBitmap>>,
        dest: PathBuf,
        stats: Arc<dyn StatsReporter>,
    ) -> Result<MergeHandle> {
        let engine = self.clone();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let (sender, receiver) = bounded(1);

        let thread = thread::Builder::new()
            .name("segment-merge".to_string())
            .spawn(move || {
                let refs: Vec<&dyn Segment> = inputs.iter().map(|s| s.as_ref()).collect();
                let result = engine.merge(&refs, &drops, &dest, &worker_cancel, stats.as_ref());
                let _ = sender.send(result);
            })?;

        Ok(MergeHandle {
            cancel,
            receiver,
            thread: Some(thread),
        })
    }
}

/// A merge running on a background thread.
#[derive(Debug)]
pub struct MergeHandle {
    cancel: CancelToken,
    receiver: Receiver<Result<MergeOutcome>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MergeHandle {
    /// Ask the merge to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|thread| thread.is_finished())
    }

    /// Wait for the merge and return its result.
    pub fn join(mut self) -> Result<MergeOutcome> {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            return Err(StrataError::Anyhow(anyhow::anyhow!(
                "merge worker panicked"
            )));
        }
        self.receiver
            .recv()
            .map_err(|_| StrataError::Anyhow(anyhow::anyhow!("merge worker exited without a result")))?
    }
}
