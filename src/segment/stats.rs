//! Progress reporting for merges.
//!
//! A merge reports [`MergeEvent`]s to a [`StatsReporter`] as it goes. Reporting
//! must never stall the merge: [`MergeStats`] accumulates in atomics and
//! [`ChannelStatsReporter`] drops events when its buffer is full.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};

/// A unit of merge progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeEvent {
    /// Live documents copied into the merged segment.
    DocumentsMerged(u64),
    /// Documents skipped because their deletion bit was set.
    DocumentsDropped(u64),
    /// Terms written to the merged segment.
    TermsMerged(u64),
    /// Bytes written to the destination.
    BytesWritten(u64),
}

/// Receives merge progress.
pub trait StatsReporter: Send + Sync {
    fn report(&self, event: MergeEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsReporter;

impl StatsReporter for NoopStatsReporter {
    fn report(&self, _event: MergeEvent) {}
}

/// Running totals of merge events.
#[derive(Debug, Default)]
pub struct MergeStats {
    docs_merged: AtomicU64,
    docs_dropped: AtomicU64,
    terms_merged: AtomicU64,
    bytes_written: AtomicU64,
}

/// A point-in-time copy of [`MergeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStatsSnapshot {
    pub docs_merged: u64,
    pub docs_dropped: u64,
    pub terms_merged: u64,
    pub bytes_written: u64,
}

impl MergeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MergeStatsSnapshot {
        MergeStatsSnapshot {
            docs_merged: self.docs_merged.load(Ordering::Relaxed),
            docs_dropped: self.docs_dropped.load(Ordering::Relaxed),
            terms_merged: self.terms_merged.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl StatsReporter for MergeStats {
    fn report(&self, event: MergeEvent) {
        let (counter, amount) = match event {
            MergeEvent::DocumentsMerged(n) => (&self.docs_merged, n),
            MergeEvent::DocumentsDropped(n) => (&self.docs_dropped, n),
            MergeEvent::TermsMerged(n) => (&self.terms_merged, n),
            MergeEvent::BytesWritten(n) => (&self.bytes_written, n),
        };
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// Forwards events over a bounded channel.
#[derive(Debug)]
pub struct ChannelStatsReporter {
    sender: Sender<MergeEvent>,
    dropped: AtomicU64,
}

impl ChannelStatsReporter {
    /// Create a reporter and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<MergeEvent>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            ChannelStatsReporter {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Events lost because the channel was full or disconnected.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StatsReporter for ChannelStatsReporter {
    fn report(&self, event: MergeEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
