//! Configuration for segment construction and merging.
//!
//! Both structs deserialize from JSON with every field optional, falling back
//! to [`Default`].
//!
//! # Example
//!
//! ```
//! use strata::config::{MergeConfig, SegmentConfig};
//!
//! let config: SegmentConfig = serde_json::from_str(r#"{"chunk_factor": 256}"#).unwrap();
//! assert_eq!(config.chunk_factor, 256);
//! assert!(config.segment_type.is_none());
//!
//! let merge = MergeConfig::default();
//! assert!(merge.validate_after_merge);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Default number of documents per postings chunk.
pub const DEFAULT_CHUNK_FACTOR: u32 = 1024;

/// Configuration used when building new segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Segment type to build. `None` selects the registry default.
    pub segment_type: Option<String>,

    /// Version of `segment_type` to build. `None` selects the highest
    /// registered version of that type.
    pub segment_version: Option<u32>,

    /// Documents per postings chunk.
    ///
    /// Larger chunks mean fewer, larger reads when locations are decoded, at
    /// the cost of decoding more data per lookup.
    pub chunk_factor: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            segment_type: None,
            segment_version: None,
            chunk_factor: DEFAULT_CHUNK_FACTOR,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<()> {
        validate_chunk_factor(self.chunk_factor)?;
        if self.segment_version.is_some() && self.segment_type.is_none() {
            return Err(StrataError::invalid_config(
                "segment_version requires segment_type",
            ));
        }
        if let Some(segment_type) = &self.segment_type
            && (segment_type.is_empty() || segment_type.len() > u8::MAX as usize)
        {
            return Err(StrataError::invalid_config(format!(
                "segment_type must be 1..=255 bytes, got {}",
                segment_type.len()
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: SegmentConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Configuration for merging segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Documents per postings chunk in the merged segment.
    pub chunk_factor: u32,

    /// Reopen the merged segment and check it against its inputs before
    /// returning.
    pub validate_after_merge: bool,

    /// Documents or terms processed between cancellation checks.
    pub cancel_check_interval: usize,

    /// Capacity of the channel used by
    /// [`ChannelStatsReporter`](crate::segment::stats::ChannelStatsReporter).
    pub stats_buffer: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            chunk_factor: DEFAULT_CHUNK_FACTOR,
            validate_after_merge: true,
            cancel_check_interval: 1024,
            stats_buffer: 64,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        validate_chunk_factor(self.chunk_factor)?;
        if self.cancel_check_interval == 0 {
            return Err(StrataError::invalid_config(
                "cancel_check_interval must be positive",
            ));
        }
        if self.stats_buffer == 0 {
            return Err(StrataError::invalid_config("stats_buffer must be positive"));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: MergeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_chunk_factor(chunk_factor: u32) -> Result<()> {
    if chunk_factor == 0 {
        return Err(StrataError::invalid_config("chunk_factor must be positive"));
    }
    Ok(())
}
