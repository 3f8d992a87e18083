//! Lookup of segment formats by `(type, version)`.
//!
//! Opening a persisted segment starts by reading its header and resolving the
//! format that wrote it; building a new segment uses the registry's default
//! format. The process-wide registry returned by [`SegmentRegistry::global`]
//! holds the built-in formats and never changes. [`SharedRegistry`] covers
//! registration at runtime: writers rebuild the table, readers take a
//! snapshot.
//!
//! # Examples
//!
//! ```
//! use strata::segment::registry::SegmentRegistry;
//!
//! let registry = SegmentRegistry::global();
//! assert_eq!(registry.default_format().segment_type(), "pack");
//! assert_eq!(registry.known_versions("pack"), vec![1, 2]);
//! assert!(registry.resolve("zap", 11).is_err());
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::config::SegmentConfig;
use crate::error::{Result, StrataError};
use crate::segment::header::{MAX_HEADER_LEN, SegmentHeader};
use crate::segment::pack::PackFormat;
use crate::segment::{Segment, SegmentFormat};

type FormatTable = BTreeMap<String, BTreeMap<u32, Arc<dyn SegmentFormat>>>;

lazy_static! {
    static ref GLOBAL_REGISTRY: SegmentRegistry = SegmentRegistry::builtin();
}

/// Collects formats before freezing them into a [`SegmentRegistry`].
#[derive(Debug, Clone, Default)]
pub struct SegmentRegistryBuilder {
    formats: FormatTable,
    last_registered: Option<String>,
    default: Option<(String, u32)>,
}

impl SegmentRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder holding the built-in formats.
    pub fn with_builtin() -> Self {
        let mut builder = Self::new();
        builder
            .register(Arc::new(PackFormat::v1()))
            .register(Arc::new(PackFormat::v2()));
        builder
    }

    /// Add a format. A later registration of the same `(type, version)`
    /// replaces the earlier one.
    pub fn register(&mut self, format: Arc<dyn SegmentFormat>) -> &mut Self {
        let segment_type = format.segment_type().to_string();
        let version = format.version();
        let replaced = self
            .formats
            .entry(segment_type.clone())
            .or_default()
            .insert(version, format);
        if replaced.is_some() {
            debug!("Replaced segment format {segment_type} v{version}");
        }
        self.last_registered = Some(segment_type);
        self
    }

    /// Choose the default format explicitly.
    pub fn with_default<S: Into<String>>(&mut self, segment_type: S, version: u32) -> &mut Self {
        self.default = Some((segment_type.into(), version));
        self
    }

    /// Freeze the table.
    ///
    /// Without an explicit default, the highest version of the most recently
    /// registered type is used.
    pub fn build(&self) -> Result<SegmentRegistry> {
        let (default_type, default_version) = match (&self.default, &self.last_registered) {
            (Some((segment_type, version)), _) => (segment_type.clone(), *version),
            (None, Some(segment_type)) => {
                let version = self
                    .formats
                    .get(segment_type)
                    .and_then(|versions| versions.keys().next_back())
                    .copied()
                    .ok_or_else(|| StrataError::UnsupportedSegmentType(segment_type.clone()))?;
                (segment_type.clone(), version)
            }
            (None, None) => {
                return Err(StrataError::invalid_config(
                    "segment registry needs at least one format",
                ));
            }
        };

        let versions = self
            .formats
            .get(&default_type)
            .ok_or_else(|| StrataError::UnsupportedSegmentType(default_type.clone()))?;
        let default = versions.get(&default_version).cloned().ok_or_else(|| {
            StrataError::UnsupportedSegmentVersion {
                segment_type: default_type.clone(),
                version: default_version,
                known: versions.keys().copied().collect(),
            }
        })?;

        let registry = SegmentRegistry {
            formats: self.formats.clone(),
            default,
        };
        debug!(
            "Built segment registry with {} types, default {default_type} v{default_version}",
            registry.formats.len()
        );
        Ok(registry)
    }
}

/// An immutable table of segment formats.
#[derive(Debug, Clone)]
pub struct SegmentRegistry {
    formats: FormatTable,
    default: Arc<dyn SegmentFormat>,
}

impl SegmentRegistry {
    /// The process-wide registry of built-in formats.
    pub fn global() -> &'static SegmentRegistry {
        &GLOBAL_REGISTRY
    }

    /// A registry of the built-in formats, defaulting to the newest pack
    /// version.
    pub fn builtin() -> SegmentRegistry {
        let default: Arc<dyn SegmentFormat> = Arc::new(PackFormat::v2());
        let mut versions: BTreeMap<u32, Arc<dyn SegmentFormat>> = BTreeMap::new();
        versions.insert(1, Arc::new(PackFormat::v1()));
        versions.insert(2, Arc::clone(&default));

        let mut formats = FormatTable::new();
        formats.insert(default.segment_type().to_string(), versions);
        info!(
            "Segment registry initialized, default {} v{}",
            default.segment_type(),
            default.version()
        );
        SegmentRegistry { formats, default }
    }

    /// Find the format for `(segment_type, version)`.
    pub fn resolve(&self, segment_type: &str, version: u32) -> Result<Arc<dyn SegmentFormat>> {
        let versions = self
            .formats
            .get(segment_type)
            .ok_or_else(|| StrataError::UnsupportedSegmentType(segment_type.to_string()))?;
        versions.get(&version).cloned().ok_or_else(|| {
            StrataError::UnsupportedSegmentVersion {
                segment_type: segment_type.to_string(),
                version,
                known: versions.keys().copied().collect(),
            }
        })
    }

    /// Find the format named by an encoded segment header.
    pub fn resolve_header(&self, bytes: &[u8]) -> Result<(Arc<dyn SegmentFormat>, SegmentHeader)> {
        let (header, _) = SegmentHeader::read(bytes)?;
        let format = self.resolve(&header.segment_type, header.version)?;
        Ok((format, header))
    }

    /// Open a persisted segment with whichever format wrote it.
    pub fn open(&self, path: &Path) -> Result<Box<dyn Segment>> {
        let mut head = Vec::with_capacity(MAX_HEADER_LEN);
        File::open(path)?
            .take(MAX_HEADER_LEN as u64)
            .read_to_end(&mut head)?;
        let (format, header) = self.resolve_header(&head)?;
        debug!(
            "Opening {} with {} v{}",
            path.display(),
            header.segment_type,
            header.version
        );
        format.open(path)
    }

    /// The format a [`SegmentConfig`] asks for.
    pub fn resolve_config(&self, config: &SegmentConfig) -> Result<Arc<dyn SegmentFormat>> {
        config.validate()?;
        match (&config.segment_type, config.segment_version) {
            (None, _) => Ok(self.default_format()),
            (Some(segment_type), Some(version)) => self.resolve(segment_type, version),
            (Some(segment_type), None) => {
                let version = self
                    .known_versions(segment_type)
                    .last()
                    .copied()
                    .ok_or_else(|| StrataError::UnsupportedSegmentType(segment_type.clone()))?;
                self.resolve(segment_type, version)
            }
        }
    }

    /// Registered versions of `segment_type`, ascending.
    pub fn known_versions(&self, segment_type: &str) -> Vec<u32> {
        self.formats
            .get(segment_type)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Registered type tags.
    pub fn segment_types(&self) -> Vec<&str> {
        self.formats.keys().map(String::as_str).collect()
    }

    /// The format used to build new segments.
    pub fn default_format(&self) -> Arc<dyn SegmentFormat> {
        Arc::clone(&self.default)
    }
}

/// A registry that accepts formats at runtime.
///
/// Registration is serialized and swaps in a rebuilt table; resolvers work on
/// the snapshot they took and never observe a half-updated table.
#[derive(Debug)]
pub struct SharedRegistry {
    builder: Mutex<SegmentRegistryBuilder>,
    current: RwLock<Arc<SegmentRegistry>>,
}

impl SharedRegistry {
    pub fn new(builder: SegmentRegistryBuilder) -> Result<Self> {
        let registry = builder.build()?;
        Ok(SharedRegistry {
            builder: Mutex::new(builder),
            current: RwLock::new(Arc::new(registry)),
        })
    }

    /// A shared registry starting from the built-in formats.
    pub fn with_builtin() -> Result<Self> {
        Self::new(SegmentRegistryBuilder::with_builtin())
    }

    /// The current table.
    pub fn snapshot(&self) -> Arc<SegmentRegistry> {
        Arc::clone(&self.current.read())
    }

    /// Add a format and publish the rebuilt table.
    pub fn register(&self, format: Arc<dyn SegmentFormat>) -> Result<()> {
        let mut builder = self.builder.lock();
        let mut next = builder.clone();
        next.register(format);
        let registry = next.build()?;
        *builder = next;
        *self.current.write() = Arc::new(registry);
        Ok(())
    }

    /// Change the default format and publish the rebuilt table.
    pub fn set_default(&self, segment_type: &str, version: u32) -> Result<()> {
        let mut builder = self.builder.lock();
        let mut next = builder.clone();
        next.with_default(segment_type, version);
        let registry = next.build()?;
        *builder = next;
        *self.current.write() = Arc::new(registry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = SegmentRegistry::builtin();
        assert_eq!(registry.segment_types(), vec!["pack"]);
        assert_eq!(registry.known_versions("pack"), vec![1, 2]);
        assert_eq!(registry.default_format().version(), 2);
        assert_eq!(registry.resolve("pack", 1).unwrap().version(), 1);
    }

    #[test]
    fn test_resolution_errors() {
        let registry = SegmentRegistry::global();
        match registry.resolve("zap", 11) {
            Err(StrataError::UnsupportedSegmentType(segment_type)) => assert_eq!(segment_type, "zap"),
            other => panic!("unexpected {other:?}"),
        }
        match registry.resolve("pack", 9) {
            Err(StrataError::UnsupportedSegmentVersion {
                segment_type,
                version,
                known,
            }) => {
                assert_eq!(segment_type, "pack");
                assert_eq!(version, 9);
                assert_eq!(known, vec![1, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_resolve_header() {
        let registry = SegmentRegistry::global();
        let bytes = SegmentHeader::new("pack", 1).to_bytes().unwrap();
        let (format, header) = registry.resolve_header(&bytes).unwrap();
        assert_eq!(format.version(), 1);
        assert_eq!(header.segment_type, "pack");

        let bytes = SegmentHeader::new("pack", 7).to_bytes().unwrap();
        assert!(registry.resolve_header(&bytes).is_err());
        assert!(registry.resolve_header(&[4, b'p']).is_err());
    }

    #[test]
    fn test_resolve_config() {
        let registry = SegmentRegistry::global();
        let config = SegmentConfig::default();
        assert_eq!(registry.resolve_config(&config).unwrap().version(), 2);

        let config = SegmentConfig {
            segment_type: Some("pack".to_string()),
            segment_version: Some(1),
            ..SegmentConfig::default()
        };
        assert_eq!(registry.resolve_config(&config).unwrap().version(), 1);

        let config = SegmentConfig {
            segment_type: Some("pack".to_string()),
            ..SegmentConfig::default()
        };
        assert_eq!(registry.resolve_config(&config).unwrap().version(), 2);

        let config = SegmentConfig {
            segment_type: Some("zap".to_string()),
            ..SegmentConfig::default()
        };
        assert!(registry.resolve_config(&config).is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let mut builder = SegmentRegistryBuilder::new();
        assert!(builder.build().is_err());

        builder.register(Arc::new(PackFormat::v2()));
        builder.register(Arc::new(PackFormat::v1()));
        assert_eq!(builder.build().unwrap().default_format().version(), 2);

        builder.with_default("pack", 1);
        assert_eq!(builder.build().unwrap().default_format().version(), 1);

        builder.with_default("pack", 5);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut builder = SegmentRegistryBuilder::new();
        builder
            .register(Arc::new(PackFormat::v1()))
            .register(Arc::new(PackFormat::v1()));
        let registry = builder.build().unwrap();
        assert_eq!(registry.known_versions("pack"), vec![1]);
    }

    #[test]
    fn test_shared_registry_snapshots() {
        let mut builder = SegmentRegistryBuilder::new();
        builder.register(Arc::new(PackFormat::v1()));
        let shared = SharedRegistry::new(builder).unwrap();

        let before = shared.snapshot();
        shared.register(Arc::new(PackFormat::v2())).unwrap();
        let after = shared.snapshot();

        assert_eq!(before.known_versions("pack"), vec![1]);
        assert_eq!(after.known_versions("pack"), vec![1, 2]);
        assert_eq!(after.default_format().version(), 2);

        shared.set_default("pack", 1).unwrap();
        assert_eq!(shared.snapshot().default_format().version(), 1);
        assert!(shared.set_default("pack", 3).is_err());
        assert_eq!(shared.snapshot().default_format().version(), 1);
    }
}
