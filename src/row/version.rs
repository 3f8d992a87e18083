//! The schema version marker row.

use crate::error::{Result, StrataError};
use crate::row::{KeyValueRow, RowType, key_body};

/// Global row format version. One instance per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRow {
    pub version: u8,
}

impl VersionRow {
    pub fn new(version: u8) -> Self {
        VersionRow { version }
    }
}

impl KeyValueRow for VersionRow {
    const ROW_TYPE: RowType = RowType::Version;

    fn key_size(&self) -> usize {
        1
    }

    fn write_key(&self, buf: &mut Vec<u8>) {
        buf.push(Self::ROW_TYPE.tag());
    }

    fn value(&self) -> Vec<u8> {
        vec![self.version]
    }

    fn parse_kv(key: &[u8], value: &[u8]) -> Result<Self> {
        if !key_body(key, Self::ROW_TYPE, "version")?.is_empty() {
            return Err(StrataError::malformed_row(
                "version row: unexpected key bytes after tag",
            ));
        }
        match value {
            [version] => Ok(VersionRow::new(*version)),
            [] => Err(StrataError::malformed_row("version row: missing version")),
            _ => Err(StrataError::malformed_row(
                "version row: trailing bytes after version",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_row() {
        let row = VersionRow::new(1);
        assert_eq!(row.key(), vec![b'v']);
        assert_eq!(row.value(), vec![0x1]);
        assert_eq!(VersionRow::parse_kv(b"v", &[1]).unwrap(), row);
    }

    #[test]
    fn test_invalid_version_row() {
        assert!(VersionRow::parse_kv(b"v", &[]).is_err());
        assert!(VersionRow::parse_kv(b"v", &[1, 2]).is_err());
        assert!(VersionRow::parse_kv(b"vx", &[1]).is_err());
    }
}
