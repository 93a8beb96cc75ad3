//! Records describing files as they exist on a storage backend.

use chrono::{DateTime, Utc};
use std::path::Path;

/// Metadata for one object returned by a storage query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileMeta {
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// A file known to exist remotely, keyed by its destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub dest_path: String,
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

impl RemoteFile {
    pub fn new(dest_path: impl Into<String>, meta: RemoteFileMeta) -> Self {
        let dest_path = dest_path.into();
        let name = Path::new(&dest_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dest_path.clone());
        Self {
            name,
            last_modified: meta.last_modified,
            size: meta.size,
            dest_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_derived_from_dest_path() {
        let remote = RemoteFile::new(
            "prefix/sub/file.nc",
            RemoteFileMeta {
                last_modified: None,
                size: 42,
            },
        );
        assert_eq!(remote.name, "file.nc");
        assert_eq!(remote.size, 42);
    }
}
