//! Resolve step: expand the incoming artifact into a collection of
//! pipeline files.
//!
//! A single artifact may resolve to many files (archives, manifests) or
//! just itself. Archive contents are extracted into the run's collection
//! directory; manifest entries reference their source files in place.

mod archive;
mod manifest;
mod rsync;

pub use rsync::{classify_line, RsyncLine};

use std::path::{Path, PathBuf};
use tracing::info;

use crate::file::{FileCollection, FileError, FileKind};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid input file format: {0}")]
    InvalidFormat(String),

    #[error("delete manifests are not enabled for this pipeline")]
    DeleteManifestsDisabled,

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runtime parameters for the resolve step.
#[derive(Debug, Clone)]
pub struct ResolveParams {
    /// Root against which non-absolute manifest paths are resolved.
    pub relative_path_root: PathBuf,

    /// Whether delete manifests are accepted at all. Off by default so a
    /// stray manifest cannot delete published data.
    pub allow_delete_manifests: bool,
}

impl ResolveParams {
    pub fn new(relative_path_root: impl Into<PathBuf>) -> Self {
        Self {
            relative_path_root: relative_path_root.into(),
            allow_delete_manifests: false,
        }
    }

    pub(crate) fn abs_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.relative_path_root.join(path)
        }
    }
}

/// Resolve the input artifact into a file collection, dispatching on the
/// artifact's sniffed kind.
pub fn resolve(
    input: &Path,
    output_dir: &Path,
    params: &ResolveParams,
) -> Result<FileCollection, ResolveError> {
    let kind = FileKind::from_name(input);
    info!("resolving '{}' as {:?}", input.display(), kind);
    match kind {
        FileKind::Gzip => archive::resolve_gzip(input, output_dir),
        FileKind::Zip => archive::resolve_zip(input, output_dir),
        FileKind::SimpleManifest => manifest::resolve_simple(input, params),
        FileKind::MapManifest => manifest::resolve_map(input, params),
        FileKind::DirManifest => manifest::resolve_dir(input, params),
        FileKind::JsonManifest => manifest::resolve_json(input, params),
        FileKind::RsyncManifest => rsync::resolve_rsync(input, params),
        FileKind::DeleteManifest => {
            if params.allow_delete_manifests {
                manifest::resolve_delete(input)
            } else {
                Err(ResolveError::DeleteManifestsDisabled)
            }
        }
        FileKind::Csv | FileKind::Netcdf | FileKind::Unknown => {
            archive::resolve_single(input, output_dir)
        }
    }
}

/// Regular files below a directory, depth-first, sorted for determinism.
pub(crate) fn list_regular_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn delete_manifests_require_opt_in() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("removals.delete_manifest");
        std::fs::write(&input, "path/to/old.nc\n").unwrap();

        let params = ResolveParams::new(dir.path());
        let result = resolve(&input, dir.path(), &params);
        assert!(matches!(result, Err(ResolveError::DeleteManifestsDisabled)));
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let params = ResolveParams::new("/var/incoming");
        assert_eq!(
            params.abs_path("sub/file.nc"),
            PathBuf::from("/var/incoming/sub/file.nc")
        );
        assert_eq!(params.abs_path("/abs/file.nc"), PathBuf::from("/abs/file.nc"));
    }

    #[test]
    fn listing_is_sorted_and_optionally_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.nc"), b"b").unwrap();
        std::fs::write(dir.path().join("a.nc"), b"a").unwrap();
        std::fs::write(dir.path().join("nested/c.nc"), b"c").unwrap();

        let flat = list_regular_files(dir.path(), false).unwrap();
        assert_eq!(flat.len(), 2);
        assert!(flat[0].ends_with("a.nc"));

        let deep = list_regular_files(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);
    }
}
