//! Single-file and archive resolution.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{list_regular_files, ResolveError};
use crate::file::{FileCollection, PipelineFile};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 2] = [b'P', b'K'];

pub(crate) fn is_gzip_file(path: &Path) -> bool {
    matches_magic(path, &GZIP_MAGIC)
}

pub(crate) fn is_zip_file(path: &Path) -> bool {
    matches_magic(path, &ZIP_MAGIC)
}

fn matches_magic(path: &Path, magic: &[u8]) -> bool {
    let mut buf = vec![0u8; magic.len()];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut buf))
        .map(|_| buf == magic)
        .unwrap_or(false)
}

/// Copy the artifact into the collection directory and add it as the sole
/// member.
pub(crate) fn resolve_single(
    input: &Path,
    output_dir: &Path,
) -> Result<FileCollection, ResolveError> {
    let name = input
        .file_name()
        .ok_or_else(|| ResolveError::InvalidFormat(format!("no file name in '{}'", input.display())))?;
    let staged = output_dir.join(name);
    std::fs::copy(input, &staged)?;

    let mut files = FileCollection::new();
    files.add(PipelineFile::new(staged)?)?;
    Ok(files)
}

pub(crate) fn resolve_gzip(input: &Path, output_dir: &Path) -> Result<FileCollection, ResolveError> {
    if !is_gzip_file(input) {
        return Err(ResolveError::InvalidFormat(
            "input file must be a valid GZ file".to_string(),
        ));
    }

    // A gzip member holds exactly one file, named by stripping the
    // extension.
    let stem = input
        .file_stem()
        .ok_or_else(|| ResolveError::InvalidFormat(format!("no file name in '{}'", input.display())))?;
    let extracted = output_dir.join(stem);
    let mut decoder = GzDecoder::new(File::open(input)?);
    let mut out = File::create(&extracted)?;
    std::io::copy(&mut decoder, &mut out)
        .map_err(|e| ResolveError::InvalidFormat(format!("gzip extraction failed: {}", e)))?;

    let mut files = FileCollection::new();
    for path in list_regular_files(output_dir, false)? {
        files.add(PipelineFile::new(path)?)?;
    }
    Ok(files)
}

pub(crate) fn resolve_zip(input: &Path, output_dir: &Path) -> Result<FileCollection, ResolveError> {
    if !is_zip_file(input) {
        return Err(ResolveError::InvalidFormat(
            "input file must be a valid ZIP file".to_string(),
        ));
    }

    let mut zip = zip::ZipArchive::new(File::open(input)?)
        .map_err(|e| ResolveError::InvalidFormat(format!("failed to open ZIP: {}", e)))?;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ResolveError::InvalidFormat(format!("failed to read ZIP entry: {}", e)))?;
        if entry.is_dir() {
            continue;
        }
        let rel_path = entry.enclosed_name().ok_or_else(|| {
            ResolveError::InvalidFormat(format!("unsafe path in ZIP entry '{}'", entry.name()))
        })?;
        let dest = output_dir.join(rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    let mut files = FileCollection::new();
    for path in list_regular_files(output_dir, true)? {
        files.add(PipelineFile::new(path)?)?;
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{resolve, ResolveParams};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn params(dir: &TempDir) -> ResolveParams {
        ResolveParams::new(dir.path())
    }

    #[test]
    fn single_file_is_copied_into_collection_dir() {
        let input_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let input = input_dir.path().join("data.nc");
        std::fs::write(&input, b"netcdf-ish").unwrap();

        let files = resolve(&input, out_dir.path(), &params(&input_dir)).unwrap();
        assert_eq!(files.len(), 1);
        let file = files.get(0).unwrap();
        assert_eq!(file.name(), "data.nc");
        assert!(file.src_path().unwrap().starts_with(out_dir.path()));
    }

    #[test]
    fn gzip_artifact_extracts_single_member() {
        let input_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let input = input_dir.path().join("data.nc.gz");
        let mut encoder = GzEncoder::new(File::create(&input).unwrap(), Compression::default());
        encoder.write_all(b"inner content").unwrap();
        encoder.finish().unwrap();

        let files = resolve(&input, out_dir.path(), &params(&input_dir)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get(0).unwrap().name(), "data.nc");
    }

    #[test]
    fn gzip_extension_with_wrong_magic_is_rejected() {
        let input_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let input = input_dir.path().join("data.nc.gz");
        std::fs::write(&input, b"plainly not gzip").unwrap();

        let result = resolve(&input, out_dir.path(), &params(&input_dir));
        assert!(matches!(result, Err(ResolveError::InvalidFormat(_))));
    }

    #[test]
    fn zip_artifact_extracts_recursively() {
        let input_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let input = input_dir.path().join("batch.zip");

        let mut writer = zip::ZipWriter::new(File::create(&input).unwrap());
        writer
            .start_file("a.nc", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"a").unwrap();
        writer
            .start_file("nested/b.nc", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"b").unwrap();
        writer.finish().unwrap();

        let files = resolve(&input, out_dir.path(), &params(&input_dir)).unwrap();
        assert_eq!(files.len(), 2);
        let names = files.names();
        assert!(names.contains(&"a.nc".to_string()));
        assert!(names.contains(&"b.nc".to_string()));
    }
}
