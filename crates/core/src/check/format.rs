//! In-process format validation, dispatched on sniffed file kind.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::file::{CheckResult, FileKind};

const NETCDF_CLASSIC_MAGIC: &[u8] = b"CDF";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

/// Validate that the file's content matches its claimed kind.
///
/// Kinds without a stronger validator fall back to a non-empty check, so a
/// format check is never weaker than a non-empty check.
pub fn format_check(path: &Path, kind: FileKind) -> CheckResult {
    let verdict = match kind {
        FileKind::Netcdf => netcdf_ok(path),
        FileKind::Zip => zip_ok(path),
        FileKind::Gzip => gzip_ok(path),
        FileKind::Csv => utf8_ok(path),
        _ => non_empty_ok(path),
    };
    match verdict {
        Ok(()) => CheckResult::compliant_ok(),
        Err(reason) => CheckResult::new(
            false,
            vec![format!("'{}': {}", path.display(), reason)],
            false,
        ),
    }
}

fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>, String> {
    let mut buf = vec![0u8; len];
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let n = file.read(&mut buf).map_err(|e| e.to_string())?;
    buf.truncate(n);
    Ok(buf)
}

fn netcdf_ok(path: &Path) -> Result<(), String> {
    let prefix = read_prefix(path, 8)?;
    if prefix.starts_with(NETCDF_CLASSIC_MAGIC) || prefix.starts_with(HDF5_MAGIC) {
        Ok(())
    } else {
        Err("not a valid NetCDF file".to_string())
    }
}

fn zip_ok(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    zip::ZipArchive::new(file)
        .map(|_| ())
        .map_err(|e| format!("not a valid ZIP file: {}", e))
}

fn gzip_ok(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut decoder = GzDecoder::new(file);
    let mut buf = [0u8; 1024];
    // Reading any amount validates the header and the first block.
    decoder
        .read(&mut buf)
        .map(|_| ())
        .map_err(|e| format!("not a valid GZ file: {}", e))
}

fn utf8_ok(path: &Path) -> Result<(), String> {
    std::fs::read_to_string(path)
        .map(|_| ())
        .map_err(|e| format!("not readable as text: {}", e))
}

fn non_empty_ok(path: &Path) -> Result<(), String> {
    let meta = std::fs::metadata(path).map_err(|e| e.to_string())?;
    if meta.len() > 0 {
        Ok(())
    } else {
        Err("file is empty".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn netcdf_magic_detection() {
        let dir = TempDir::new().unwrap();
        let classic = dir.path().join("classic.nc");
        std::fs::write(&classic, b"CDF\x01rest-of-file").unwrap();
        assert!(format_check(&classic, FileKind::Netcdf).compliant());

        let hdf5 = dir.path().join("modern.nc");
        std::fs::write(&hdf5, b"\x89HDF\r\n\x1a\nrest").unwrap();
        assert!(format_check(&hdf5, FileKind::Netcdf).compliant());

        let bogus = dir.path().join("bogus.nc");
        std::fs::write(&bogus, b"not netcdf at all").unwrap();
        assert!(!format_check(&bogus, FileKind::Netcdf).compliant());
    }

    #[test]
    fn gzip_content_validation() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.gz");
        let mut encoder =
            GzEncoder::new(std::fs::File::create(&good).unwrap(), Compression::default());
        encoder.write_all(b"payload").unwrap();
        encoder.finish().unwrap();
        assert!(format_check(&good, FileKind::Gzip).compliant());

        let bad = dir.path().join("bad.gz");
        std::fs::write(&bad, b"definitely not gzip").unwrap();
        assert!(!format_check(&bad, FileKind::Gzip).compliant());
    }

    #[test]
    fn unknown_kind_falls_back_to_non_empty() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("data.bin");
        std::fs::write(&good, b"x").unwrap();
        assert!(format_check(&good, FileKind::Unknown).compliant());

        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert!(!format_check(&empty, FileKind::Unknown).compliant());
    }
}
