//! Rsync itemized-changes manifest resolution.
//!
//! The manifest is the captured output of `rsync --itemize-changes`. Lines
//! are classified individually; only file additions and file deletions
//! produce collection entries, everything else (headers, directory
//! operations, transfer summaries, blank lines) is ignored.

use regex_lite::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::{ResolveError, ResolveParams};
use crate::file::{FileCollection, PipelineFile};

const HEADER_LINE: &str = "receiving incremental file list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsyncLine {
    Invalid,
    Header,
    FileAdd(String),
    FileDelete(String),
    DirectoryAdd(String),
    DirectoryDelete(String),
}

fn record_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\*deleting|[>.][df].{9})\s{1,3}(.*)$").expect("pattern is valid")
    })
}

fn file_add_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^>f.{9}").expect("pattern is valid"))
}

fn dir_add_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\.d.{9}").expect("pattern is valid"))
}

/// Classify one line of itemized rsync output.
pub fn classify_line(line: &str) -> RsyncLine {
    let captures = match record_pattern().captures(line) {
        Some(captures) => captures,
        None if line == HEADER_LINE => return RsyncLine::Header,
        None => return RsyncLine::Invalid,
    };
    let operation = &captures[1];
    let path = captures[2].to_string();

    if file_add_pattern().is_match(operation) {
        RsyncLine::FileAdd(path)
    } else if dir_add_pattern().is_match(operation) {
        RsyncLine::DirectoryAdd(path)
    } else if operation.starts_with("*deleting") {
        if path.ends_with('/') {
            RsyncLine::DirectoryDelete(path)
        } else {
            RsyncLine::FileDelete(path)
        }
    } else {
        RsyncLine::Invalid
    }
}

pub(crate) fn resolve_rsync(
    input: &Path,
    params: &ResolveParams,
) -> Result<FileCollection, ResolveError> {
    let content = std::fs::read_to_string(input)?;
    let mut files = FileCollection::new();
    for line in content.lines() {
        match classify_line(line) {
            RsyncLine::FileAdd(path) => {
                files.add(PipelineFile::new(params.abs_path(&path))?)?;
            }
            RsyncLine::FileDelete(path) => {
                files.add(PipelineFile::new_deletion(params.abs_path(&path), false))?;
            }
            _ => {}
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn line_taxonomy() {
        assert_eq!(classify_line(HEADER_LINE), RsyncLine::Header);
        assert_eq!(
            classify_line(">f.st...... handlers/dummy/test_manifest.nc"),
            RsyncLine::FileAdd("handlers/dummy/test_manifest.nc".to_string())
        );
        assert_eq!(
            classify_line("*deleting   handlers/dummy/aoml/1900728/1900728_Rtraj.nc"),
            RsyncLine::FileDelete("handlers/dummy/aoml/1900728/1900728_Rtraj.nc".to_string())
        );
        assert_eq!(
            classify_line("*deleting   aoml/1900709/profiles/"),
            RsyncLine::DirectoryDelete("aoml/1900709/profiles/".to_string())
        );
        assert_eq!(
            classify_line(".d..t...... aoml/1900709/"),
            RsyncLine::DirectoryAdd("aoml/1900709/".to_string())
        );
        assert_eq!(classify_line(""), RsyncLine::Invalid);
        assert_eq!(
            classify_line("sent 65477852 bytes  received 407818360 bytes"),
            RsyncLine::Invalid
        );
        assert_eq!(
            classify_line("total size is 169778564604  speedup is 358.72"),
            RsyncLine::Invalid
        );
    }

    #[test]
    fn only_file_lines_produce_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("added.nc"), b"data").unwrap();
        let manifest = dir.path().join("sync.rsync_manifest");
        std::fs::write(
            &manifest,
            format!(
                "{}\n\
                 *deleting   old_dir/\n\
                 .d..t...... new_dir/\n\
                 >f.st...... added.nc\n\
                 *deleting   removed.nc\n\
                 \n\
                 sent 100 bytes  received 200 bytes\n",
                HEADER_LINE
            ),
        )
        .unwrap();

        let params = ResolveParams::new(dir.path());
        let files = resolve_rsync(&manifest, &params).unwrap();
        assert_eq!(files.len(), 2);

        let addition = files.get(0).unwrap();
        assert!(!addition.is_deletion());
        assert_eq!(addition.name(), "added.nc");

        let deletion = files.get(1).unwrap();
        assert!(deletion.is_deletion());
        assert_eq!(deletion.name(), "removed.nc");
    }
}
