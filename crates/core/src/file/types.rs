//! Core file-model types shared across the pipeline steps.

use std::fmt;
use std::path::Path;

/// Which check is performed against an individual file during the check step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckType {
    /// Sentinel for files which have not been assigned a check type yet.
    Unset,
    /// Explicitly skip checking for this file.
    NoAction,
    /// The file must exist and be non-empty.
    NonEmptyCheck,
    /// The file must parse as its declared format (zip, gzip, netcdf, ...).
    FormatCheck,
    /// The file is routed to the external compliance check engine.
    ComplianceCheck,
}

impl CheckType {
    /// Whether this value may be assigned to a file.
    pub fn is_settable(self) -> bool {
        self != CheckType::Unset
    }

    /// Whether files with this value are actually routed to a checker.
    pub fn is_checkable(self) -> bool {
        !matches!(self, CheckType::Unset | CheckType::NoAction)
    }

    pub const ALL_CHECKABLE: [CheckType; 3] = [
        CheckType::NonEmptyCheck,
        CheckType::FormatCheck,
        CheckType::ComplianceCheck,
    ];
}

/// Which combination of archive/store/harvest actions must occur before a
/// file is considered published.
///
/// Each member maps to a fixed flag tuple
/// `(is_addition, is_deletion, archive, store, harvest)`. The flags are only
/// reachable through the read-only accessors so that files cannot end up with
/// an inconsistent combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishType {
    /// Sentinel for files which have not been assigned a publish type yet.
    Unset,
    NoAction,
    ArchiveOnly,
    UploadOnly,
    HarvestOnly,
    HarvestArchive,
    HarvestUpload,
    HarvestArchiveUpload,
    UnharvestOnly,
    DeleteOnly,
    DeleteUnharvest,
}

/// `(is_addition, is_deletion, archive, store, harvest)`
type PublishFlags = (bool, bool, bool, bool, bool);

impl PublishType {
    const fn flags(self) -> PublishFlags {
        match self {
            PublishType::Unset => (false, false, false, false, false),
            PublishType::NoAction => (true, true, false, false, false),
            PublishType::ArchiveOnly => (true, false, true, false, false),
            PublishType::UploadOnly => (true, false, false, true, false),
            PublishType::HarvestOnly => (true, false, false, false, true),
            PublishType::HarvestArchive => (true, false, true, false, true),
            PublishType::HarvestUpload => (true, false, false, true, true),
            PublishType::HarvestArchiveUpload => (true, false, true, true, true),
            PublishType::UnharvestOnly => (false, true, false, false, true),
            PublishType::DeleteOnly => (false, true, false, true, false),
            PublishType::DeleteUnharvest => (false, true, false, true, true),
        }
    }

    pub fn is_addition_type(self) -> bool {
        self.flags().0
    }

    pub fn is_deletion_type(self) -> bool {
        self.flags().1
    }

    pub fn is_archive_type(self) -> bool {
        self.flags().2
    }

    pub fn is_store_type(self) -> bool {
        self.flags().3
    }

    pub fn is_harvest_type(self) -> bool {
        self.flags().4
    }

    /// Parse the `SCREAMING_SNAKE` spelling used by delete manifests.
    pub fn from_manifest_name(name: &str) -> Option<PublishType> {
        let publish_type = match name {
            "NO_ACTION" => PublishType::NoAction,
            "ARCHIVE_ONLY" => PublishType::ArchiveOnly,
            "UPLOAD_ONLY" => PublishType::UploadOnly,
            "HARVEST_ONLY" => PublishType::HarvestOnly,
            "HARVEST_ARCHIVE" => PublishType::HarvestArchive,
            "HARVEST_UPLOAD" => PublishType::HarvestUpload,
            "HARVEST_ARCHIVE_UPLOAD" => PublishType::HarvestArchiveUpload,
            "UNHARVEST_ONLY" => PublishType::UnharvestOnly,
            "DELETE_ONLY" => PublishType::DeleteOnly,
            "DELETE_UNHARVEST" => PublishType::DeleteUnharvest,
            _ => return None,
        };
        Some(publish_type)
    }
}

impl fmt::Display for PublishType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Immutable result of one check pass over one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    compliant: bool,
    log: Vec<String>,
    errors: bool,
}

impl CheckResult {
    pub fn new(compliant: bool, log: Vec<String>, errors: bool) -> Self {
        Self {
            compliant,
            log,
            errors,
        }
    }

    pub fn compliant_ok() -> Self {
        Self::new(true, Vec::new(), false)
    }

    pub fn compliant(&self) -> bool {
        self.compliant
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn errors(&self) -> bool {
        self.errors
    }
}

/// Known input file kinds, sniffed by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Unknown,
    Csv,
    Gzip,
    Zip,
    Netcdf,
    SimpleManifest,
    MapManifest,
    RsyncManifest,
    DirManifest,
    JsonManifest,
    DeleteManifest,
}

impl FileKind {
    const TABLE: [(FileKind, &'static [&'static str]); 10] = [
        (FileKind::Csv, &[".csv"]),
        (FileKind::Gzip, &[".gz"]),
        (FileKind::Zip, &[".zip"]),
        (FileKind::Netcdf, &[".nc"]),
        (FileKind::SimpleManifest, &[".manifest"]),
        (FileKind::MapManifest, &[".map_manifest"]),
        (FileKind::RsyncManifest, &[".rsync_manifest"]),
        (FileKind::DirManifest, &[".dir_manifest"]),
        (FileKind::JsonManifest, &[".json_manifest"]),
        (FileKind::DeleteManifest, &[".delete_manifest"]),
    ];

    pub fn from_extension(extension: &str) -> FileKind {
        let lowered = extension.to_ascii_lowercase();
        Self::TABLE
            .iter()
            .find(|(_, exts)| exts.contains(&lowered.as_str()))
            .map(|(kind, _)| *kind)
            .unwrap_or(FileKind::Unknown)
    }

    pub fn from_name(name: impl AsRef<Path>) -> FileKind {
        match file_extension(name.as_ref()) {
            Some(ext) => Self::from_extension(&ext),
            None => FileKind::Unknown,
        }
    }

    /// Whether this kind represents a manifest (files referenced in place
    /// rather than extracted into the collection directory).
    pub fn is_manifest(self) -> bool {
        matches!(
            self,
            FileKind::SimpleManifest
                | FileKind::MapManifest
                | FileKind::RsyncManifest
                | FileKind::DirManifest
                | FileKind::JsonManifest
                | FileKind::DeleteManifest
        )
    }
}

/// Extension of a path including the leading dot, mirroring the sniffing
/// table above (`"file.nc"` -> `".nc"`).
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_type_flags_are_consistent() {
        for publish_type in [
            PublishType::ArchiveOnly,
            PublishType::UploadOnly,
            PublishType::HarvestOnly,
            PublishType::HarvestArchive,
            PublishType::HarvestUpload,
            PublishType::HarvestArchiveUpload,
        ] {
            assert!(publish_type.is_addition_type());
            assert!(!publish_type.is_deletion_type());
        }

        for publish_type in [
            PublishType::UnharvestOnly,
            PublishType::DeleteOnly,
            PublishType::DeleteUnharvest,
        ] {
            assert!(publish_type.is_deletion_type());
            assert!(!publish_type.is_addition_type());
        }

        assert!(PublishType::NoAction.is_addition_type());
        assert!(PublishType::NoAction.is_deletion_type());
        assert!(!PublishType::Unset.is_addition_type());
        assert!(!PublishType::Unset.is_deletion_type());
    }

    #[test]
    fn harvest_upload_flags() {
        let publish_type = PublishType::HarvestUpload;
        assert!(!publish_type.is_archive_type());
        assert!(publish_type.is_store_type());
        assert!(publish_type.is_harvest_type());
    }

    #[test]
    fn kind_sniffing_by_extension() {
        assert_eq!(FileKind::from_name("data.zip"), FileKind::Zip);
        assert_eq!(FileKind::from_name("data.ZIP"), FileKind::Zip);
        assert_eq!(FileKind::from_name("data.nc"), FileKind::Netcdf);
        assert_eq!(FileKind::from_name("batch.manifest"), FileKind::SimpleManifest);
        assert_eq!(FileKind::from_name("batch.rsync_manifest"), FileKind::RsyncManifest);
        assert_eq!(FileKind::from_name("data.bin"), FileKind::Unknown);
        assert_eq!(FileKind::from_name("noext"), FileKind::Unknown);
    }

    #[test]
    fn check_type_settable_and_checkable() {
        assert!(!CheckType::Unset.is_settable());
        assert!(CheckType::NoAction.is_settable());
        assert!(!CheckType::NoAction.is_checkable());
        assert!(CheckType::ComplianceCheck.is_checkable());
    }

    #[test]
    fn manifest_publish_type_names() {
        assert_eq!(
            PublishType::from_manifest_name("DELETE_UNHARVEST"),
            Some(PublishType::DeleteUnharvest)
        );
        assert_eq!(PublishType::from_manifest_name("bogus"), None);
    }
}
