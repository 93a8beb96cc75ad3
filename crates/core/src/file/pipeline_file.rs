//! A single file under pipeline management, tracking the intended actions
//! and the actions that were actually performed.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use super::error::FileError;
use super::types::{file_extension, CheckResult, CheckType, FileKind, PublishType};

/// Progress side channel: `(file name, is_deletion, description)`.
///
/// Invoked on every mutating setter. Used for external progress logging
/// only, never for control flow.
pub type UpdateCallback = Arc<dyn Fn(&str, bool, &str) + Send + Sync>;

/// Names for the boolean projections of a [`PipelineFile`], usable as filter
/// keys on a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolAttr {
    IsDeletion,
    LateDeletion,
    ShouldArchive,
    ShouldStore,
    ShouldHarvest,
    ShouldUndo,
    IsChecked,
    IsArchived,
    IsStored,
    IsHarvested,
    IsHarvestUndone,
    IsUploadUndone,
    PendingArchive,
    PendingStore,
    PendingStoreAddition,
    PendingStoreDeletion,
    PendingStoreUndo,
    PendingHarvest,
    PendingHarvestAddition,
    PendingHarvestDeletion,
    PendingHarvestEarlyDeletion,
    PendingHarvestLateDeletion,
    PendingHarvestUndo,
    PendingUndo,
}

#[derive(Default)]
struct FileState {
    archive_path: Option<String>,
    dest_path: Option<String>,
    check_type: Option<CheckType>,
    publish_type: Option<PublishType>,
    should_archive: bool,
    should_store: bool,
    should_harvest: bool,
    should_undo: bool,
    is_checked: bool,
    is_archived: bool,
    is_stored: bool,
    is_harvested: bool,
    is_overwrite: Option<bool>,
    is_harvest_undone: bool,
    is_upload_undone: bool,
    check_result: Option<CheckResult>,
    update_callback: Option<UpdateCallback>,
}

/// One managed file.
///
/// Identity (source path, name, checksum) is immutable; intent and status
/// flags live behind a mutex so that filtered sub-collections can share the
/// same file instance across steps.
pub struct PipelineFile {
    src_path: Option<PathBuf>,
    name: String,
    extension: String,
    kind: FileKind,
    checksum: Option<String>,
    is_deletion: bool,
    late_deletion: bool,
    state: Mutex<FileState>,
}

impl PipelineFile {
    /// Create an addition record for an existing local file. The checksum is
    /// computed immediately.
    pub fn new(src_path: impl Into<PathBuf>) -> Result<Arc<Self>, FileError> {
        let src_path = src_path.into();
        let name = basename(&src_path);
        Self::with_name(src_path, name)
    }

    /// Create an addition record with an explicit name.
    pub fn with_name(src_path: impl Into<PathBuf>, name: impl Into<String>) -> Result<Arc<Self>, FileError> {
        let src_path = src_path.into();
        if !src_path.is_file() {
            return Err(FileError::MissingFile(src_path));
        }
        let checksum = checksum_file(&src_path)?;
        Ok(Arc::new(Self {
            extension: file_extension(&src_path).unwrap_or_default(),
            kind: FileKind::from_name(&src_path),
            checksum: Some(checksum),
            is_deletion: false,
            late_deletion: false,
            name: name.into(),
            src_path: Some(src_path),
            state: Mutex::new(FileState::default()),
        }))
    }

    /// Create a deletion record for a local path. The file is not required
    /// to exist and is never checksummed.
    pub fn new_deletion(src_path: impl Into<PathBuf>, late_deletion: bool) -> Arc<Self> {
        let src_path = src_path.into();
        Arc::new(Self {
            name: basename(&src_path),
            extension: file_extension(&src_path).unwrap_or_default(),
            kind: FileKind::from_name(&src_path),
            checksum: None,
            is_deletion: true,
            late_deletion,
            src_path: Some(src_path),
            state: Mutex::new(FileState::default()),
        })
    }

    /// Create a deletion record from a remote destination path, e.g. a
    /// storage query result or a delete manifest row. There is no local
    /// source and no checksum.
    pub fn deletion_for_dest(dest_path: impl Into<String>) -> Arc<Self> {
        let dest_path = dest_path.into();
        let name = basename(Path::new(&dest_path));
        let file = Self {
            extension: file_extension(Path::new(&dest_path)).unwrap_or_default(),
            kind: FileKind::from_name(&dest_path),
            checksum: None,
            is_deletion: true,
            late_deletion: false,
            name,
            src_path: None,
            state: Mutex::new(FileState::default()),
        };
        file.state.lock().expect("file state poisoned").dest_path = Some(dest_path);
        Arc::new(file)
    }

    //
    // identity
    //

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn src_path(&self) -> Option<&Path> {
        self.src_path.as_deref()
    }

    /// Source path for steps which only operate on additions.
    pub fn require_src_path(&self) -> Result<&Path, FileError> {
        self.src_path.as_deref().ok_or(FileError::NoSourcePath)
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn is_deletion(&self) -> bool {
        self.is_deletion
    }

    pub fn late_deletion(&self) -> bool {
        self.late_deletion
    }

    //
    // intent
    //

    pub fn dest_path(&self) -> Option<String> {
        self.state().dest_path.clone()
    }

    pub fn set_dest_path(&self, dest_path: impl Into<String>) -> Result<(), FileError> {
        let dest_path = dest_path.into();
        validate_relative("dest_path", &dest_path)?;
        self.state().dest_path = Some(dest_path.clone());
        self.post_update(&format!("dest_path={}", dest_path));
        Ok(())
    }

    pub fn archive_path(&self) -> Option<String> {
        self.state().archive_path.clone()
    }

    pub fn set_archive_path(&self, archive_path: impl Into<String>) -> Result<(), FileError> {
        let archive_path = archive_path.into();
        validate_relative("archive_path", &archive_path)?;
        self.state().archive_path = Some(archive_path.clone());
        self.post_update(&format!("archive_path={}", archive_path));
        Ok(())
    }

    pub fn check_type(&self) -> CheckType {
        self.state().check_type.unwrap_or(CheckType::Unset)
    }

    pub fn set_check_type(&self, check_type: CheckType) -> Result<(), FileError> {
        if self.is_deletion {
            return Err(FileError::CheckTypeOnDeletion);
        }
        if !check_type.is_settable() {
            return Err(FileError::UnsettableCheckType { check_type });
        }
        self.state().check_type = Some(check_type);
        self.post_update(&format!("check_type={:?}", check_type));
        Ok(())
    }

    pub fn publish_type(&self) -> PublishType {
        self.state().publish_type.unwrap_or(PublishType::Unset)
    }

    /// Assign the publish type, deriving the `should_*` projections.
    ///
    /// The publish type must agree with the polarity of the file: a deletion
    /// may only receive a deletion type, an addition only an addition type.
    pub fn set_publish_type(&self, publish_type: PublishType) -> Result<(), FileError> {
        let valid = if self.is_deletion {
            publish_type.is_deletion_type()
        } else {
            publish_type.is_addition_type()
        };
        if !valid {
            return Err(FileError::PublishTypeMismatch {
                name: self.name.clone(),
                is_deletion: self.is_deletion,
                publish_type,
            });
        }

        {
            let mut state = self.state();
            state.should_archive = publish_type.is_archive_type();
            state.should_store = publish_type.is_store_type();
            state.should_harvest = publish_type.is_harvest_type();
            state.publish_type = Some(publish_type);
        }
        self.post_update(&format!("publish_type={}", publish_type));
        Ok(())
    }

    pub fn should_archive(&self) -> bool {
        self.state().should_archive
    }

    pub fn should_store(&self) -> bool {
        self.state().should_store
    }

    pub fn should_harvest(&self) -> bool {
        self.state().should_harvest
    }

    pub fn should_undo(&self) -> bool {
        self.state().should_undo
    }

    pub fn set_should_undo(&self, should_undo: bool) -> Result<(), FileError> {
        if self.is_deletion {
            return Err(FileError::UndoOnDeletion);
        }
        self.state().should_undo = should_undo;
        self.post_update(&format!("should_undo={}", should_undo));
        Ok(())
    }

    //
    // status
    //

    pub fn is_checked(&self) -> bool {
        self.state().is_checked
    }

    pub fn is_archived(&self) -> bool {
        self.state().is_archived
    }

    pub fn mark_archived(&self, is_archived: bool) {
        self.state().is_archived = is_archived;
        self.post_update(&format!("is_archived={}", is_archived));
    }

    pub fn is_stored(&self) -> bool {
        self.state().is_stored
    }

    pub fn mark_stored(&self, is_stored: bool) {
        self.state().is_stored = is_stored;
        self.post_update(&format!("is_stored={}", is_stored));
    }

    pub fn is_harvested(&self) -> bool {
        self.state().is_harvested
    }

    pub fn mark_harvested(&self, is_harvested: bool) {
        self.state().is_harvested = is_harvested;
        self.post_update(&format!("is_harvested={}", is_harvested));
    }

    pub fn is_harvest_undone(&self) -> bool {
        self.state().is_harvest_undone
    }

    pub fn mark_harvest_undone(&self, undone: bool) {
        self.state().is_harvest_undone = undone;
        self.post_update(&format!("is_harvest_undone={}", undone));
    }

    pub fn is_upload_undone(&self) -> bool {
        self.state().is_upload_undone
    }

    pub fn mark_upload_undone(&self, undone: bool) {
        self.state().is_upload_undone = undone;
        self.post_update(&format!("is_upload_undone={}", undone));
    }

    /// Overwrite detection result. `None` until queried from the storage
    /// backend; informational only.
    pub fn is_overwrite(&self) -> Option<bool> {
        self.state().is_overwrite
    }

    pub fn set_is_overwrite(&self, is_overwrite: bool) {
        self.state().is_overwrite = Some(is_overwrite);
        self.post_update(&format!("is_overwrite={}", is_overwrite));
    }

    pub fn check_result(&self) -> Option<CheckResult> {
        self.state().check_result.clone()
    }

    /// Record the result of a check pass; also flips `is_checked`.
    pub fn set_check_result(&self, check_result: CheckResult) {
        {
            let mut state = self.state();
            state.is_checked = true;
            state.check_result = Some(check_result);
        }
        self.post_update("is_checked=true");
    }

    pub fn check_passed(&self) -> Option<bool> {
        self.state().check_result.as_ref().map(CheckResult::compliant)
    }

    pub fn check_log(&self) -> String {
        self.state()
            .check_result
            .as_ref()
            .map(|r| r.log().join("\n"))
            .unwrap_or_default()
    }

    //
    // derived projections
    //

    pub fn is_uploaded(&self) -> bool {
        !self.is_deletion && self.is_stored()
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deletion && self.is_stored()
    }

    /// Whether the file reached its intended published state.
    pub fn published(&self) -> bool {
        let state = self.state();
        let stored = state.is_stored && !state.is_upload_undone;
        let harvested = state.is_harvested && !state.is_harvest_undone;
        if state.should_store && state.should_harvest {
            stored && harvested
        } else {
            stored || harvested
        }
    }

    pub fn pending_archive(&self) -> bool {
        let state = self.state();
        state.should_archive && !state.is_archived
    }

    pub fn pending_store(&self) -> bool {
        let state = self.state();
        state.should_store && !state.is_stored && !state.should_undo
    }

    pub fn pending_store_addition(&self) -> bool {
        self.pending_store() && !self.is_deletion
    }

    pub fn pending_store_deletion(&self) -> bool {
        self.pending_store() && self.is_deletion
    }

    pub fn pending_store_undo(&self) -> bool {
        let state = self.state();
        state.should_undo && state.should_store && !state.is_upload_undone
    }

    pub fn pending_harvest(&self) -> bool {
        let state = self.state();
        state.should_harvest && !state.is_harvested && !state.should_undo
    }

    pub fn pending_harvest_addition(&self) -> bool {
        self.pending_harvest() && !self.is_deletion
    }

    pub fn pending_harvest_deletion(&self) -> bool {
        self.pending_harvest() && self.is_deletion
    }

    pub fn pending_harvest_early_deletion(&self) -> bool {
        self.pending_harvest_deletion() && !self.late_deletion
    }

    pub fn pending_harvest_late_deletion(&self) -> bool {
        self.pending_harvest_deletion() && self.late_deletion
    }

    pub fn pending_harvest_undo(&self) -> bool {
        let state = self.state();
        state.should_undo && state.should_harvest && !state.is_harvest_undone
    }

    pub fn pending_undo(&self) -> bool {
        self.pending_harvest_undo() || self.pending_store_undo()
    }

    /// Resolve a named boolean projection.
    pub fn bool_attr(&self, attr: BoolAttr) -> bool {
        match attr {
            BoolAttr::IsDeletion => self.is_deletion(),
            BoolAttr::LateDeletion => self.late_deletion(),
            BoolAttr::ShouldArchive => self.should_archive(),
            BoolAttr::ShouldStore => self.should_store(),
            BoolAttr::ShouldHarvest => self.should_harvest(),
            BoolAttr::ShouldUndo => self.should_undo(),
            BoolAttr::IsChecked => self.is_checked(),
            BoolAttr::IsArchived => self.is_archived(),
            BoolAttr::IsStored => self.is_stored(),
            BoolAttr::IsHarvested => self.is_harvested(),
            BoolAttr::IsHarvestUndone => self.is_harvest_undone(),
            BoolAttr::IsUploadUndone => self.is_upload_undone(),
            BoolAttr::PendingArchive => self.pending_archive(),
            BoolAttr::PendingStore => self.pending_store(),
            BoolAttr::PendingStoreAddition => self.pending_store_addition(),
            BoolAttr::PendingStoreDeletion => self.pending_store_deletion(),
            BoolAttr::PendingStoreUndo => self.pending_store_undo(),
            BoolAttr::PendingHarvest => self.pending_harvest(),
            BoolAttr::PendingHarvestAddition => self.pending_harvest_addition(),
            BoolAttr::PendingHarvestDeletion => self.pending_harvest_deletion(),
            BoolAttr::PendingHarvestEarlyDeletion => self.pending_harvest_early_deletion(),
            BoolAttr::PendingHarvestLateDeletion => self.pending_harvest_late_deletion(),
            BoolAttr::PendingHarvestUndo => self.pending_harvest_undo(),
            BoolAttr::PendingUndo => self.pending_undo(),
        }
    }

    pub fn set_update_callback(&self, callback: UpdateCallback) {
        self.state().update_callback = Some(callback);
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FileState> {
        self.state.lock().expect("file state poisoned")
    }

    fn post_update(&self, description: &str) {
        let callback = self.state().update_callback.clone();
        if let Some(callback) = callback {
            callback(&self.name, self.is_deletion, description);
        }
    }
}

impl fmt::Debug for PipelineFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineFile")
            .field("name", &self.name)
            .field("src_path", &self.src_path)
            .field("is_deletion", &self.is_deletion)
            .field("dest_path", &self.dest_path())
            .field("publish_type", &self.publish_type())
            .finish()
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn validate_relative(attribute: &'static str, path: &str) -> Result<(), FileError> {
    if Path::new(path).is_absolute() {
        return Err(FileError::AbsolutePath {
            attribute,
            path: path.to_string(),
        });
    }
    Ok(())
}

/// SHA-256 hex digest of a file's contents.
pub fn checksum_file(path: &Path) -> Result<String, FileError> {
    let mut file = File::open(path).map_err(|source| FileError::Checksum {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|source| FileError::Checksum {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_file(name: &str, contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn checksum_computed_at_creation() {
        let (_dir, path) = temp_file("a.nc", b"contents");
        let file = PipelineFile::new(&path).unwrap();
        assert!(file.checksum().is_some());
        assert_eq!(file.name(), "a.nc");
        assert_eq!(file.kind(), FileKind::Netcdf);
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = PipelineFile::new("/nonexistent/file.nc").unwrap_err();
        assert!(matches!(err, FileError::MissingFile(_)));
    }

    #[test]
    fn deletions_are_never_checksummed() {
        let file = PipelineFile::new_deletion("/some/gone/file.nc", false);
        assert!(file.checksum().is_none());
        assert!(file.is_deletion());
    }

    #[test]
    fn absolute_dest_path_is_rejected() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let file = PipelineFile::new(&path).unwrap();
        assert!(matches!(
            file.set_dest_path("/absolute/path.nc"),
            Err(FileError::AbsolutePath { .. })
        ));
        assert!(file.set_dest_path("relative/path.nc").is_ok());
        assert!(matches!(
            file.set_archive_path("/absolute/path.nc"),
            Err(FileError::AbsolutePath { .. })
        ));
    }

    #[test]
    fn publish_type_polarity_is_enforced() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let addition = PipelineFile::new(&path).unwrap();
        assert!(matches!(
            addition.set_publish_type(PublishType::DeleteUnharvest),
            Err(FileError::PublishTypeMismatch { .. })
        ));
        addition.set_publish_type(PublishType::HarvestUpload).unwrap();

        let deletion = PipelineFile::new_deletion("/gone.nc", false);
        assert!(matches!(
            deletion.set_publish_type(PublishType::HarvestUpload),
            Err(FileError::PublishTypeMismatch { .. })
        ));
        deletion.set_publish_type(PublishType::DeleteUnharvest).unwrap();
    }

    #[test]
    fn unset_cannot_be_assigned() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let file = PipelineFile::new(&path).unwrap();
        assert!(file.set_publish_type(PublishType::Unset).is_err());
    }

    #[test]
    fn pending_projections_follow_status_flags() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let file = PipelineFile::new(&path).unwrap();
        file.set_publish_type(PublishType::HarvestUpload).unwrap();

        assert!(file.pending_harvest());
        assert!(file.pending_store());
        assert!(!file.pending_archive());

        file.mark_harvested(true);
        assert!(!file.pending_harvest());
        assert!(file.pending_store());

        file.mark_stored(true);
        assert!(!file.pending_store());
        assert!(file.published());
    }

    #[test]
    fn undo_excludes_from_pending_and_is_tracked() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let file = PipelineFile::new(&path).unwrap();
        file.set_publish_type(PublishType::HarvestUpload).unwrap();
        file.mark_harvested(true);
        file.mark_stored(true);

        file.set_should_undo(true).unwrap();
        assert!(file.pending_harvest_undo());
        assert!(file.pending_store_undo());
        assert!(!file.pending_harvest());
        assert!(!file.pending_store());

        file.mark_harvest_undone(true);
        file.mark_upload_undone(true);
        assert!(!file.pending_undo());
        assert!(!file.published());
    }

    #[test]
    fn deletion_cannot_undo() {
        let deletion = PipelineFile::new_deletion("/gone.nc", false);
        assert!(matches!(deletion.set_should_undo(true), Err(FileError::UndoOnDeletion)));
    }

    #[test]
    fn check_result_flips_is_checked() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let file = PipelineFile::new(&path).unwrap();
        assert!(!file.is_checked());
        file.set_check_result(CheckResult::new(false, vec!["bad".into()], false));
        assert!(file.is_checked());
        assert_eq!(file.check_passed(), Some(false));
        assert_eq!(file.check_log(), "bad");
    }

    #[test]
    fn update_callback_fires_on_mutation() {
        let (_dir, path) = temp_file("a.nc", b"x");
        let file = PipelineFile::new(&path).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        file.set_update_callback(Arc::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        file.set_dest_path("a/b.nc").unwrap();
        file.mark_stored(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
