//! Insertion-ordered collection of [`PipelineFile`] instances.
//!
//! Files are shared (`Arc`) so that filtered sub-collections refer to the
//! same underlying state as the handler's main collection. Every filter
//! returns a new collection and never mutates in place; order is preserved
//! throughout, which keeps test output and undo ordering deterministic.

use std::path::Path;
use std::sync::Arc;

use regex_lite::Regex;

use super::error::FileError;
use super::pipeline_file::{BoolAttr, PipelineFile, UpdateCallback};
use super::types::{CheckType, FileKind, PublishType};

/// String-valued attributes usable as regex filter keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrAttr {
    Name,
    SrcPath,
    DestPath,
    ArchivePath,
}

fn str_attr(file: &PipelineFile, attr: StrAttr) -> Option<String> {
    match attr {
        StrAttr::Name => Some(file.name().to_string()),
        StrAttr::SrcPath => file.src_path().map(|p| p.to_string_lossy().into_owned()),
        StrAttr::DestPath => file.dest_path(),
        StrAttr::ArchivePath => file.archive_path(),
    }
}

#[derive(Default, Clone)]
pub struct FileCollection {
    files: Vec<Arc<PipelineFile>>,
}

impl FileCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PipelineFile>> {
        self.files.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<PipelineFile>> {
        self.files.get(index)
    }

    pub fn contains(&self, file: &Arc<PipelineFile>) -> bool {
        self.files.iter().any(|f| Arc::ptr_eq(f, file))
    }

    pub fn by_src_path(&self, src_path: impl AsRef<Path>) -> Option<&Arc<PipelineFile>> {
        let src_path = src_path.as_ref();
        self.files.iter().find(|f| f.src_path() == Some(src_path))
    }

    pub fn by_dest_path(&self, dest_path: &str) -> Option<&Arc<PipelineFile>> {
        self.files
            .iter()
            .find(|f| f.dest_path().as_deref() == Some(dest_path))
    }

    /// Add a constructed file.
    ///
    /// Rejects a second file with the same source path, or a duplicate
    /// non-empty `dest_path`/`archive_path`, unless `overwrite` replaces the
    /// existing entry.
    pub fn add(&mut self, file: Arc<PipelineFile>) -> Result<(), FileError> {
        self.add_impl(file, false)
    }

    pub fn add_or_replace(&mut self, file: Arc<PipelineFile>) -> Result<(), FileError> {
        self.add_impl(file, true)
    }

    fn add_impl(&mut self, file: Arc<PipelineFile>, overwrite: bool) -> Result<(), FileError> {
        let existing = self.files.iter().position(|f| {
            Arc::ptr_eq(f, &file)
                || (file.src_path().is_some() && f.src_path() == file.src_path())
        });
        match existing {
            Some(index) if overwrite => {
                self.files.remove(index);
            }
            Some(_) => {
                return Err(FileError::DuplicateFile {
                    name: file.name().to_string(),
                });
            }
            None => {}
        }

        if let Some(dest_path) = file.dest_path() {
            self.validate_unique_value(StrAttr::DestPath, "dest_path", &dest_path)?;
        }
        if let Some(archive_path) = file.archive_path() {
            self.validate_unique_value(StrAttr::ArchivePath, "archive_path", &archive_path)?;
        }

        self.files.push(file);
        Ok(())
    }

    /// Add an addition record for an existing local file path.
    pub fn add_path(&mut self, src_path: impl AsRef<Path>) -> Result<(), FileError> {
        self.add(PipelineFile::new(src_path.as_ref())?)
    }

    /// Add a deletion record for a local file path (which need not exist).
    pub fn add_deletion_path(&mut self, src_path: impl AsRef<Path>) -> Result<(), FileError> {
        self.add(PipelineFile::new_deletion(src_path.as_ref(), false))
    }

    /// Remove a file if present. Returns whether it was in the collection.
    pub fn discard(&mut self, file: &Arc<PipelineFile>) -> bool {
        let before = self.files.len();
        self.files.retain(|f| !Arc::ptr_eq(f, file));
        before != self.files.len()
    }

    /// Add all files of another collection, replacing matching entries.
    pub fn update(&mut self, other: &FileCollection) -> Result<(), FileError> {
        for file in other.iter() {
            self.add_or_replace(Arc::clone(file))?;
        }
        Ok(())
    }

    //
    // set algebra
    //

    pub fn union(&self, other: &FileCollection) -> FileCollection {
        let mut result = self.clone();
        for file in other.iter() {
            if !result.contains(file) {
                result.files.push(Arc::clone(file));
            }
        }
        result
    }

    pub fn difference(&self, other: &FileCollection) -> FileCollection {
        FileCollection {
            files: self
                .files
                .iter()
                .filter(|f| !other.contains(f))
                .cloned()
                .collect(),
        }
    }

    pub fn is_subset(&self, other: &FileCollection) -> bool {
        self.files.iter().all(|f| other.contains(f))
    }

    pub fn is_superset(&self, other: &FileCollection) -> bool {
        other.is_subset(self)
    }

    /// Slice into consecutive collections of at most `slice_size` files.
    pub fn slices(&self, slice_size: usize) -> Vec<FileCollection> {
        assert!(slice_size > 0, "slice_size must be positive");
        self.files
            .chunks(slice_size)
            .map(|chunk| FileCollection {
                files: chunk.to_vec(),
            })
            .collect()
    }

    //
    // filters; each returns a new collection
    //

    pub fn filter(&self, predicate: impl Fn(&PipelineFile) -> bool) -> FileCollection {
        FileCollection {
            files: self
                .files
                .iter()
                .filter(|f| predicate(f))
                .cloned()
                .collect(),
        }
    }

    pub fn filter_by_check_type(&self, check_type: CheckType) -> FileCollection {
        self.filter(|f| f.check_type() == check_type)
    }

    pub fn filter_by_kind(&self, kind: FileKind) -> FileCollection {
        self.filter(|f| f.kind() == kind)
    }

    pub fn filter_by_publish_type(&self, publish_type: PublishType) -> FileCollection {
        self.filter(|f| f.publish_type() == publish_type)
    }

    pub fn filter_by_extension(&self, extension: &str) -> FileCollection {
        self.filter(|f| f.extension().eq_ignore_ascii_case(extension))
    }

    /// Files whose string attribute matches at least one of the patterns.
    /// Files without a value for the attribute never match.
    pub fn filter_by_regexes(&self, attr: StrAttr, regexes: &[Regex]) -> FileCollection {
        self.filter(|f| match str_attr(f, attr) {
            Some(value) => regexes.iter().any(|re| re.is_match(&value)),
            None => false,
        })
    }

    pub fn filter_by_bool(&self, attr: BoolAttr) -> FileCollection {
        self.filter(|f| f.bool_attr(attr))
    }

    pub fn filter_by_bool_not(&self, attrs: &[BoolAttr]) -> FileCollection {
        self.filter(|f| !attrs.iter().any(|&a| f.bool_attr(a)))
    }

    pub fn filter_by_bool_and(&self, attrs: &[BoolAttr]) -> FileCollection {
        self.filter(|f| attrs.iter().all(|&a| f.bool_attr(a)))
    }

    pub fn filter_by_bool_and_not(
        &self,
        true_attrs: &[BoolAttr],
        false_attrs: &[BoolAttr],
    ) -> FileCollection {
        self.filter(|f| {
            true_attrs.iter().all(|&a| f.bool_attr(a))
                && !false_attrs.iter().any(|&a| f.bool_attr(a))
        })
    }

    pub fn filter_by_bool_or(&self, attrs: &[BoolAttr]) -> FileCollection {
        self.filter(|f| attrs.iter().any(|&a| f.bool_attr(a)))
    }

    pub fn additions(&self) -> FileCollection {
        self.filter(|f| !f.is_deletion())
    }

    pub fn deletions(&self) -> FileCollection {
        self.filter(|f| f.is_deletion())
    }

    //
    // bulk setters
    //

    pub fn set_update_callback(&self, callback: UpdateCallback) {
        for file in &self.files {
            file.set_update_callback(Arc::clone(&callback));
        }
    }

    /// Assign publish types from the include/exclude name filter. Files that
    /// do not match keep whatever publish type they already have.
    pub fn set_publish_types_from_regexes(
        &self,
        include_regexes: &[Regex],
        exclude_regexes: &[Regex],
        addition_type: PublishType,
        deletion_type: PublishType,
    ) -> Result<(), FileError> {
        for file in &self.files {
            let name = file.name();
            let included = include_regexes.iter().any(|re| re.is_match(name))
                && !exclude_regexes.iter().any(|re| re.is_match(name));
            if included {
                let publish_type = if file.is_deletion() {
                    deletion_type
                } else {
                    addition_type
                };
                file.set_publish_type(publish_type)?;
            }
        }
        Ok(())
    }

    pub fn set_publish_types(&self, publish_type: PublishType) -> Result<(), FileError> {
        for file in &self.files {
            file.set_publish_type(publish_type)?;
        }
        Ok(())
    }

    /// Assign the default check type for every addition: netcdf files are
    /// routed to the compliance engine when compliance checks are
    /// configured, everything else gets a format check.
    pub fn set_default_check_types(&self, compliance_checks_configured: bool) -> Result<(), FileError> {
        let netcdf_check = if compliance_checks_configured {
            CheckType::ComplianceCheck
        } else {
            CheckType::FormatCheck
        };
        for file in self.additions().iter() {
            let check_type = if file.kind() == FileKind::Netcdf {
                netcdf_check
            } else {
                CheckType::FormatCheck
            };
            file.set_check_type(check_type)?;
        }
        Ok(())
    }

    pub fn set_check_types(&self, check_type: CheckType) -> Result<(), FileError> {
        for file in self.additions().iter() {
            file.set_check_type(check_type)?;
        }
        Ok(())
    }

    /// Compute and assign archive paths for files pending archival which do
    /// not already carry one, enforcing uniqueness before each assignment.
    pub fn set_archive_paths(
        &self,
        archive_path_fn: impl Fn(&Path) -> Result<String, FileError>,
    ) -> Result<(), FileError> {
        for file in &self.files {
            if file.should_archive() && file.archive_path().is_none() {
                let candidate = archive_path_fn(file.require_src_path()?)?;
                self.validate_unique_value(StrAttr::ArchivePath, "archive_path", &candidate)?;
                file.set_archive_path(candidate)?;
            }
        }
        Ok(())
    }

    /// As [`set_archive_paths`], for publishing destination paths.
    pub fn set_dest_paths(
        &self,
        dest_path_fn: impl Fn(&Path) -> Result<String, FileError>,
    ) -> Result<(), FileError> {
        for file in &self.files {
            if file.dest_path().is_none() && (file.should_store() || file.should_harvest()) {
                let candidate = dest_path_fn(file.require_src_path()?)?;
                self.validate_unique_value(StrAttr::DestPath, "dest_path", &candidate)?;
                file.set_dest_path(candidate)?;
            }
        }
        Ok(())
    }

    //
    // validation
    //

    fn validate_unique_value(
        &self,
        attr: StrAttr,
        attribute: &'static str,
        value: &str,
    ) -> Result<(), FileError> {
        let duplicates: Vec<String> = self
            .files
            .iter()
            .filter(|f| str_attr(f, attr).as_deref() == Some(value))
            .map(|f| f.name().to_string())
            .collect();
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(FileError::DuplicateAttribute {
                attribute,
                value: value.to_string(),
                files: duplicates,
            })
        }
    }

    /// Check that the given attribute is unique across the collection,
    /// ignoring files without a value.
    pub fn validate_attribute_uniqueness(&self, attr: StrAttr, attribute: &'static str) -> Result<(), FileError> {
        let mut seen: Vec<(String, &str)> = Vec::new();
        let mut duplicates: Vec<String> = Vec::new();
        for file in &self.files {
            if let Some(value) = str_attr(file, attr) {
                if let Some((_, first)) = seen.iter().find(|(v, _)| *v == value) {
                    duplicates.push((*first).to_string());
                    duplicates.push(file.name().to_string());
                } else {
                    seen.push((value, file.name()));
                }
            }
        }
        if duplicates.is_empty() {
            Ok(())
        } else {
            duplicates.dedup();
            Err(FileError::DuplicateAttribute {
                attribute,
                value: String::new(),
                files: duplicates,
            })
        }
    }

    /// Check that every file with a value for the attribute matches at
    /// least one of the allow-list patterns.
    pub fn validate_attribute_matches_regexes(
        &self,
        attr: StrAttr,
        attribute: &'static str,
        regexes: &[Regex],
    ) -> Result<(), FileError> {
        let unmatched: Vec<String> = self
            .files
            .iter()
            .filter_map(|f| str_attr(f, attr).map(|value| (f.name().to_string(), value)))
            .filter(|(_, value)| !regexes.iter().any(|re| re.is_match(value)))
            .map(|(name, value)| format!("{}: '{}'", name, value))
            .collect();
        if unmatched.is_empty() {
            Ok(())
        } else {
            Err(FileError::AttributeNotMatched { attribute, unmatched })
        }
    }

    /// Check that every addition has been assigned a publish type.
    pub fn validate_publish_types_set(&self) -> Result<(), FileError> {
        let unset: Vec<String> = self
            .additions()
            .iter()
            .filter(|f| f.publish_type() == PublishType::Unset)
            .map(|f| f.name().to_string())
            .collect();
        if unset.is_empty() {
            Ok(())
        } else {
            Err(FileError::PublishTypeUnset { files: unset })
        }
    }

    //
    // evidence
    //

    /// Per-file evidence table for the notification payload.
    pub fn table_data(&self) -> (Vec<&'static str>, Vec<Vec<String>>) {
        let columns = vec![
            "name",
            "dest_path",
            "check_passed",
            "published",
        ];
        let rows = self
            .files
            .iter()
            .map(|f| {
                vec![
                    f.name().to_string(),
                    f.dest_path().unwrap_or_default(),
                    f.check_passed()
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "N/A".to_string()),
                    if f.published() { "Yes" } else { "No" }.to_string(),
                ]
            })
            .collect();
        (columns, rows)
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name().to_string()).collect()
    }
}

impl FromIterator<Arc<PipelineFile>> for FileCollection {
    fn from_iter<T: IntoIterator<Item = Arc<PipelineFile>>>(iter: T) -> Self {
        FileCollection {
            files: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FileCollection {
    type Item = &'a Arc<PipelineFile>;
    type IntoIter = std::slice::Iter<'a, Arc<PipelineFile>>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

impl std::fmt::Debug for FileCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.files.iter()).finish()
    }
}
