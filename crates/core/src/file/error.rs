//! Error type for the file model.

use std::path::PathBuf;

use super::types::{CheckType, PublishType};

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Target paths are always relative to the storage prefix.
    #[error("'{attribute}' must be a relative path, got '{path}'")]
    AbsolutePath { attribute: &'static str, path: String },

    /// Polarity mismatch between the file and the assigned publish type.
    #[error("publish type {publish_type} is not valid for {} '{name}'", if *is_deletion { "deletion" } else { "addition" })]
    PublishTypeMismatch {
        name: String,
        is_deletion: bool,
        publish_type: PublishType,
    },

    #[error("check type {check_type:?} cannot be assigned")]
    UnsettableCheckType { check_type: CheckType },

    #[error("deletions cannot be assigned a check type")]
    CheckTypeOnDeletion,

    #[error("undo is not possible for deletions")]
    UndoOnDeletion,

    #[error("'{name}' already in collection")]
    DuplicateFile { name: String },

    #[error("'{attribute}' value '{value}' already set for file(s) {files:?}")]
    DuplicateAttribute {
        attribute: &'static str,
        value: String,
        files: Vec<String>,
    },

    #[error("invalid '{attribute}' values found for files: {unmatched:?}")]
    AttributeNotMatched {
        attribute: &'static str,
        unmatched: Vec<String>,
    },

    #[error("publish type not set for file(s): {files:?}")]
    PublishTypeUnset { files: Vec<String> },

    #[error("file '{0}' doesn't exist")]
    MissingFile(PathBuf),

    #[error("failed to checksum '{path}': {source}")]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file has no source path")]
    NoSourcePath,

    #[error("path function failed: {0}")]
    PathFunction(String),
}
