//! The in-memory file model: every file under management for one handler
//! run, with the intended and performed per-file actions.

mod collection;
mod error;
mod pipeline_file;
mod remote;
mod types;

pub use collection::{FileCollection, StrAttr};
pub use error::FileError;
pub use pipeline_file::{checksum_file, BoolAttr, PipelineFile, UpdateCallback};
pub use remote::{RemoteFile, RemoteFileMeta};
pub use types::{file_extension, CheckResult, CheckType, FileKind, PublishType};
