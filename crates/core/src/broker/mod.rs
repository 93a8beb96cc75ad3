//! Uniform storage operations over a local filesystem, an S3-compatible
//! object store or an SFTP server.
//!
//! A broker uploads, deletes and queries files below a fixed prefix. A
//! failure for any single file inside a batch surfaces an error naming that
//! file's destination path; the broker never rolls back the rest of the
//! batch. Compensation is the caller's concern.

mod local;
mod retry;
mod s3;
mod sftp;

pub use local::LocalBroker;
pub use retry::RetryPolicy;
pub use s3::S3Broker;
pub use sftp::SftpBroker;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::file::{FileCollection, PipelineFile, RemoteFileMeta};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid storage URL '{0}'")]
    InvalidUrl(String),

    #[error("attribute '{attribute}' not set for file '{file}'")]
    AttributeNotSet { attribute: &'static str, file: String },

    #[error("upload failed for '{dest_path}': {reason}")]
    UploadFailed { dest_path: String, reason: String },

    #[error("delete failed for '{dest_path}': {reason}")]
    DeleteFailed { dest_path: String, reason: String },

    #[error("storage query failed: {0}")]
    Query(String),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("storage credentials missing: {0}")]
    Credentials(&'static str),

    #[error("file has no local source path: '{0}'")]
    NoSourcePath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which target path attribute a storage operation reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Operate on `archive_path`.
    Archive,
    /// Operate on `dest_path`.
    Store,
}

impl StoreMode {
    pub fn dest_of(self, file: &PipelineFile) -> Result<String, BrokerError> {
        let (attribute, value) = match self {
            StoreMode::Archive => ("archive_path", file.archive_path()),
            StoreMode::Store => ("dest_path", file.dest_path()),
        };
        value.ok_or(BrokerError::AttributeNotSet {
            attribute,
            file: file.name().to_string(),
        })
    }
}

/// Status flag set on each file after its storage operation succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessFlag {
    Archived,
    Stored,
    UploadUndone,
}

impl SuccessFlag {
    pub fn apply(self, file: &PipelineFile) {
        match self {
            SuccessFlag::Archived => file.mark_archived(true),
            SuccessFlag::Stored => file.mark_stored(true),
            SuccessFlag::UploadUndone => file.mark_upload_undone(true),
        }
    }
}

/// Storage backend abstraction shared by the archive, harvest and store
/// steps.
#[async_trait]
pub trait StorageBroker: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &str;

    /// Upload every file in the collection, setting `flag` on each file as
    /// it succeeds.
    async fn upload(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError>;

    /// Delete every file in the collection from the backend, setting `flag`
    /// on each file as it succeeds.
    async fn delete(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError>;

    /// List objects below the given prefix (relative to the broker's own
    /// prefix), keyed by absolute destination path.
    async fn query(&self, prefix: &str) -> Result<BTreeMap<String, RemoteFileMeta>, BrokerError>;

    /// Whether an object already exists at the given relative destination
    /// path. Used for overwrite detection only.
    async fn exists(&self, dest_path: &str) -> Result<bool, BrokerError>;
}

/// Select a broker implementation from a storage URL scheme.
///
/// - `file:///abs/path`
/// - `s3://bucket/prefix`
/// - `sftp://host/prefix`
pub fn storage_broker_for_url(url: &str) -> Result<Arc<dyn StorageBroker>, BrokerError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| BrokerError::InvalidUrl(url.to_string()))?;
    match scheme {
        "file" => {
            if !rest.starts_with('/') {
                return Err(BrokerError::InvalidUrl(url.to_string()));
            }
            Ok(Arc::new(LocalBroker::new(rest)))
        }
        "s3" => {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(BrokerError::InvalidUrl(url.to_string()));
            }
            Ok(Arc::new(S3Broker::new(bucket, prefix)))
        }
        "sftp" => {
            let (host, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if host.is_empty() {
                return Err(BrokerError::InvalidUrl(url.to_string()));
            }
            Ok(Arc::new(SftpBroker::new(host, format!("/{}", prefix))))
        }
        _ => Err(BrokerError::InvalidUrl(url.to_string())),
    }
}

/// Join a broker prefix with a relative destination path.
pub(crate) fn join_prefix(prefix: &str, rel_path: &str) -> String {
    if prefix.is_empty() {
        rel_path.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_backend_by_scheme() {
        assert_eq!(storage_broker_for_url("file:///var/upload").unwrap().name(), "local");
        assert_eq!(storage_broker_for_url("s3://bucket/prefix").unwrap().name(), "s3");
        assert_eq!(storage_broker_for_url("sftp://host/prefix").unwrap().name(), "sftp");
    }

    #[test]
    fn factory_rejects_unknown_schemes() {
        assert!(matches!(
            storage_broker_for_url("ftp://host/prefix"),
            Err(BrokerError::InvalidUrl(_))
        ));
        assert!(matches!(
            storage_broker_for_url("not-a-url"),
            Err(BrokerError::InvalidUrl(_))
        ));
        assert!(matches!(
            storage_broker_for_url("file://relative/path"),
            Err(BrokerError::InvalidUrl(_))
        ));
    }

    #[test]
    fn prefix_joining() {
        assert_eq!(join_prefix("/var/upload", "a/b.nc"), "/var/upload/a/b.nc");
        assert_eq!(join_prefix("prefix/", "a/b.nc"), "prefix/a/b.nc");
        assert_eq!(join_prefix("", "a/b.nc"), "a/b.nc");
    }
}
