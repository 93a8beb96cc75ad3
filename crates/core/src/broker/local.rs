//! Filesystem-backed storage broker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{BrokerError, StorageBroker, StoreMode, SuccessFlag};
use crate::file::{FileCollection, RemoteFileMeta};

/// Stores files below a root directory on the local filesystem.
///
/// Uploads are atomic with respect to readers of the destination tree: the
/// file is copied to a hidden sibling first and renamed into place.
pub struct LocalBroker {
    root: PathBuf,
}

impl LocalBroker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn abs_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    async fn copy_atomic(src: &Path, dest: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let partial = dest.with_file_name(format!(".{}.part", file_name));
        tokio::fs::copy(src, &partial).await?;
        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBroker for LocalBroker {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        for file in files {
            let rel_path = mode.dest_of(&file)?;
            let src = file
                .require_src_path()
                .map_err(|_| BrokerError::NoSourcePath(file.name().to_string()))?;
            let dest = self.abs_path(&rel_path);
            Self::copy_atomic(src, &dest)
                .await
                .map_err(|e| BrokerError::UploadFailed {
                    dest_path: rel_path.clone(),
                    reason: e.to_string(),
                })?;
            debug!("uploaded '{}' -> '{}'", file.name(), dest.display());
            flag.apply(&file);
        }
        Ok(())
    }

    async fn delete(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        for file in files {
            let rel_path = mode.dest_of(&file)?;
            let dest = self.abs_path(&rel_path);
            match tokio::fs::remove_file(&dest).await {
                Ok(()) => {}
                // Deleting an absent object is a no-op, matching object
                // store semantics. Compensation relies on this.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(BrokerError::DeleteFailed {
                        dest_path: rel_path,
                        reason: e.to_string(),
                    })
                }
            }
            debug!("deleted '{}'", dest.display());
            flag.apply(&file);
        }
        Ok(())
    }

    async fn query(&self, prefix: &str) -> Result<BTreeMap<String, RemoteFileMeta>, BrokerError> {
        let start = self.abs_path(prefix);
        // A prefix is a string prefix, not necessarily a directory: walk
        // from the deepest existing directory and filter.
        let walk_root = if start.is_dir() {
            start.clone()
        } else {
            start.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone())
        };

        let mut found = BTreeMap::new();
        if !walk_root.exists() {
            return Ok(found);
        }

        let mut pending = vec![walk_root];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| BrokerError::Query(e.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BrokerError::Query(e.to_string()))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !path.to_string_lossy().starts_with(&*start.to_string_lossy()) {
                    continue;
                }
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| BrokerError::Query(e.to_string()))?;
                let last_modified = meta
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Utc>::from(t));
                found.insert(
                    path.to_string_lossy().to_string(),
                    RemoteFileMeta {
                        last_modified,
                        size: meta.len(),
                    },
                );
            }
        }
        Ok(found)
    }

    async fn exists(&self, dest_path: &str) -> Result<bool, BrokerError> {
        Ok(tokio::fs::try_exists(self.abs_path(dest_path)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{PipelineFile, PublishType};
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn upload_collection(src: PathBuf, dest: &str) -> FileCollection {
        let file = PipelineFile::new(&src).unwrap();
        file.set_publish_type(PublishType::UploadOnly).unwrap();
        file.set_dest_path(dest).unwrap();
        let mut files = FileCollection::new();
        files.add(file).unwrap();
        files
    }

    #[tokio::test]
    async fn upload_then_exists_then_delete() {
        let src_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let src = write_file(src_dir.path(), "a.nc", "data");
        let broker = LocalBroker::new(store_dir.path());

        let files = upload_collection(src, "moorings/a.nc");
        broker
            .upload(&files, StoreMode::Store, SuccessFlag::Stored)
            .await
            .unwrap();
        assert!(files.get(0).unwrap().is_stored());
        assert!(broker.exists("moorings/a.nc").await.unwrap());

        broker
            .delete(&files, StoreMode::Store, SuccessFlag::UploadUndone)
            .await
            .unwrap();
        assert!(!broker.exists("moorings/a.nc").await.unwrap());
        assert!(files.get(0).unwrap().is_upload_undone());
    }

    #[tokio::test]
    async fn delete_of_absent_object_is_noop() {
        let src_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let src = write_file(src_dir.path(), "a.nc", "data");
        let broker = LocalBroker::new(store_dir.path());

        let files = upload_collection(src, "moorings/a.nc");
        broker
            .delete(&files, StoreMode::Store, SuccessFlag::UploadUndone)
            .await
            .unwrap();
        assert!(files.get(0).unwrap().is_upload_undone());
    }

    #[tokio::test]
    async fn upload_without_dest_path_fails() {
        let src_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let src = write_file(src_dir.path(), "a.nc", "data");
        let broker = LocalBroker::new(store_dir.path());

        let file = PipelineFile::new(&src).unwrap();
        let mut files = FileCollection::new();
        files.add(file).unwrap();

        let result = broker.upload(&files, StoreMode::Store, SuccessFlag::Stored).await;
        assert!(matches!(result, Err(BrokerError::AttributeNotSet { .. })));
    }

    #[tokio::test]
    async fn query_lists_files_below_prefix() {
        let src_dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let src = write_file(src_dir.path(), "a.nc", "data");
        let broker = LocalBroker::new(store_dir.path());

        let files = upload_collection(src, "moorings/deep/a.nc");
        broker
            .upload(&files, StoreMode::Store, SuccessFlag::Stored)
            .await
            .unwrap();

        let found = broker.query("moorings").await.unwrap();
        assert_eq!(found.len(), 1);
        let (path, meta) = found.iter().next().unwrap();
        assert!(path.ends_with("moorings/deep/a.nc"));
        assert_eq!(meta.size, 4);
    }
}
