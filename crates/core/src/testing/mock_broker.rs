//! Mock storage broker for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::broker::{BrokerError, StorageBroker, StoreMode, SuccessFlag};
use crate::file::{FileCollection, RemoteFileMeta};

/// In-memory [`StorageBroker`] with scriptable failures.
///
/// Records every upload and delete in order, keeps an object map for
/// `query`/`exists`, and can be told to fail operations for specific
/// destination paths.
#[derive(Default)]
pub struct MockBroker {
    objects: Mutex<BTreeMap<String, RemoteFileMeta>>,
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_uploads: Mutex<BTreeSet<String>>,
    fail_deletes: Mutex<BTreeSet<String>>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-populate an object, as if a previous run had uploaded it.
    pub fn seed_object(&self, dest_path: &str, size: u64) {
        self.objects.lock().unwrap().insert(
            dest_path.to_string(),
            RemoteFileMeta {
                last_modified: Some(Utc::now()),
                size,
            },
        );
    }

    /// Fail any upload targeting this destination path.
    pub fn fail_upload_for(&self, dest_path: &str) {
        self.fail_uploads
            .lock()
            .unwrap()
            .insert(dest_path.to_string());
    }

    /// Fail any delete targeting this destination path.
    pub fn fail_delete_for(&self, dest_path: &str) {
        self.fail_deletes
            .lock()
            .unwrap()
            .insert(dest_path.to_string());
    }

    /// Destination paths uploaded so far, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    /// Destination paths deleted so far, in order.
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    /// Whether an object currently exists at this destination path.
    pub fn contains(&self, dest_path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(dest_path)
    }
}

#[async_trait]
impl StorageBroker for MockBroker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        for file in files {
            let dest_path = mode.dest_of(file)?;
            if self.fail_uploads.lock().unwrap().contains(&dest_path) {
                return Err(BrokerError::UploadFailed {
                    dest_path,
                    reason: "scripted upload failure".to_string(),
                });
            }
            let size = file
                .src_path()
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.len())
                .unwrap_or(0);
            self.objects.lock().unwrap().insert(
                dest_path.clone(),
                RemoteFileMeta {
                    last_modified: Some(Utc::now()),
                    size,
                },
            );
            self.uploads.lock().unwrap().push(dest_path);
            flag.apply(file);
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
            let dest_path = mode.dest_of(file)?;
            if self.fail_deletes.lock().unwrap().contains(&dest_path) {
                return Err(BrokerError::DeleteFailed {
                    dest_path,
                    reason: "scripted delete failure".to_string(),
                });
            }
            // Absent objects are a no-op, as on the real backends.
            self.objects.lock().unwrap().remove(&dest_path);
            self.deletes.lock().unwrap().push(dest_path);
            flag.apply(file);
        }
        Ok(())
    }

    async fn query(&self, prefix: &str) -> Result<BTreeMap<String, RemoteFileMeta>, BrokerError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, meta)| (key.clone(), meta.clone()))
            .collect())
    }

    async fn exists(&self, dest_path: &str) -> Result<bool, BrokerError> {
        Ok(self.contains(dest_path))
    }
}
