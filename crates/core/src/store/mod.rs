//! Store step: execute the pending storage operations for a collection
//! against one broker, in either archive or store mode.

use std::sync::Arc;
use tracing::info;

use crate::broker::{BrokerError, StorageBroker, StoreMode, SuccessFlag};
use crate::file::{BoolAttr, FileCollection};

pub struct StoreRunner {
    broker: Arc<dyn StorageBroker>,
    mode: StoreMode,
}

impl StoreRunner {
    pub fn new(broker: Arc<dyn StorageBroker>, mode: StoreMode) -> Self {
        Self { broker, mode }
    }

    pub fn broker(&self) -> &Arc<dyn StorageBroker> {
        &self.broker
    }

    fn pending_addition_attr(&self) -> BoolAttr {
        match self.mode {
            StoreMode::Archive => BoolAttr::PendingArchive,
            StoreMode::Store => BoolAttr::PendingStoreAddition,
        }
    }

    fn addition_flag(&self) -> SuccessFlag {
        match self.mode {
            StoreMode::Archive => SuccessFlag::Archived,
            StoreMode::Store => SuccessFlag::Stored,
        }
    }

    /// Flag files whose upload would overwrite an existing object.
    ///
    /// Informational only; the result is race-prone by nature and is
    /// surfaced in notifications rather than enforced.
    pub async fn set_is_overwrite(&self, files: &FileCollection) -> Result<(), BrokerError> {
        let additions = files.filter_by_bool(self.pending_addition_attr());
        for file in &additions {
            let dest = self.mode.dest_of(file)?;
            file.set_is_overwrite(self.broker.exists(&dest).await?);
        }
        Ok(())
    }

    /// Upload pending additions, then delete pending deletions and any
    /// files whose earlier upload is being compensated.
    pub async fn run(&self, files: &FileCollection) -> Result<(), BrokerError> {
        let additions = files.filter_by_bool(self.pending_addition_attr());
        if !additions.is_empty() {
            info!(
                "uploading {} file(s) via {} broker",
                additions.len(),
                self.broker.name()
            );
            self.broker
                .upload(&additions, self.mode, self.addition_flag())
                .await?;
        }

        let deletions = files.filter_by_bool(BoolAttr::PendingStoreDeletion);
        if !deletions.is_empty() {
            info!("deleting {} file(s)", deletions.len());
            self.broker
                .delete(&deletions, self.mode, SuccessFlag::Stored)
                .await?;
        }

        let undo_deletions = files.filter_by_bool(BoolAttr::PendingUndo);
        if !undo_deletions.is_empty() {
            info!("deleting {} file(s) for upload compensation", undo_deletions.len());
            self.broker
                .delete(&undo_deletions, self.mode, SuccessFlag::UploadUndone)
                .await?;
        }
        Ok(())
    }
}
