//! Harvest step: drive external catalog executors over the collection,
//! with compensation when a later executor fails.
//!
//! Files pending harvest are processed in slices, early deletions first,
//! then additions, then late deletions. Each slice is matched against the
//! configured harvesters; a slice containing files no harvester claims is
//! an error before any executor runs. When an addition event's executor
//! fails, the failing event and (by default) every previously committed
//! event are compensated: re-run against an empty staging tree to
//! unregister the catalog entries, then any files already uploaded under
//! them are deleted again. Archive and store actions outside the harvest
//! scope are never rolled back.

mod executor;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{BrokerError, StorageBroker, StoreMode, SuccessFlag};
use crate::config::HarvesterConfig;
use crate::file::{BoolAttr, FileCollection, FileError, StrAttr};
use regex_lite::Regex;

pub const DEFAULT_SLICE_SIZE: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("no matching harvester(s) found for: {}", files.join(", "))]
    UnmappedFiles { files: Vec<String> },

    #[error("harvester '{harvester}' executor failed: {output}")]
    ExecutorFailed { harvester: String, output: String },

    #[error("file '{file}' has no dest_path for harvest staging")]
    MissingDestPath { file: String },

    #[error("harvester pattern '{pattern}' does not compile: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runtime parameters for the harvest step.
#[derive(Debug, Clone)]
pub struct HarvestParams {
    /// Max files handed to one executor invocation.
    pub slice_size: usize,

    /// Whether compensation also undoes events committed by earlier
    /// slices of the same run.
    pub undo_previous_slices: bool,
}

impl Default for HarvestParams {
    fn default() -> Self {
        Self {
            slice_size: DEFAULT_SLICE_SIZE,
            undo_previous_slices: true,
        }
    }
}

/// One executor invocation's worth of matched files.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub matched_files: FileCollection,
    pub extra_params: Option<String>,
}

/// Ordered harvester name → trigger events. Order follows the harvester
/// declaration order in the configuration.
#[derive(Debug, Clone, Default)]
pub struct HarvesterMap {
    entries: Vec<(String, Vec<TriggerEvent>)>,
}

impl HarvesterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_event(&mut self, harvester: &str, event: TriggerEvent) {
        match self.entries.iter_mut().find(|(name, _)| name == harvester) {
            Some((_, events)) => events.push(event),
            None => self.entries.push((harvester.to_string(), vec![event])),
        }
    }

    pub fn merge(&mut self, other: HarvesterMap) {
        for (harvester, events) in other.entries {
            for event in events {
                self.add_event(&harvester, event);
            }
        }
    }

    pub fn entries(&self) -> &[(String, Vec<TriggerEvent>)] {
        &self.entries
    }

    /// Flattened collection of every file in every event.
    pub fn all_files(&self) -> FileCollection {
        let mut all = FileCollection::new();
        for (_, events) in &self.entries {
            for event in events {
                all = all.union(&event.matched_files);
            }
        }
        all
    }

    fn mark_should_undo(&self) -> Result<(), FileError> {
        for (_, events) in &self.entries {
            for event in events {
                for file in &event.matched_files {
                    file.set_should_undo(true)?;
                }
            }
        }
        Ok(())
    }
}

pub struct HarvestRunner {
    broker: Arc<dyn StorageBroker>,
    harvesters: Vec<HarvesterConfig>,
    tmp_base_dir: PathBuf,
    log_dir: PathBuf,
    params: HarvestParams,
    /// Events whose executors have already succeeded in this run.
    committed: HarvesterMap,
}

impl HarvestRunner {
    pub fn new(
        broker: Arc<dyn StorageBroker>,
        harvesters: Vec<HarvesterConfig>,
        tmp_base_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        params: HarvestParams,
    ) -> Self {
        Self {
            broker,
            harvesters,
            tmp_base_dir: tmp_base_dir.into(),
            log_dir: log_dir.into(),
            params,
            committed: HarvesterMap::new(),
        }
    }

    pub async fn run(&mut self, files: &FileCollection) -> Result<(), HarvestError> {
        let deletions = files.filter_by_bool(BoolAttr::PendingHarvestEarlyDeletion);
        let additions = files.filter_by_bool(BoolAttr::PendingHarvestAddition);
        let late_deletions = files.filter_by_bool(BoolAttr::PendingHarvestLateDeletion);

        info!(
            "harvesting {} deletion(s), {} addition(s), {} late deletion(s), slice size {}",
            deletions.len(),
            additions.len(),
            late_deletions.len(),
            self.params.slice_size
        );

        for slice in deletions.slices(self.params.slice_size) {
            let map = self.match_files(&slice)?;
            validate_mapping(&slice, &map)?;
            self.run_deletions(map).await?;
        }
        for slice in additions.slices(self.params.slice_size) {
            let map = self.match_files(&slice)?;
            validate_mapping(&slice, &map)?;
            self.run_additions(map).await?;
        }
        for slice in late_deletions.slices(self.params.slice_size) {
            let map = self.match_files(&slice)?;
            validate_mapping(&slice, &map)?;
            self.run_deletions(map).await?;
        }
        Ok(())
    }

    /// Match a slice against the configured harvesters by `dest_path`.
    fn match_files(&self, files: &FileCollection) -> Result<HarvesterMap, HarvestError> {
        let mut map = HarvesterMap::new();
        for harvester in &self.harvesters {
            for event in &harvester.events {
                let mut regexes = Vec::with_capacity(event.regexes.len());
                for pattern in &event.regexes {
                    regexes.push(Regex::new(pattern).map_err(|e| HarvestError::Pattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?);
                }
                let matched = files.filter_by_regexes(StrAttr::DestPath, &regexes);
                if matched.is_empty() {
                    continue;
                }
                for file in &matched {
                    info!("harvester '{}' matched file: {}", harvester.name, file.name());
                }
                map.add_event(
                    &harvester.name,
                    TriggerEvent {
                        matched_files: matched,
                        extra_params: event.extra_params.clone(),
                    },
                );
            }
        }
        Ok(map)
    }

    fn exec_template(&self, harvester: &str) -> &str {
        self.harvesters
            .iter()
            .find(|h| h.name == harvester)
            .map(|h| h.exec.as_str())
            .unwrap_or_default()
    }

    fn staging_dir(&self) -> Result<tempfile::TempDir, HarvestError> {
        Ok(tempfile::Builder::new()
            .prefix("staging_base")
            .tempdir_in(&self.tmp_base_dir)?)
    }

    async fn execute_event(
        &self,
        harvester: &str,
        event: &TriggerEvent,
        staging: &std::path::Path,
    ) -> Result<(), HarvestError> {
        let file_list = executor::write_file_list(staging, &event.matched_files)?;
        executor::execute(
            harvester,
            self.exec_template(harvester),
            event.extra_params.as_deref(),
            staging,
            &file_list,
            &self.log_dir,
        )
        .await
    }

    async fn run_additions(&mut self, map: HarvesterMap) -> Result<(), HarvestError> {
        for (harvester, events) in map.entries.clone() {
            info!("running additions for harvester '{}'", harvester);
            for event in events {
                let staging = self.staging_dir()?;
                executor::link_sources(staging.path(), &event.matched_files)?;
                match self.execute_event(&harvester, &event, staging.path()).await {
                    Ok(()) => {
                        for file in &event.matched_files {
                            file.mark_harvested(true);
                        }
                        self.committed.add_event(&harvester, event.clone());
                    }
                    Err(e) => {
                        warn!(
                            "harvester '{}' failed, compensating committed events",
                            harvester
                        );
                        let mut undo_map = HarvesterMap::new();
                        undo_map.add_event(&harvester, event);
                        if self.params.undo_previous_slices {
                            undo_map.merge(std::mem::take(&mut self.committed));
                        }
                        self.undo_processed_files(undo_map).await?;
                        return Err(e);
                    }
                }

                let to_upload = event
                    .matched_files
                    .filter_by_bool(BoolAttr::PendingStoreAddition);
                if !to_upload.is_empty() {
                    self.broker
                        .upload(&to_upload, StoreMode::Store, SuccessFlag::Stored)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Un-harvest deletions: the executor runs against an empty staging
    /// tree (absence means removal), then the corresponding stored files
    /// are deleted.
    async fn run_deletions(&mut self, map: HarvesterMap) -> Result<(), HarvestError> {
        for (harvester, events) in map.entries.clone() {
            info!("running deletions for harvester '{}'", harvester);
            for event in events {
                let staging = self.staging_dir()?;
                self.execute_event(&harvester, &event, staging.path()).await?;
                for file in &event.matched_files {
                    file.mark_harvested(true);
                }

                let to_delete = event
                    .matched_files
                    .filter_by_bool(BoolAttr::PendingStoreDeletion);
                if !to_delete.is_empty() {
                    self.broker
                        .delete(&to_delete, StoreMode::Store, SuccessFlag::Stored)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Compensation: mark every file in the map, unregister the catalog
    /// entries, then delete whatever those events had uploaded.
    async fn undo_processed_files(&mut self, undo_map: HarvesterMap) -> Result<(), HarvestError> {
        undo_map.mark_should_undo()?;
        for (harvester, events) in &undo_map.entries {
            info!("running undo deletions for harvester '{}'", harvester);
            for event in events {
                let staging = self.staging_dir()?;
                self.execute_event(harvester, event, staging.path()).await?;
                for file in &event.matched_files {
                    file.mark_harvest_undone(true);
                }

                let to_delete = event
                    .matched_files
                    .filter_by_bool_and(&[BoolAttr::PendingUndo, BoolAttr::IsStored]);
                if !to_delete.is_empty() {
                    self.broker
                        .delete(&to_delete, StoreMode::Store, SuccessFlag::UploadUndone)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

fn validate_mapping(files: &FileCollection, map: &HarvesterMap) -> Result<(), HarvestError> {
    let mapped = map.all_files();
    if mapped.is_superset(files) {
        Ok(())
    } else {
        let unmapped = files
            .difference(&mapped)
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        Err(HarvestError::UnmappedFiles { files: unmapped })
    }
}
