//! Check step: run per-file validity checks and aggregate the verdict.
//!
//! Files are grouped by their assigned check type. Non-empty and format
//! checks run in-process; compliance checks go out through the
//! [`CheckHandler`] seam, fanned out over a bounded worker pool. A failing
//! check never aborts the pass; every file is checked, then a single
//! aggregate error names all the non-compliant files.

mod format;

pub use format::format_check;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::file::{CheckResult, CheckType, FileCollection, FileError};

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("compliance checks failed for: {}", files.join(", "))]
    ComplianceCheckFailed { files: Vec<String> },

    #[error("files require compliance checks but no checker is configured")]
    NoComplianceChecker,

    #[error(transparent)]
    File(#[from] FileError),
}

/// Runtime parameters for the check step.
#[derive(Debug, Clone)]
pub struct CheckParams {
    /// Names of the compliance checks to request from the external checker.
    pub checks: Vec<String>,

    /// Upper bound on concurrently running compliance checks.
    pub max_concurrency: usize,
}

impl Default for CheckParams {
    fn default() -> Self {
        Self {
            checks: Vec::new(),
            max_concurrency: 4,
        }
    }
}

/// External compliance check engine.
#[async_trait]
pub trait CheckHandler: Send + Sync {
    /// Check one file. An `Err` means the checker itself broke, which the
    /// dispatcher records as a non-compliant result for that file.
    async fn check(&self, path: &Path, checks: &[String]) -> anyhow::Result<CheckResult>;
}

pub struct CheckDispatcher {
    checker: Option<Arc<dyn CheckHandler>>,
    params: CheckParams,
}

impl CheckDispatcher {
    pub fn new(checker: Option<Arc<dyn CheckHandler>>, params: CheckParams) -> Self {
        Self { checker, params }
    }

    /// Whether compliance checks can actually run. Drives default check
    /// type assignment.
    pub fn compliance_configured(&self) -> bool {
        self.checker.is_some()
    }

    /// Check every checkable file in the collection.
    pub async fn run(&self, files: &FileCollection) -> Result<(), CheckError> {
        for check_type in CheckType::ALL_CHECKABLE {
            let group = files.filter_by_check_type(check_type);
            if group.is_empty() {
                continue;
            }
            info!("running {:?} for {} file(s)", check_type, group.len());
            match check_type {
                CheckType::NonEmptyCheck => {
                    for file in &group {
                        let result = non_empty_check(file.require_src_path()?);
                        file.set_check_result(result);
                    }
                }
                CheckType::FormatCheck => {
                    for file in &group {
                        let result = format_check(file.require_src_path()?, file.kind());
                        file.set_check_result(result);
                    }
                }
                CheckType::ComplianceCheck => self.run_compliance(&group).await?,
                _ => unreachable!("ALL_CHECKABLE contains only checkable types"),
            }
        }

        let failed: Vec<String> = files
            .iter()
            .filter(|f| f.check_passed() == Some(false))
            .map(|f| f.name().to_string())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CheckError::ComplianceCheckFailed { files: failed })
        }
    }

    async fn run_compliance(&self, group: &FileCollection) -> Result<(), CheckError> {
        let checker = self
            .checker
            .as_ref()
            .cloned()
            .ok_or(CheckError::NoComplianceChecker)?;
        let semaphore = Arc::new(Semaphore::new(self.params.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(group.len());
        for file in group {
            let file = Arc::clone(file);
            let checker = Arc::clone(&checker);
            let checks = self.params.checks.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let path = match file.require_src_path() {
                    Ok(path) => path.to_path_buf(),
                    Err(e) => {
                        file.set_check_result(CheckResult::new(false, vec![e.to_string()], true));
                        return;
                    }
                };
                debug!("compliance check for '{}'", file.name());
                match checker.check(&path, &checks).await {
                    Ok(result) => file.set_check_result(result),
                    Err(e) => file.set_check_result(CheckResult::new(
                        false,
                        vec![format!("checker error: {}", e)],
                        true,
                    )),
                }
            }));
        }

        // A panicked task is contained to its own file.
        let _ = futures::future::join_all(handles).await;
        for file in group {
            if file.check_result().is_none() {
                file.set_check_result(CheckResult::new(
                    false,
                    vec!["check task aborted".to_string()],
                    true,
                ));
            }
        }
        Ok(())
    }
}

fn non_empty_check(path: &Path) -> CheckResult {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => CheckResult::compliant_ok(),
        Ok(_) => CheckResult::new(false, vec![format!("'{}' is empty", path.display())], false),
        Err(e) => CheckResult::new(
            false,
            vec![format!("cannot stat '{}': {}", path.display(), e)],
            true,
        ),
    }
}
