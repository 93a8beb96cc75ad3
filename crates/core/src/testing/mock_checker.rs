//! Mock compliance checker for testing.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::check::CheckHandler;
use crate::file::CheckResult;

/// Scriptable [`CheckHandler`].
///
/// Files are keyed by basename: scripted as non-compliant, scripted to
/// break the checker itself, or compliant by default. Every checked file
/// is recorded.
#[derive(Default)]
pub struct MockChecker {
    fail_names: Mutex<BTreeSet<String>>,
    error_names: Mutex<BTreeSet<String>>,
    checked: Mutex<Vec<String>>,
}

impl MockChecker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report this file as non-compliant.
    pub fn fail_for(&self, name: &str) {
        self.fail_names.lock().unwrap().insert(name.to_string());
    }

    /// Make the checker itself error for this file.
    pub fn error_for(&self, name: &str) {
        self.error_names.lock().unwrap().insert(name.to_string());
    }

    /// Basenames checked so far, in completion order.
    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckHandler for MockChecker {
    async fn check(&self, path: &Path, _checks: &[String]) -> anyhow::Result<CheckResult> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.checked.lock().unwrap().push(name.clone());

        if self.error_names.lock().unwrap().contains(&name) {
            anyhow::bail!("scripted checker breakage for '{}'", name);
        }
        if self.fail_names.lock().unwrap().contains(&name) {
            Ok(CheckResult::new(
                false,
                vec![format!("'{}' failed scripted compliance", name)],
                false,
            ))
        } else {
            Ok(CheckResult::compliant_ok())
        }
    }
}
