//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top level engine configuration. Constructed once at process start and
/// passed by reference into handlers and step runners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub global: GlobalConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Harvester definitions, in declaration order. Order matters: forward
    /// harvest execution and compensation both walk this list in order.
    #[serde(default)]
    pub harvesters: Vec<HarvesterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// Name used for scratch directory prefixes and input-artifact archive
    /// paths.
    pub pipeline_name: String,

    /// Storage URL for the archive backend (`file://`, `s3://`, `sftp://`).
    pub archive_url: String,

    /// Storage URL for the upload backend.
    pub upload_url: String,

    /// Root against which relative manifest paths are resolved.
    pub wip_dir: PathBuf,

    /// Base directory for per-run scratch directories. Defaults to the
    /// system temporary directory.
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Directory passed to catalog executors for their own logging.
    pub log_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarvesterConfig {
    pub name: String,

    /// Command template executed for each trigger event. Substitution
    /// values: `{base}` (staging tree), `{file_list}`, `{log_dir}`.
    pub exec: String,

    #[serde(default)]
    pub events: Vec<HarvesterEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarvesterEvent {
    /// A file belongs to this event when its `dest_path` matches any of
    /// these patterns.
    pub regexes: Vec<String>,

    /// Extra arguments appended to the executor command for this event.
    #[serde(default)]
    pub extra_params: Option<String>,
}
