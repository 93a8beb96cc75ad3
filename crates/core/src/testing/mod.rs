//! Testing utilities and mock implementations for integration tests.
//!
//! Mocks for the three external seams (storage brokers, the compliance
//! checker, the notification transport) plus helpers for scripting
//! harvester executors, so full handler runs can be exercised without any
//! real infrastructure.

mod mock_broker;
mod mock_checker;
mod mock_transport;
mod scripted_executor;

pub use mock_broker::MockBroker;
pub use mock_checker::MockChecker;
pub use mock_transport::{MockTransport, RecordedNotification};
pub use scripted_executor::ScriptedExecutor;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;
    use std::sync::Arc;

    use crate::config::{ExecutorConfig, GlobalConfig, PipelineConfig};
    use crate::file::{PipelineFile, PublishType};

    /// Write a small file and wrap it as an addition with the given publish
    /// type and destination path.
    pub fn addition(
        dir: &Path,
        name: &str,
        publish_type: PublishType,
        dest_path: &str,
    ) -> Arc<PipelineFile> {
        let path = dir.join(name);
        std::fs::write(&path, b"data").expect("fixture file is writable");
        let file = PipelineFile::new(path).expect("fixture file exists");
        file.set_publish_type(publish_type)
            .expect("publish type matches polarity");
        file.set_dest_path(dest_path).expect("dest path is relative");
        file
    }

    /// A pipeline configuration with `file://` storage rooted at the given
    /// directories.
    pub fn local_config(wip_dir: &Path, upload_dir: &Path, archive_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            global: GlobalConfig {
                pipeline_name: "test-pipeline".to_string(),
                archive_url: format!("file://{}", archive_dir.display()),
                upload_url: format!("file://{}", upload_dir.display()),
                wip_dir: wip_dir.to_path_buf(),
                tmp_dir: None,
            },
            executor: ExecutorConfig::default(),
            harvesters: Vec::new(),
        }
    }
}
