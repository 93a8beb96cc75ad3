//! Handler lifecycle integration tests.
//!
//! Full runs through resolve -> check -> publish -> notify against mock
//! brokers, a mock compliance checker and a mock transport: success paths
//! for archive, manifest and harvested inputs, and the error paths for
//! failed checks and broken storage.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use floodgate_core::{
    testing::{MockBroker, MockChecker, MockTransport, ScriptedExecutor},
    BrokerFactory, Handler, HandlerParams, HandlerResult, HarvesterConfig, HarvesterEvent,
    NotificationTransport, PathSpec, PipelineConfig, PublishType, State, StorageBroker,
};

/// All the pieces one handler run needs, with handles kept for assertions.
struct TestHarness {
    wip: TempDir,
    upload_broker: Arc<MockBroker>,
    archive_broker: Arc<MockBroker>,
    transport: Arc<MockTransport>,
    config: PipelineConfig,
}

impl TestHarness {
    fn new() -> Self {
        let wip = TempDir::new().expect("temp dir");
        let config = floodgate_core::testing::fixtures::local_config(
            wip.path(),
            wip.path(),
            wip.path(),
        );
        let mut harness = Self {
            wip,
            upload_broker: MockBroker::new(),
            archive_broker: MockBroker::new(),
            transport: MockTransport::new(),
            config,
        };
        // The factory decides by URL; the file:// roots are never touched.
        harness.config.global.upload_url = "mock://upload".to_string();
        harness.config.global.archive_url = "mock://archive".to_string();
        harness
    }

    fn broker_factory(&self) -> BrokerFactory {
        let upload = Arc::clone(&self.upload_broker);
        let archive = Arc::clone(&self.archive_broker);
        Box::new(move |url| {
            if url.contains("archive") {
                Ok(Arc::clone(&archive) as Arc<dyn StorageBroker>)
            } else {
                Ok(Arc::clone(&upload) as Arc<dyn StorageBroker>)
            }
        })
    }

    fn write_input(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.wip.path().join(name);
        std::fs::write(&path, contents).expect("input is writable");
        path
    }

    fn handler(&self, input: &PathBuf, params: HandlerParams) -> Handler {
        Handler::new(input, self.config.clone(), params)
            .with_broker_factory(self.broker_factory())
            .with_transport(Arc::clone(&self.transport) as Arc<dyn NotificationTransport>)
    }
}

fn upload_only_params() -> HandlerParams {
    HandlerParams {
        dest_path: Some(PathSpec::Named("basename".to_string())),
        default_addition_publish_type: PublishType::UploadOnly,
        ..Default::default()
    }
}

#[tokio::test]
async fn zip_input_resolves_and_uploads_every_member() {
    let harness = TestHarness::new();
    let input = harness.wip.path().join("batch.zip");
    {
        let file = std::fs::File::create(&input).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("a.nc", options).unwrap();
        writer.write_all(b"CDF\x01netcdf-payload").unwrap();
        writer.start_file("b.csv", options).unwrap();
        writer.write_all(b"a,b\n1,2\n").unwrap();
        writer.finish().unwrap();
    }

    let mut params = upload_only_params();
    params.notify_params.success_recipients = vec!["email:ops@example.com".to_string()];
    let mut handler = harness.handler(&input, params);
    let result = handler.run().await.unwrap();

    assert_eq!(result, HandlerResult::Success);
    assert_eq!(handler.state(), State::CompletedSuccess);
    assert_eq!(
        handler.file_collection().names(),
        vec!["a.nc".to_string(), "b.csv".to_string()]
    );
    assert_eq!(
        harness.upload_broker.uploads(),
        vec!["a.nc".to_string(), "b.csv".to_string()]
    );
    for file in handler.file_collection() {
        assert_eq!(file.check_passed(), Some(true));
        assert!(file.published());
    }

    let sends = harness.transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].result, "HANDLER_SUCCESS");
    assert_eq!(sends[0].recipients, vec!["ops@example.com".to_string()]);
}

#[tokio::test]
async fn manifest_entries_resolve_against_wip_dir() {
    let harness = TestHarness::new();
    std::fs::create_dir_all(harness.wip.path().join("sub")).unwrap();
    harness.write_input("sub/data1.csv", b"a\n1\n");
    harness.write_input("sub/data2.csv", b"b\n2\n");
    let input = harness.write_input("batch.manifest", b"sub/data1.csv\nsub/data2.csv\n");

    let mut handler = harness.handler(&input, upload_only_params());
    let result = handler.run().await.unwrap();

    assert_eq!(result, HandlerResult::Success);
    assert_eq!(
        harness.upload_broker.uploads(),
        vec!["data1.csv".to_string(), "data2.csv".to_string()]
    );
}

#[tokio::test]
async fn failed_compliance_check_blocks_publishing() {
    let harness = TestHarness::new();
    let input = harness.write_input("data.nc", b"CDF\x01payload");
    let checker = MockChecker::new();
    checker.fail_for("data.nc");

    let mut params = upload_only_params();
    params.check_params.checks = vec!["cf".to_string()];
    params.notify_params.error_recipients = vec!["email:uploader@example.com".to_string()];
    let mut handler = harness
        .handler(&input, params)
        .with_checker(Arc::clone(&checker) as Arc<dyn floodgate_core::CheckHandler>);
    let result = handler.run().await.unwrap();

    assert_eq!(result, HandlerResult::Error);
    assert_eq!(handler.state(), State::CompletedError);
    assert_eq!(checker.checked(), vec!["data.nc".to_string()]);
    assert!(harness.upload_broker.uploads().is_empty());

    // Processing error, so the uploader-facing list is notified.
    let sends = harness.transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].result, "HANDLER_ERROR");
    assert_eq!(
        sends[0].recipients,
        vec!["uploader@example.com".to_string()]
    );
    let details = sends[0].error_details.as_deref().unwrap();
    assert!(details.contains("data.nc"), "details: {}", details);
}

#[tokio::test]
async fn storage_failure_is_a_system_error_for_owners() {
    let harness = TestHarness::new();
    let input = harness.write_input("data.csv", b"a\n1\n");
    harness.upload_broker.fail_upload_for("data.csv");

    let mut params = upload_only_params();
    params.notify_params.error_recipients = vec!["email:uploader@example.com".to_string()];
    params.notify_params.owner_recipients = vec!["email:owner@example.com".to_string()];
    let mut handler = harness.handler(&input, params);
    let result = handler.run().await.unwrap();

    assert_eq!(result, HandlerResult::Error);
    let sends = harness.transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].recipients, vec!["owner@example.com".to_string()]);
}

#[tokio::test]
async fn archived_input_and_files_use_the_archive_broker() {
    let harness = TestHarness::new();
    let input = harness.write_input("data.csv", b"a\n1\n");

    let mut params = upload_only_params();
    params.archive_input_file = true;
    params.default_addition_publish_type = PublishType::ArchiveOnly;
    let mut handler = harness.handler(&input, params);
    let result = handler.run().await.unwrap();

    assert_eq!(result, HandlerResult::Success);
    // Input artifact at pipeline_name/basename plus the resolved file.
    assert_eq!(
        harness.archive_broker.uploads(),
        vec!["test-pipeline/data.csv".to_string(), "data.csv".to_string()]
    );
    assert!(harness.upload_broker.uploads().is_empty());
}

#[tokio::test]
async fn harvested_run_drives_the_executor_then_uploads() {
    let mut harness = TestHarness::new();
    let scripts = TempDir::new().unwrap();
    let executor = ScriptedExecutor::new(scripts.path());
    harness.config.harvesters = vec![HarvesterConfig {
        name: "catalog_a".to_string(),
        exec: executor.succeeding("catalog_a").unwrap(),
        events: vec![HarvesterEvent {
            regexes: vec!["^data".to_string()],
            extra_params: None,
        }],
    }];

    let input = harness.write_input("data.csv", b"a\n1\n");
    let mut params = upload_only_params();
    params.default_addition_publish_type = PublishType::HarvestUpload;
    let mut handler = harness.handler(&input, params);
    let result = handler.run().await.unwrap();

    assert_eq!(result, HandlerResult::Success);
    assert_eq!(executor.invocation_count("catalog_a"), 1);
    assert_eq!(harness.upload_broker.uploads(), vec!["data.csv".to_string()]);
    let file = handler.file_collection().get(0).unwrap();
    assert!(file.is_harvested());
    assert!(file.is_stored());
    assert!(file.published());
}
