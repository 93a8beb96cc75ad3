//! Handler: one artifact, one run, one lifecycle.
//!
//! A handler walks the lifecycle state machine over a single input
//! artifact: initialise, resolve, preprocess, check, process, publish,
//! postprocess, then a notification and a terminal state. Any step error
//! diverts to the error-notification path; the run always ends in a
//! terminal state and the per-file evidence stays readable afterwards.

mod machine;

pub use machine::{MachineError, State, StateMachine, Trigger};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use tracing::{error, info, warn};

use crate::broker::{storage_broker_for_url, BrokerError, StorageBroker, StoreMode};
use crate::check::{CheckDispatcher, CheckHandler, CheckParams};
use crate::config::PipelineConfig;
use crate::error::{ErrorClass, PipelineError};
use crate::file::{
    checksum_file, file_extension, BoolAttr, CheckType, FileCollection, FileError, PipelineFile,
    PublishType, StrAttr,
};
use crate::harvest::{HarvestParams, HarvestRunner};
use crate::notify::{
    Audience, LogTransport, NotificationPayload, NotificationTransport, Notifier, NotifyParams,
    RecipientOutcome,
};
use crate::paths::{basename_path, PathError, PathFn, PathFunctionRegistry, PathSpec};
use crate::resolve::{resolve, ResolveParams};
use crate::store::StoreRunner;

/// Terminal verdict of a handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    Success,
    Error,
}

impl fmt::Display for HandlerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerResult::Success => f.write_str("HANDLER_SUCCESS"),
            HandlerResult::Error => f.write_str("HANDLER_ERROR"),
        }
    }
}

/// What a hook closure gets to work with: the live collection plus the
/// run's scratch areas. Files created under `products_dir` survive until
/// the end of the run.
pub struct HookContext<'a> {
    pub files: &'a mut FileCollection,
    pub products_dir: &'a Path,
    pub temp_dir: &'a Path,
}

pub type Hook = Box<dyn Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Optional customisation points, run between lifecycle steps. Each
/// defaults to a no-op.
#[derive(Default)]
pub struct Hooks {
    /// After resolve, before checks. Typically adjusts publish/check types
    /// or drops files from the collection.
    pub preprocess: Option<Hook>,
    /// After checks, before publish. Typically derives product files.
    pub process: Option<Hook>,
    /// After publish.
    pub postprocess: Option<Hook>,
}

/// Per-pipeline handler parameters.
pub struct HandlerParams {
    /// Extensions (with leading dot) the pipeline accepts. Empty accepts
    /// anything.
    pub allowed_extensions: Vec<String>,

    /// Whether the original input artifact itself is archived at
    /// `pipeline_name/basename`.
    pub archive_input_file: bool,

    /// Path function for `dest_path` assignment.
    pub dest_path: Option<PathSpec>,

    /// Path function for `archive_path` assignment. Falls back to the
    /// dest path function when unset.
    pub archive_path: Option<PathSpec>,

    /// Name filter deciding which resolved files get the default publish
    /// types. Empty include list matches everything.
    pub include_regexes: Vec<String>,
    pub exclude_regexes: Vec<String>,

    /// Allow-lists validated against assigned paths before publishing.
    /// Empty lists skip the validation.
    pub allowed_dest_path_regexes: Vec<String>,
    pub allowed_archive_path_regexes: Vec<String>,

    pub default_addition_publish_type: PublishType,
    pub default_deletion_publish_type: PublishType,

    pub allow_delete_manifests: bool,

    /// Root for relative manifest paths. Defaults to the configured
    /// `wip_dir`.
    pub relative_path_root: Option<PathBuf>,

    /// Informational upload location included in notifications.
    pub upload_path: Option<String>,

    pub check_params: CheckParams,
    pub harvest_params: HarvestParams,
    pub notify_params: NotifyParams,
}

impl Default for HandlerParams {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            archive_input_file: false,
            dest_path: None,
            archive_path: None,
            include_regexes: Vec::new(),
            exclude_regexes: Vec::new(),
            allowed_dest_path_regexes: Vec::new(),
            allowed_archive_path_regexes: Vec::new(),
            default_addition_publish_type: PublishType::HarvestUpload,
            default_deletion_publish_type: PublishType::DeleteUnharvest,
            allow_delete_manifests: false,
            relative_path_root: None,
            upload_path: None,
            check_params: CheckParams::default(),
            harvest_params: HarvestParams::default(),
            notify_params: NotifyParams::default(),
        }
    }
}

pub type BrokerFactory =
    Box<dyn Fn(&str) -> Result<Arc<dyn StorageBroker>, BrokerError> + Send + Sync>;

struct ScratchDirs {
    collection: PathBuf,
    products: PathBuf,
    temp: PathBuf,
}

impl ScratchDirs {
    fn create(base: &Path) -> std::io::Result<Self> {
        let dirs = Self {
            collection: base.join("collection"),
            products: base.join("products"),
            temp: base.join("temp"),
        };
        std::fs::create_dir_all(&dirs.collection)?;
        std::fs::create_dir_all(&dirs.products)?;
        std::fs::create_dir_all(&dirs.temp)?;
        Ok(dirs)
    }
}

pub struct Handler {
    input_file: PathBuf,
    config: PipelineConfig,
    params: HandlerParams,
    hooks: Hooks,

    checker: Option<Arc<dyn CheckHandler>>,
    transport: Arc<dyn NotificationTransport>,
    broker_factory: BrokerFactory,
    registry: PathFunctionRegistry,

    machine: StateMachine,
    has_run: bool,
    start_time: DateTime<Utc>,

    // populated during initialise
    input_checksum: Option<String>,
    dest_path_fn: Option<PathFn>,
    archive_path_fn: Option<PathFn>,
    include_regexes: Vec<Regex>,
    exclude_regexes: Vec<Regex>,
    allowed_dest_path_regexes: Vec<Regex>,
    allowed_archive_path_regexes: Vec<Regex>,

    // evidence
    files: FileCollection,
    result: Option<HandlerResult>,
    error: Option<PipelineError>,
    error_details: Option<String>,
    notification_outcomes: Vec<RecipientOutcome>,
}

impl Handler {
    pub fn new(
        input_file: impl Into<PathBuf>,
        config: PipelineConfig,
        params: HandlerParams,
    ) -> Self {
        let mut registry = PathFunctionRegistry::new();
        registry.register("basename", basename_path);
        Self {
            input_file: input_file.into(),
            config,
            params,
            hooks: Hooks::default(),
            checker: None,
            transport: Arc::new(LogTransport),
            broker_factory: Box::new(storage_broker_for_url),
            registry,
            machine: StateMachine::new(),
            has_run: false,
            start_time: Utc::now(),
            input_checksum: None,
            dest_path_fn: None,
            archive_path_fn: None,
            include_regexes: Vec::new(),
            exclude_regexes: Vec::new(),
            allowed_dest_path_regexes: Vec::new(),
            allowed_archive_path_regexes: Vec::new(),
            files: FileCollection::new(),
            result: None,
            error: None,
            error_details: None,
            notification_outcomes: Vec::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn CheckHandler>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_broker_factory(mut self, factory: BrokerFactory) -> Self {
        self.broker_factory = factory;
        self
    }

    pub fn with_path_registry(mut self, registry: PathFunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    //
    // evidence accessors
    //

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn result(&self) -> Option<HandlerResult> {
        self.result
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn error_details(&self) -> Option<&str> {
        self.error_details.as_deref()
    }

    pub fn file_collection(&self) -> &FileCollection {
        &self.files
    }

    pub fn input_checksum(&self) -> Option<&str> {
        self.input_checksum.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn notification_outcomes(&self) -> &[RecipientOutcome] {
        &self.notification_outcomes
    }

    //
    // lifecycle
    //

    /// Run the full lifecycle for the input artifact.
    ///
    /// Only a repeated call fails; step errors are captured as the run's
    /// outcome and routed through error notification. The scratch
    /// directory is removed in every case.
    pub async fn run(&mut self) -> Result<HandlerResult, PipelineError> {
        if self.has_run {
            return Err(PipelineError::AlreadyRun);
        }
        self.has_run = true;
        self.start_time = Utc::now();
        info!(
            "handler run for '{}' (pipeline '{}')",
            self.input_file.display(),
            self.config.global.pipeline_name
        );

        let scratch = match self.create_scratch() {
            Ok(scratch) => scratch,
            Err(e) => {
                self.handle_error(e.into()).await;
                return Ok(HandlerResult::Error);
            }
        };
        let outcome = match ScratchDirs::create(scratch.path()) {
            Ok(dirs) => self.run_steps(&dirs).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(()) => self.handle_success().await,
            Err(e) => self.handle_error(e).await,
        }
        // scratch dropped here, removing the run's working tree
        Ok(self.result.unwrap_or(HandlerResult::Error))
    }

    fn create_scratch(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(self.config.global.pipeline_name.as_str());
        match &self.config.global.tmp_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
    }

    async fn run_steps(&mut self, dirs: &ScratchDirs) -> Result<(), PipelineError> {
        self.initialise()?;
        self.machine.fire(Trigger::Initialise)?;

        self.resolve_step(dirs)?;
        self.machine.fire(Trigger::Resolve)?;

        if let Some(hook) = self.hooks.preprocess.as_ref() {
            hook(&mut HookContext {
                files: &mut self.files,
                products_dir: &dirs.products,
                temp_dir: &dirs.temp,
            })
            .map_err(PipelineError::Hook)?;
        }
        self.machine.fire(Trigger::Preprocess)?;

        self.check_step().await?;
        self.machine.fire(Trigger::Check)?;

        if let Some(hook) = self.hooks.process.as_ref() {
            hook(&mut HookContext {
                files: &mut self.files,
                products_dir: &dirs.products,
                temp_dir: &dirs.temp,
            })
            .map_err(PipelineError::Hook)?;
        }
        self.machine.fire(Trigger::Process)?;

        self.publish_step(dirs).await?;
        self.machine.fire(Trigger::Publish)?;

        if let Some(hook) = self.hooks.postprocess.as_ref() {
            hook(&mut HookContext {
                files: &mut self.files,
                products_dir: &dirs.products,
                temp_dir: &dirs.temp,
            })
            .map_err(PipelineError::Hook)?;
        }
        self.machine.fire(Trigger::Postprocess)?;
        Ok(())
    }

    /// Validate parameters, checksum the input artifact and resolve the
    /// path functions. Everything that can fail from bad configuration
    /// fails here, before any file is touched.
    fn initialise(&mut self) -> Result<(), PipelineError> {
        if let Some(extension) = file_extension(&self.input_file) {
            let allowed = self.params.allowed_extensions.is_empty()
                || self
                    .params
                    .allowed_extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&extension));
            if !allowed {
                return Err(PipelineError::DisallowedExtension(extension));
            }
        } else if !self.params.allowed_extensions.is_empty() {
            return Err(PipelineError::DisallowedExtension(String::new()));
        }

        self.input_checksum = Some(checksum_file(&self.input_file)?);

        self.dest_path_fn = self
            .params
            .dest_path
            .as_ref()
            .map(|spec| self.registry.resolve(spec))
            .transpose()?;
        self.archive_path_fn = self
            .params
            .archive_path
            .as_ref()
            .map(|spec| self.registry.resolve(spec))
            .transpose()?;

        self.include_regexes = compile_patterns(&self.params.include_regexes)?;
        if self.include_regexes.is_empty() {
            self.include_regexes
                .push(Regex::new(".*").expect("pattern is valid"));
        }
        self.exclude_regexes = compile_patterns(&self.params.exclude_regexes)?;
        self.allowed_dest_path_regexes =
            compile_patterns(&self.params.allowed_dest_path_regexes)?;
        self.allowed_archive_path_regexes =
            compile_patterns(&self.params.allowed_archive_path_regexes)?;
        Ok(())
    }

    fn resolve_step(&mut self, dirs: &ScratchDirs) -> Result<(), PipelineError> {
        let resolve_params = ResolveParams {
            relative_path_root: self
                .params
                .relative_path_root
                .clone()
                .unwrap_or_else(|| self.config.global.wip_dir.clone()),
            allow_delete_manifests: self.params.allow_delete_manifests,
        };
        let resolved = resolve(&self.input_file, &dirs.collection, &resolve_params)?;
        resolved.set_update_callback(Arc::new(|name, is_deletion, description| {
            info!(
                "file update [{}{}]: {}",
                name,
                if is_deletion { " (deletion)" } else { "" },
                description
            );
        }));

        // Only files the resolve step left untyped get the defaults; a
        // manifest may have assigned explicit publish types already.
        resolved
            .filter(|f| f.publish_type() == PublishType::Unset)
            .set_publish_types_from_regexes(
                &self.include_regexes,
                &self.exclude_regexes,
                self.params.default_addition_publish_type,
                self.params.default_deletion_publish_type,
            )?;

        info!("resolved {} file(s)", resolved.len());
        self.files = resolved;
        Ok(())
    }

    async fn check_step(&self) -> Result<(), PipelineError> {
        let dispatcher =
            CheckDispatcher::new(self.checker.clone(), self.params.check_params.clone());
        self.files
            .filter(|f| !f.is_deletion() && f.check_type() == CheckType::Unset)
            .set_default_check_types(dispatcher.compliance_configured())?;
        dispatcher.run(&self.files).await?;
        Ok(())
    }

    /// Publish in fixed order: archive, harvest, store the rest. Archive
    /// and store actions are never rolled back by harvest compensation.
    async fn publish_step(&self, dirs: &ScratchDirs) -> Result<(), PipelineError> {
        self.files.validate_publish_types_set()?;

        self.archive().await?;

        let upload_broker = (self.broker_factory)(&self.config.global.upload_url)?;
        let upload_runner = StoreRunner::new(Arc::clone(&upload_broker), StoreMode::Store);

        if let Some(dest_path_fn) = self.dest_path_fn {
            self.files.set_dest_paths(|path| {
                dest_path_fn(path).map_err(|e| FileError::PathFunction(e.to_string()))
            })?;
        }
        if let Some(missing) = self
            .files
            .iter()
            .find(|f| f.dest_path().is_none() && (f.should_store() || f.should_harvest()))
        {
            return Err(PathError::Underivable(missing.name().to_string()).into());
        }
        self.files
            .validate_attribute_uniqueness(StrAttr::DestPath, "dest_path")?;
        if !self.allowed_dest_path_regexes.is_empty() {
            self.files.validate_attribute_matches_regexes(
                StrAttr::DestPath,
                "dest_path",
                &self.allowed_dest_path_regexes,
            )?;
        }

        upload_runner.set_is_overwrite(&self.files).await?;

        let pending_harvest = self.files.filter_by_bool(BoolAttr::PendingHarvest);
        if !pending_harvest.is_empty() {
            let mut harvest_runner = HarvestRunner::new(
                Arc::clone(&upload_broker),
                self.config.harvesters.clone(),
                &dirs.temp,
                &self.config.executor.log_dir,
                self.params.harvest_params.clone(),
            );
            harvest_runner.run(&pending_harvest).await?;
        }

        upload_runner.run(&self.files).await?;
        Ok(())
    }

    async fn archive(&self) -> Result<(), PipelineError> {
        let to_archive = self.files.filter_by_bool(BoolAttr::PendingArchive);
        if !self.params.archive_input_file && to_archive.is_empty() {
            return Ok(());
        }

        let archive_broker = (self.broker_factory)(&self.config.global.archive_url)?;
        let archive_runner = StoreRunner::new(archive_broker, StoreMode::Archive);

        if self.params.archive_input_file {
            // The original upload is archived as-is, not the resolved copy.
            let input = PipelineFile::new(&self.input_file)?;
            input.set_publish_type(PublishType::ArchiveOnly)?;
            input.set_archive_path(format!(
                "{}/{}",
                self.config.global.pipeline_name,
                input.name()
            ))?;
            let mut artifact = FileCollection::new();
            artifact.add(input)?;
            archive_runner.run(&artifact).await?;
        }

        if !to_archive.is_empty() {
            if let Some(archive_path_fn) = self.archive_path_fn.or(self.dest_path_fn) {
                self.files.set_archive_paths(|path| {
                    archive_path_fn(path).map_err(|e| FileError::PathFunction(e.to_string()))
                })?;
            }
            if let Some(missing) = to_archive.iter().find(|f| f.archive_path().is_none()) {
                return Err(PathError::Underivable(missing.name().to_string()).into());
            }
            if !self.allowed_archive_path_regexes.is_empty() {
                to_archive.validate_attribute_matches_regexes(
                    StrAttr::ArchivePath,
                    "archive_path",
                    &self.allowed_archive_path_regexes,
                )?;
            }
            archive_runner.run(&to_archive).await?;
        }
        Ok(())
    }

    //
    // outcome handling
    //

    fn payload(&self) -> NotificationPayload {
        let (file_table_columns, file_table_rows) = self.files.table_data();
        NotificationPayload {
            input_file: self
                .input_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.input_file.display().to_string()),
            result: self
                .result
                .unwrap_or(HandlerResult::Error)
                .to_string(),
            start_time: self.start_time,
            checks_summary: if self.params.check_params.checks.is_empty() {
                None
            } else {
                Some(self.params.check_params.checks.join(", "))
            },
            file_table_columns,
            file_table_rows,
            error_details: self.error_details.clone(),
            upload_dir: self.params.upload_path.clone(),
        }
    }

    fn notifier(&self) -> Notifier {
        Notifier::new(
            Arc::clone(&self.transport),
            self.params.notify_params.clone(),
        )
    }

    async fn handle_success(&mut self) {
        self.result = Some(HandlerResult::Success);
        info!("handler run succeeded");
        match self.machine.fire(Trigger::NotifySuccess) {
            Ok(_) => {
                let payload = self.payload();
                self.notification_outcomes =
                    self.notifier().notify(Audience::Success, &payload).await;
                if let Err(e) = self.machine.fire(Trigger::CompleteSuccess) {
                    error!("cannot complete run: {}", e);
                }
            }
            Err(e) => error!("cannot notify success: {}", e),
        }
    }

    /// Record the failure and walk the error-notification path. Failures
    /// while notifying are logged and swallowed so the run still reaches a
    /// terminal state.
    async fn handle_error(&mut self, e: PipelineError) {
        let class = e.class();
        let details = match class {
            ErrorClass::Processing => {
                warn!("handler run failed: {}", e);
                e.to_string()
            }
            ErrorClass::System => {
                error!("handler run failed: {:?}", e);
                format!("{:?}", e)
            }
        };
        self.result = Some(HandlerResult::Error);
        self.error_details = Some(details);
        self.error = Some(e);

        match self.machine.fire(Trigger::NotifyError) {
            Ok(_) => {
                let audience = match class {
                    ErrorClass::Processing => Audience::Error,
                    ErrorClass::System => Audience::SystemError,
                };
                let payload = self.payload();
                self.notification_outcomes = self.notifier().notify(audience, &payload).await;
                if let Err(e) = self.machine.fire(Trigger::CompleteError) {
                    error!("cannot complete run: {}", e);
                }
            }
            Err(e) => error!("cannot notify error: {}", e),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, PipelineError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| PipelineError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorConfig, GlobalConfig};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingTransport {
        sends: Mutex<Vec<(Vec<String>, String)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sends: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn send(
            &self,
            recipients: &[crate::notify::Recipient],
            payload: &NotificationPayload,
        ) -> Vec<RecipientOutcome> {
            self.sends.lock().unwrap().push((
                recipients.iter().map(|r| r.address.clone()).collect(),
                payload.result.clone(),
            ));
            recipients
                .iter()
                .map(|r| RecipientOutcome {
                    recipient: r.address.clone(),
                    sent: true,
                    error: None,
                })
                .collect()
        }
    }

    struct Fixture {
        _wip: TempDir,
        upload: TempDir,
        archive: TempDir,
        input: PathBuf,
        config: PipelineConfig,
    }

    fn fixture(input_name: &str, contents: &[u8]) -> Fixture {
        let wip = TempDir::new().unwrap();
        let upload = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        let input = wip.path().join(input_name);
        std::fs::write(&input, contents).unwrap();
        let config = PipelineConfig {
            global: GlobalConfig {
                pipeline_name: "moorings".to_string(),
                archive_url: format!("file://{}", archive.path().display()),
                upload_url: format!("file://{}", upload.path().display()),
                wip_dir: wip.path().to_path_buf(),
                tmp_dir: None,
            },
            executor: ExecutorConfig::default(),
            harvesters: Vec::new(),
        };
        Fixture {
            _wip: wip,
            upload,
            archive,
            input,
            config,
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
    async fn single_file_upload_run_succeeds() {
        let fx = fixture("data.csv", b"a,b\n1,2\n");
        let mut handler = Handler::new(&fx.input, fx.config.clone(), upload_only_params());

        let result = handler.run().await.unwrap();
        assert_eq!(result, HandlerResult::Success);
        assert_eq!(handler.state(), State::CompletedSuccess);
        assert!(fx.upload.path().join("data.csv").exists());
        assert!(handler.input_checksum().is_some());

        let file = handler.file_collection().get(0).unwrap();
        assert!(file.published());
        assert_eq!(file.check_passed(), Some(true));
    }

    #[tokio::test]
    async fn second_run_is_rejected_without_side_effects() {
        let fx = fixture("data.csv", b"a,b\n");
        let mut handler = Handler::new(&fx.input, fx.config.clone(), upload_only_params());
        handler.run().await.unwrap();
        assert!(matches!(
            handler.run().await,
            Err(PipelineError::AlreadyRun)
        ));
        // First run's terminal state survives the rejected call.
        assert_eq!(handler.state(), State::CompletedSuccess);
    }

    #[tokio::test]
    async fn disallowed_extension_notifies_error_recipients() {
        let fx = fixture("data.bin", b"\x00\x01");
        let transport = RecordingTransport::new();
        let mut params = upload_only_params();
        params.allowed_extensions = vec![".csv".to_string(), ".nc".to_string()];
        params.notify_params.error_recipients = vec!["email:ops@example.com".to_string()];
        params.notify_params.owner_recipients = vec!["email:owner@example.com".to_string()];

        let mut handler = Handler::new(&fx.input, fx.config.clone(), params)
            .with_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>);
        let result = handler.run().await.unwrap();

        assert_eq!(result, HandlerResult::Error);
        assert_eq!(handler.state(), State::CompletedError);
        assert!(matches!(
            handler.error(),
            Some(PipelineError::DisallowedExtension(_))
        ));

        // Processing error: error recipients, not owners.
        let sends = transport.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, vec!["ops@example.com".to_string()]);
        assert_eq!(sends[0].1, "HANDLER_ERROR");
    }

    #[tokio::test]
    async fn system_error_notifies_owners() {
        let fx = fixture("data.csv", b"a,b\n");
        let transport = RecordingTransport::new();
        let mut params = upload_only_params();
        // Unknown registry name fails at initialise as a system error.
        params.dest_path = Some(PathSpec::Named("nope".to_string()));
        params.notify_params.error_recipients = vec!["email:ops@example.com".to_string()];
        params.notify_params.owner_recipients = vec!["email:owner@example.com".to_string()];

        let mut handler = Handler::new(&fx.input, fx.config.clone(), params)
            .with_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>);
        let result = handler.run().await.unwrap();

        assert_eq!(result, HandlerResult::Error);
        let sends = transport.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, vec!["owner@example.com".to_string()]);
    }

    #[tokio::test]
    async fn process_hook_products_are_published() {
        let fx = fixture("data.csv", b"a,b\n1,2\n");
        let mut hooks = Hooks::default();
        hooks.process = Some(Box::new(|ctx: &mut HookContext<'_>| {
            let product = ctx.products_dir.join("summary.csv");
            std::fs::write(&product, b"rows,1\n")?;
            let file = PipelineFile::new(product)?;
            file.set_publish_type(PublishType::UploadOnly)?;
            ctx.files.add(file)?;
            Ok(())
        }));

        let mut handler =
            Handler::new(&fx.input, fx.config.clone(), upload_only_params()).with_hooks(hooks);
        let result = handler.run().await.unwrap();

        assert_eq!(result, HandlerResult::Success);
        assert!(fx.upload.path().join("data.csv").exists());
        assert!(fx.upload.path().join("summary.csv").exists());
    }

    #[tokio::test]
    async fn archive_input_file_lands_under_pipeline_name() {
        let fx = fixture("batch.csv", b"a\n");
        let mut params = upload_only_params();
        params.archive_input_file = true;

        let mut handler = Handler::new(&fx.input, fx.config.clone(), params);
        let result = handler.run().await.unwrap();

        assert_eq!(result, HandlerResult::Success);
        assert!(fx.archive.path().join("moorings/batch.csv").exists());
        assert!(fx.upload.path().join("batch.csv").exists());
    }
}
