//! Artifact intake pipeline engine.
//!
//! One handler run takes a single uploaded artifact through resolve,
//! check, harvest and store steps against pluggable storage backends,
//! with ordered lifecycle states, compensation for failed harvests and
//! notification of the outcome.

pub mod broker;
pub mod check;
pub mod config;
pub mod error;
pub mod file;
pub mod handler;
pub mod harvest;
pub mod notify;
pub mod paths;
pub mod resolve;
pub mod store;
pub mod testing;

pub use broker::{
    storage_broker_for_url, BrokerError, LocalBroker, RetryPolicy, S3Broker, SftpBroker,
    StorageBroker, StoreMode, SuccessFlag,
};
pub use check::{CheckDispatcher, CheckError, CheckHandler, CheckParams};
pub use config::{
    load_config, load_config_from_str, validate_config, ConfigError, ExecutorConfig, GlobalConfig,
    HarvesterConfig, HarvesterEvent, PipelineConfig,
};
pub use error::{ErrorClass, PipelineError};
pub use file::{
    checksum_file, file_extension, BoolAttr, CheckResult, CheckType, FileCollection, FileError,
    FileKind, PipelineFile, PublishType, RemoteFile, RemoteFileMeta, StrAttr,
};
pub use handler::{
    BrokerFactory, Handler, HandlerParams, HandlerResult, Hook, HookContext, Hooks, MachineError,
    State, StateMachine, Trigger,
};
pub use harvest::{HarvestError, HarvestParams, HarvestRunner, HarvesterMap, TriggerEvent};
pub use notify::{
    Audience, LogTransport, NotificationPayload, NotificationTransport, Notifier, NotifyError,
    NotifyParams, Recipient, RecipientOutcome,
};
pub use paths::{basename_path, PathError, PathFn, PathFunctionRegistry, PathSpec};
pub use resolve::{resolve, ResolveError, ResolveParams};
pub use store::StoreRunner;
