//! Top-level error type and severity classification.

use crate::broker::BrokerError;
use crate::check::CheckError;
use crate::config::ConfigError;
use crate::file::FileError;
use crate::handler::MachineError;
use crate::harvest::HarvestError;
use crate::notify::NotifyError;
use crate::paths::PathError;
use crate::resolve::ResolveError;

/// How an error is reported.
///
/// Processing errors are expected outcomes of bad input: they go to the
/// pipeline's error recipients at normal severity. Everything else is a
/// system fault and goes to the owners with full detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Processing,
    System,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("handler has already run")]
    AlreadyRun,

    #[error("file extension '{0}' is not allowed for this pipeline")]
    DisallowedExtension(String),

    #[error("pattern '{pattern}' does not compile: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("handler hook failed: {0}")]
    Hook(anyhow::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::DisallowedExtension(_) => ErrorClass::Processing,
            PipelineError::Check(CheckError::ComplianceCheckFailed { .. }) => {
                ErrorClass::Processing
            }
            PipelineError::Resolve(
                ResolveError::InvalidFormat(_) | ResolveError::DeleteManifestsDisabled,
            ) => ErrorClass::Processing,
            PipelineError::Harvest(HarvestError::UnmappedFiles { .. }) => ErrorClass::Processing,
            PipelineError::File(
                FileError::PublishTypeUnset { .. } | FileError::AttributeNotMatched { .. },
            ) => ErrorClass::Processing,
            PipelineError::Hook(_) => ErrorClass::Processing,
            _ => ErrorClass::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_splits_input_faults_from_system_faults() {
        assert_eq!(
            PipelineError::DisallowedExtension(".exe".to_string()).class(),
            ErrorClass::Processing
        );
        assert_eq!(
            PipelineError::Check(CheckError::ComplianceCheckFailed {
                files: vec!["a.nc".to_string()]
            })
            .class(),
            ErrorClass::Processing
        );
        assert_eq!(
            PipelineError::Harvest(HarvestError::UnmappedFiles {
                files: vec!["a.nc".to_string()]
            })
            .class(),
            ErrorClass::Processing
        );
        assert_eq!(PipelineError::AlreadyRun.class(), ErrorClass::System);
        assert_eq!(
            PipelineError::Io(std::io::Error::other("disk gone")).class(),
            ErrorClass::System
        );
    }
}
