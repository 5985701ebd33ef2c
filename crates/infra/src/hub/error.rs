//! Hub error types

use meetings_domain::MeetingsError;
use thiserror::Error;

use crate::errors::InfraError;

/// Hub-specific errors
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop has exited and no longer accepts commands
    #[error("Hub loop is gone")]
    LoopGone,
}

impl From<HubError> for InfraError {
    fn from(err: HubError) -> Self {
        let domain_err = match err {
            HubError::LoopGone => MeetingsError::Internal(err.to_string()),
        };
        InfraError(domain_err)
    }
}

impl From<HubError> for MeetingsError {
    fn from(err: HubError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for hub operations
pub type HubResult<T> = Result<T, HubError>;
