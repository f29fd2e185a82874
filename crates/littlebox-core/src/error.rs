//! Error types for littlebox-core.

use littlebox_lxd::LxdError;
use thiserror::Error;

/// Result type alias for littlebox-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during lifecycle operations.
///
/// Cloneable so that one transition outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Bad name or spec shape, detected before any remote call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The runtime reports the named object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Container is missing and the handle may not create it
    #[error("container {0} does not exist and creation is disabled")]
    PolicyDenied(String),

    /// Any other transport, protocol or daemon-side failure
    #[error("remote error: {0}")]
    Remote(String),
}

impl CoreError {
    /// Check if this error indicates a missing container.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_) | CoreError::PolicyDenied(_))
    }
}

impl From<LxdError> for CoreError {
    fn from(e: LxdError) -> Self {
        match e {
            LxdError::Api { ref message, .. } if e.is_not_found() => {
                CoreError::NotFound(message.clone())
            }
            LxdError::Config(msg) => CoreError::InvalidArgument(msg),
            invalid @ LxdError::InvalidName { .. } => CoreError::InvalidArgument(invalid.to_string()),
            other => CoreError::Remote(other.to_string()),
        }
    }
}
