//! Error types for littlebox-lxd.

use thiserror::Error;

/// Result type alias for littlebox-lxd operations.
pub type Result<T> = std::result::Result<T, LxdError>;

/// HTTP-equivalent code LXD uses for missing objects.
pub const NOT_FOUND_CODE: u16 = 404;

/// Errors that can occur while talking to the LXD daemon.
#[derive(Debug, Error)]
pub enum LxdError {
    /// The daemon answered with an error envelope
    #[error("LXD API error {code}: {message}")]
    Api {
        /// `error_code` from the envelope (HTTP status semantics)
        code: u16,
        /// `error` message from the envelope
        message: String,
    },

    /// A background operation finished in a non-success state
    #[error("LXD operation failed: {0}")]
    Operation(String),

    /// Socket or HTTP transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not match the LXD envelope
    #[error("malformed response: {0}")]
    Protocol(String),

    /// Container name the daemon would reject or misroute
    #[error("invalid container name {name:?}: {reason}")]
    InvalidName {
        name: String,
        reason: &'static str,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl LxdError {
    /// Check if this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LxdError::Api { code, .. } if *code == NOT_FOUND_CODE)
    }
}

impl From<serde_json::Error> for LxdError {
    fn from(e: serde_json::Error) -> Self {
        LxdError::Protocol(e.to_string())
    }
}

impl From<hyper::Error> for LxdError {
    fn from(e: hyper::Error) -> Self {
        LxdError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = LxdError::Api {
            code: 404,
            message: "not found".into(),
        };
        assert!(err.is_not_found());

        let err = LxdError::Api {
            code: 403,
            message: "forbidden".into(),
        };
        assert!(!err.is_not_found());
        assert!(!LxdError::Transport("refused".into()).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = LxdError::Api {
            code: 404,
            message: "not found".into(),
        };
        assert_eq!(err.to_string(), "LXD API error 404: not found");
    }
}
