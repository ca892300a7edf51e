//! Error types for the graph sync engine
//!
//! Provides structured error types for the transport facade, the cache,
//! the signal dispatcher, the reference replica and configuration loading.

use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Transport error during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed response from {operation}: {reason}")]
    MalformedResponse { operation: String, reason: String },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error("Remote rejected {operation}: {reason}")]
    Remote { operation: String, reason: String },

    #[error("Unknown remote operation: {0}")]
    UnknownOperation(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a caller should do after a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Leave state alone, the next scheduled poll retries
    RetryNextPoll,
    /// The request was rejected, surface the reason to the cache entry
    SurfaceToEntry,
    /// Local failure, retrying will not help
    NoRetry,
}

impl Error {
    /// Build a transport error for an operation
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Build a remote rejection for an operation
    pub fn remote(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Remote {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Connection-level problems, the next tick will try again
            Error::Transport { .. }
            | Error::Serialization(_)
            | Error::MalformedResponse { .. } => ErrorAction::RetryNextPoll,

            // The call executed and was refused
            Error::Remote { .. } | Error::UnknownOperation(_) => ErrorAction::SurfaceToEntry,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::ConfigParse(_)
            | Error::Io(_) => ErrorAction::NoRetry,
        }
    }

    /// Check if this error may go away on a later poll
    pub fn is_retryable(&self) -> bool {
        matches!(self.action(), ErrorAction::RetryNextPoll)
    }

    /// Check if this error is connection-level
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::MalformedResponse { .. })
    }

    /// Check if the remote side refused the request
    pub fn is_rejection(&self) -> bool {
        matches!(self.action(), ErrorAction::SurfaceToEntry)
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::transport("get_latest_thing", "connection reset");
        assert_eq!(err.action(), ErrorAction::RetryNextPoll);

        let err = Error::remote("update_thing", "thing not found");
        assert_eq!(err.action(), ErrorAction::SurfaceToEntry);

        let err = Error::Configuration("poll interval must be positive".into());
        assert_eq!(err.action(), ErrorAction::NoRetry);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::transport("remote_signal", "socket closed");
        assert!(transient.is_retryable());
        assert!(transient.is_transient());
        assert!(!transient.is_rejection());

        let rejected = Error::remote("create_thing", "invalid link target");
        assert!(!rejected.is_retryable());
        assert!(rejected.is_rejection());

        let decode = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err = Error::from(decode);
        assert!(err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = Error::remote("delete_thing", "Did not find Thing to delete.");
        assert_eq!(
            err.to_string(),
            "Remote rejected delete_thing: Did not find Thing to delete."
        );
    }
}
