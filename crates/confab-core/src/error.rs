//! Client error taxonomy.
//!
//! Every error that crosses a crate boundary is a [`ClientError`]. The
//! variants are opaque kinds, not transport status codes: transports map
//! their native failures (gRPC status, WebSocket close codes) into this
//! taxonomy before anything else sees them.

use std::time::Duration;

/// Coarse classification of a [`ClientError`], surfaced to the UI alongside
/// the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or inconsistent configuration.
    Config,
    /// Authentication / authorization failure.
    Auth,
    /// Transport could not be established.
    TransportInit,
    /// Transport was torn down while an operation was in flight.
    TransportClosed,
    /// Malformed inbound frame.
    Protocol,
    /// The remote returned an error status.
    Server,
    /// An operation exceeded its deadline.
    Timeout,
    /// Caller-initiated cancellation.
    Cancelled,
    /// A tool handler failed.
    Tool,
    /// Audio playback failure.
    Playback,
    /// A bug on our side.
    Internal,
}

/// Errors surfaced by the streaming client core.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Invalid configuration (empty model, duplicate tool name, etc.).
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Credential resolution or authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The transport could not be opened.
    #[error("Failed to initialize transport: {0}")]
    TransportInit(String),

    /// The transport session is closed.
    #[error("Transport is closed")]
    TransportClosed,

    /// An inbound frame could not be decoded.
    #[error("Malformed frame: {0}")]
    Protocol(String),

    /// The remote returned an error status.
    #[error("Server error: {message}")]
    Server {
        /// Whether the retry engine may reconnect after this error.
        retryable: bool,
        /// Human-readable diagnostic from the server.
        message: String,
    },

    /// A deadline elapsed.
    #[error("Timed out after {elapsed:?}: {context}")]
    Timeout {
        /// What was being waited on.
        context: String,
        /// How long we waited.
        elapsed: Duration,
        /// Handshake timeouts are retryable; demoted deadline errors are not.
        retryable: bool,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A tool handler returned an error.
    #[error("Tool '{name}' failed: {message}")]
    Tool {
        /// The registered tool name.
        name: String,
        /// Handler diagnostic.
        message: String,
    },

    /// Playback failed for one chunk. Never fatal for the session.
    #[error("Playback error: {0}")]
    Playback(String),

    /// Invariant violation inside the core.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// The coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Auth(_) => ErrorKind::Auth,
            Self::TransportInit(_) => ErrorKind::TransportInit,
            Self::TransportClosed => ErrorKind::TransportClosed,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Server { .. } => ErrorKind::Server,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::Playback(_) => ErrorKind::Playback,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the retry engine is allowed to reconnect after this error.
    ///
    /// Cancellation is never retryable; it short-circuits the retry loop
    /// before this predicate is consulted.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Server { retryable, .. } | Self::Timeout { retryable, .. } => *retryable,
            Self::TransportClosed => true,
            _ => false,
        }
    }

    /// Apply the substring demotion rule: any nested message containing
    /// "cancel" becomes [`ClientError::Cancelled`], "deadline" becomes a
    /// non-retryable [`ClientError::Timeout`]. Everything else passes
    /// through unchanged.
    #[must_use]
    pub fn demoted(self) -> Self {
        let message = self.to_string().to_ascii_lowercase();
        if matches!(self, Self::Cancelled | Self::Timeout { .. }) {
            return self;
        }
        if message.contains("cancel") {
            return Self::Cancelled;
        }
        if message.contains("deadline") {
            return Self::Timeout {
                context: self.to_string(),
                elapsed: Duration::ZERO,
                retryable: false,
            };
        }
        self
    }

    /// Shorthand for a retryable server error.
    #[must_use]
    pub fn server_retryable(message: impl Into<String>) -> Self {
        Self::Server {
            retryable: true,
            message: message.into(),
        }
    }

    /// Shorthand for a terminal server error.
    #[must_use]
    pub fn server_fatal(message: impl Into<String>) -> Self {
        Self::Server {
            retryable: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_retryable_hint_is_respected() {
        assert!(ClientError::server_retryable("unavailable").is_retryable());
        assert!(!ClientError::server_fatal("invalid argument").is_retryable());
    }

    #[test]
    fn auth_and_config_are_terminal() {
        assert!(!ClientError::Auth("bad key".into()).is_retryable());
        assert!(!ClientError::Config("no model".into()).is_retryable());
    }

    #[test]
    fn cancel_substring_demotes() {
        let err = ClientError::server_retryable("rpc canceled by peer").demoted();
        assert!(matches!(err, ClientError::Cancelled));
        assert!(!err.is_retryable());
    }

    #[test]
    fn deadline_substring_demotes_to_non_retryable_timeout() {
        let err = ClientError::server_retryable("deadline exceeded").demoted();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.is_retryable());
    }

    #[test]
    fn demotion_leaves_ordinary_errors_alone() {
        let err = ClientError::server_fatal("permission denied").demoted();
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[test]
    fn demotion_is_idempotent_on_cancelled() {
        let err = ClientError::Cancelled.demoted();
        assert!(matches!(err, ClientError::Cancelled));
    }
}
