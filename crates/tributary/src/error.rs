//! Error types for tributary operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for tributary operations.
pub type Result<T> = std::result::Result<T, TributaryError>;

/// Errors surfaced by stores, the workflow engine and the ingestion API.
///
/// Business outcomes (an ignored event, a failed project run) are never
/// errors; they are recorded as states. These variants describe failures of
/// the machinery itself.
#[derive(Debug, Error)]
pub enum TributaryError {
    /// A record the core depends on does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record ("event", "event source", "account", ...).
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A store rejected or failed an operation.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    /// A state write would move a terminal state backwards.
    #[error("invalid state transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        /// The event (or event/project pair) being updated.
        subject: String,
        /// Current state name.
        from: &'static str,
        /// Rejected state name.
        to: &'static str,
    },

    /// A bounded operation did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// A durable workflow failed at the engine level.
    #[error("workflow {workflow_id} failed: {message}")]
    Workflow {
        /// Deterministic workflow identifier.
        workflow_id: String,
        /// Failure description.
        message: String,
    },

    /// Publishing or subscribing failed.
    #[error("pub/sub error: {message}")]
    PubSub {
        /// Description of the transport failure.
        message: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other failure from a collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TributaryError {
    /// Shorthand for [`TributaryError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`TributaryError::Store`].
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
