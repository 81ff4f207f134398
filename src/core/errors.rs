use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the memoizing execution context
#[derive(Debug, Error)]
pub enum MemoError {
    /// The namespace passed to `get_action` is not registered
    #[error("A namespace named '{namespace}' could not be found")]
    NamespaceNotFound { namespace: String },

    /// The namespace exists but does not contain the action
    #[error("An action named '{action}' was not found in namespace '{namespace}'")]
    ActionNotFound { namespace: String, action: String },

    /// Arguments could not be collated or coerced against the declared signature
    #[error("Invalid arguments for {action}: {message}")]
    Signature { action: String, message: String },

    /// An action returned outputs that do not line up with its declared outputs
    #[error("Invalid outputs from {action}: {message}")]
    InvalidOutputs { action: String, message: String },

    /// A cached collection record violates the completeness invariant
    #[error("Corrupt cached collection '{output}' for {action}: {reason}")]
    CorruptCollection {
        action: String,
        output: String,
        reason: String,
    },

    /// A cached record lacks one of the action's declared outputs
    #[error("Cached record for {action} has no entry for output '{output}'")]
    IncompleteRecord { action: String, output: String },

    /// Indexed data is gone from the durable pool
    #[error("No stored data for artifact {uuid}")]
    MissingStorage { uuid: Uuid },

    /// An artifact could not be constructed from a view
    #[error("Invalid artifact: {message}")]
    InvalidArtifact { message: String },

    /// Real execution of an action failed
    #[error("Execution of {action} failed")]
    Execution {
        action: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Errors raised by an executor while scheduling or joining a job
    #[error("Executor '{label}' failed: {message}")]
    Executor { label: String, message: String },

    /// A deferred execution failed and its error is shared by several waiters
    #[error("Deferred execution failed: {source}")]
    Deferred {
        #[source]
        source: Arc<MemoError>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Durable pool storage errors
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MemoError {
    pub fn namespace_not_found<S: Into<String>>(namespace: S) -> Self {
        Self::NamespaceNotFound {
            namespace: namespace.into(),
        }
    }

    pub fn action_not_found<N: Into<String>, A: Into<String>>(namespace: N, action: A) -> Self {
        Self::ActionNotFound {
            namespace: namespace.into(),
            action: action.into(),
        }
    }

    pub fn signature<A: Into<String>, M: Into<String>>(action: A, message: M) -> Self {
        Self::Signature {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn invalid_outputs<A: Into<String>, M: Into<String>>(action: A, message: M) -> Self {
        Self::InvalidOutputs {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn corrupt_collection<A, O, R>(action: A, output: O, reason: R) -> Self
    where
        A: Into<String>,
        O: Into<String>,
        R: Into<String>,
    {
        Self::CorruptCollection {
            action: action.into(),
            output: output.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_artifact<S: Into<String>>(message: S) -> Self {
        Self::InvalidArtifact {
            message: message.into(),
        }
    }

    /// Wrap an action failure, keeping its error as the source
    pub fn execution<S: Into<String>>(action: S, source: anyhow::Error) -> Self {
        Self::Execution {
            action: action.into(),
            source: source.into(),
        }
    }

    pub fn executor<L: Into<String>, M: Into<String>>(label: L, message: M) -> Self {
        Self::Executor {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn database<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        operation: S,
        source: E,
    ) -> Self {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Unwrap a shared error if this is the last reference to it
    pub(crate) fn from_shared(shared: Arc<MemoError>) -> Self {
        Arc::try_unwrap(shared).unwrap_or_else(|source| Self::Deferred { source })
    }

    /// The error behind any layers of shared deferred failures
    pub fn root_cause(&self) -> &MemoError {
        match self {
            Self::Deferred { source } => source.root_cause(),
            other => other,
        }
    }

    /// True for the conditions the cache probe treats as an ordinary miss
    pub fn is_stale_index(&self) -> bool {
        matches!(
            self,
            Self::MissingStorage { .. } | Self::IncompleteRecord { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::NamespaceNotFound { .. } | Self::ActionNotFound { .. } => "resolution",
            Self::Signature { .. } => "signature",
            Self::InvalidOutputs { .. } => "outputs",
            Self::CorruptCollection { .. } => "corrupt_cache",
            Self::IncompleteRecord { .. } | Self::MissingStorage { .. } => "stale_index",
            Self::InvalidArtifact { .. } => "artifact",
            Self::Execution { .. } => "execution",
            Self::Executor { .. } | Self::Deferred { .. } => "executor",
            Self::Configuration { .. } => "configuration",
            Self::Database { .. } => "database",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MemoError>;

impl From<std::io::Error> for MemoError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for MemoError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for MemoError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<sled::Error> for MemoError {
    fn from(err: sled::Error) -> Self {
        Self::database("sled_operation", err)
    }
}
