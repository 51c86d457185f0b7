//! Error types and result aliases for Basin.
//!
//! Every fallible operation in the core returns this error type. The variant
//! encodes the failure category: transport failures may be retried by
//! redelivering the originating message, deterministic failures terminate the
//! job. The dispatcher relies on [`Error::is_transient`] for that decision
//! rather than inspecting message strings.

/// The result type used throughout Basin.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Basin operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request, unsupported file, or malformed query spec.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An object store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A message bus operation failed.
    #[error("bus error: {message}")]
    Bus {
        /// Description of the bus failure.
        message: String,
    },

    /// A job store operation failed.
    #[error("job store error: {message}")]
    JobStore {
        /// Description of the job store failure.
        message: String,
    },

    /// A transient catalog failure (lost commit race, unreadable manifest).
    #[error("catalog error: {message}")]
    Catalog {
        /// Description of the catalog failure.
        message: String,
    },

    /// An append's schema is incompatible with the existing table.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// The engine's description of the incompatibility, verbatim.
        message: String,
    },

    /// Deterministic engine failure during scan or aggregation.
    #[error("execution error: {message}")]
    Execution {
        /// Description of the engine failure.
        message: String,
    },

    /// A stage exceeded its deadline.
    #[error("timeout: {message}")]
    Timeout {
        /// Description of the stage that timed out.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new bus error.
    #[must_use]
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
        }
    }

    /// Creates a new job store error.
    #[must_use]
    pub fn job_store(message: impl Into<String>) -> Self {
        Self::JobStore {
            message: message.into(),
        }
    }

    /// Creates a new catalog error.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Creates a new execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true when redelivering the originating message may succeed.
    ///
    /// Transport failures (storage, bus, job store, catalog) are transient:
    /// the dispatcher nacks with requeue and leaves the job in `processing`.
    /// Everything else is deterministic and terminates the job.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Bus { .. } | Self::JobStore { .. } | Self::Catalog { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            message: value.to_string(),
        }
    }
}
