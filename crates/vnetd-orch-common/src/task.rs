//! Task processing outcome and error taxonomy.
//!
//! Every change event is processed to a terminal outcome per pass. The
//! taxonomy distinguishes the one retryable class (an unmet cross-table
//! dependency) from the terminal ones; nothing here is ever fatal to the
//! daemon.

use thiserror::Error;

/// Result of processing a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Event applied successfully.
    Success,
    /// Event was malformed and dropped.
    InvalidEntry,
    /// Event failed terminally (hardware error, rejected change).
    Failed,
    /// Event is waiting for a dependency and will be retried.
    WaitingForDependency,
    /// Event was a no-op (idempotent delete, unchanged update).
    Ignore,
}

impl TaskStatus {
    /// Returns true if the event needs no further handling.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Ignore)
    }

    /// Returns true if the event should be retried on a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::WaitingForDependency)
    }

    /// Returns true if the event failed terminally.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::InvalidEntry | TaskStatus::Failed)
    }
}

/// Error type for event processing failures.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The event violated its table schema; dropped and logged.
    #[error("invalid entry: {message}")]
    InvalidEntry { message: String },

    /// A referenced object does not exist yet; deferred and retried.
    #[error("waiting for dependency: {dependency}")]
    WaitingForDependency { dependency: String },

    /// A structural attribute of an existing object cannot change in place.
    #[error("immutable attribute: {attribute} of {object}")]
    ImmutableAttribute { object: String, attribute: String },

    /// The object is still referenced and cannot be deleted.
    #[error("object in use: {object} ({references} references)")]
    InUse { object: String, references: u32 },

    /// Hardware allocation failed; the triggering change was rolled back.
    #[error("resource exhaustion: {message}")]
    ResourceExhaustion { message: String },

    /// Lookup of an unregistered name.
    #[error("not found: {object}")]
    NotFound { object: String },

    /// Hardware call failed.
    #[error("switch API error: {message}")]
    SwitchApi { message: String },

    /// Internal invariant violation.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TaskError {
    /// Creates an invalid entry error.
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        TaskError::InvalidEntry {
            message: message.into(),
        }
    }

    /// Creates a dependency wait error.
    pub fn waiting_for(dependency: impl Into<String>) -> Self {
        TaskError::WaitingForDependency {
            dependency: dependency.into(),
        }
    }

    /// Creates an immutable-attribute error.
    pub fn immutable_attribute(object: impl Into<String>, attribute: impl Into<String>) -> Self {
        TaskError::ImmutableAttribute {
            object: object.into(),
            attribute: attribute.into(),
        }
    }

    /// Creates an in-use error.
    pub fn in_use(object: impl Into<String>, references: u32) -> Self {
        TaskError::InUse {
            object: object.into(),
            references,
        }
    }

    /// Creates a resource exhaustion error.
    pub fn resource_exhaustion(message: impl Into<String>) -> Self {
        TaskError::ResourceExhaustion {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(object: impl Into<String>) -> Self {
        TaskError::NotFound {
            object: object.into(),
        }
    }

    /// Creates a switch API error.
    pub fn switch_api(message: impl Into<String>) -> Self {
        TaskError::SwitchApi {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal {
            message: message.into(),
        }
    }

    /// Converts this error to a TaskStatus.
    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::InvalidEntry { .. } => TaskStatus::InvalidEntry,
            TaskError::WaitingForDependency { .. } => TaskStatus::WaitingForDependency,
            TaskError::ImmutableAttribute { .. }
            | TaskError::InUse { .. }
            | TaskError::ResourceExhaustion { .. }
            | TaskError::NotFound { .. }
            | TaskError::SwitchApi { .. }
            | TaskError::Internal { .. } => TaskStatus::Failed,
        }
    }

    /// Returns true if the event should be retried on a later pass.
    pub fn is_retryable(&self) -> bool {
        self.to_status().is_retryable()
    }
}

/// Result type for event processing.
pub type TaskResult<T> = Result<T, TaskError>;
