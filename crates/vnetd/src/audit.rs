//! Structured audit logging.
//!
//! Every hardware-affecting operation emits one structured audit record,
//! success or failure, following NIST SP 800-53 AU-2/AU-3: timestamped,
//! source-attributed, outcome-tagged, serialized as JSON for SIEM
//! ingestion. Operational logging goes through the level macros
//! ([`info_log!`], [`warn_log!`], [`error_log!`], [`debug_log!`]), which
//! map onto RFC 5424 syslog severities via `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories (NIST AU-2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Configuration changes to the system.
    ConfigurationChange,
    /// Resource creation events.
    ResourceCreate,
    /// Resource modification events.
    ResourceModify,
    /// Resource deletion events.
    ResourceDelete,
    /// Daemon startup and shutdown.
    SystemLifecycle,
    /// Error and failure events.
    ErrorCondition,
    /// Administrative actions.
    AdminAction,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditCategory::ConfigurationChange => "CONFIGURATION_CHANGE",
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceModify => "RESOURCE_MODIFY",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::ErrorCondition => "ERROR_CONDITION",
            AuditCategory::AdminAction => "ADMIN_ACTION",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of an audited operation (NIST AU-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed.
    Failure,
    /// The operation is part of a multi-step sequence still underway.
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Failure => "FAILURE",
            AuditOutcome::InProgress => "IN_PROGRESS",
        };
        write!(f, "{}", s)
    }
}

/// One immutable audit record.
///
/// Built with the builder methods, then emitted via [`audit_log!`]. The
/// UTC timestamp is fixed at construction (NIST AU-8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp, microsecond precision.
    pub timestamp: DateTime<Utc>,
    /// Event category.
    pub category: AuditCategory,
    /// Component that performed the operation.
    pub source: String,
    /// Operation name.
    pub action: String,
    /// Outcome.
    pub outcome: AuditOutcome,
    /// Identifier of the affected object, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Type of the affected object, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Error message for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured context details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditRecord {
    /// Creates a record; the outcome defaults to `InProgress` until set.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            error: None,
            details: None,
        }
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sets the affected object identifier.
    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    /// Sets the affected object type.
    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    /// Sets the error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets structured context details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serializes the record as JSON for SIEM ingestion (NIST AU-6).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an audit record at a level derived from its outcome: successes at
/// info, in-progress at debug, failures at warn.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Debug-level logging with structured context.
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(source = $source, $($arg)*)
    };
}

/// Info-level logging with structured context.
#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(source = $source, $($arg)*)
    };
}

/// Warning-level logging with structured context.
#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(source = $source, $($arg)*)
    };
}

/// Error-level logging with structured context.
#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(source = $source, $($arg)*)
    };
}

/// Installs a tracing subscriber for deployments that want structured
/// output directly; by default the binary leaves tracing unsubscribed and
/// the records reach `env_logger` through the log facade.
///
/// Filter resolution order: `RUST_LOG`, then the supplied default level.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
