//! SAI error types and status handling.
//!
//! Raw SAI status codes are converted into Rust's `Result` type at the
//! capability boundary; orchestration code only ever sees [`SaiError`].

use std::fmt;
use thiserror::Error;

/// SAI status codes matching the SAI C API.
///
/// Only the values the VNET capability surface can produce are listed; the
/// catch-all is [`SaiStatus::Failure`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    Uninitialized = -12,
    TableFull = -13,
    ObjectInUse = -17,
}

impl SaiStatus {
    /// Creates a SaiStatus from a raw i32 value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => SaiStatus::Success,
            -2 => SaiStatus::NotSupported,
            -3 => SaiStatus::NoMemory,
            -4 => SaiStatus::InsufficientResources,
            -5 => SaiStatus::InvalidParameter,
            -6 => SaiStatus::ItemAlreadyExists,
            -7 => SaiStatus::ItemNotFound,
            -12 => SaiStatus::Uninitialized,
            -13 => SaiStatus::TableFull,
            -17 => SaiStatus::ObjectInUse,
            _ => SaiStatus::Failure,
        }
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == SaiStatus::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> SaiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SaiError::from_status(self))
        }
    }
}

impl fmt::Display for SaiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaiStatus::Success => "SAI_STATUS_SUCCESS",
            SaiStatus::Failure => "SAI_STATUS_FAILURE",
            SaiStatus::NotSupported => "SAI_STATUS_NOT_SUPPORTED",
            SaiStatus::NoMemory => "SAI_STATUS_NO_MEMORY",
            SaiStatus::InsufficientResources => "SAI_STATUS_INSUFFICIENT_RESOURCES",
            SaiStatus::InvalidParameter => "SAI_STATUS_INVALID_PARAMETER",
            SaiStatus::ItemAlreadyExists => "SAI_STATUS_ITEM_ALREADY_EXISTS",
            SaiStatus::ItemNotFound => "SAI_STATUS_ITEM_NOT_FOUND",
            SaiStatus::Uninitialized => "SAI_STATUS_UNINITIALIZED",
            SaiStatus::TableFull => "SAI_STATUS_TABLE_FULL",
            SaiStatus::ObjectInUse => "SAI_STATUS_OBJECT_IN_USE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for SAI operations.
#[derive(Debug, Clone, Error)]
pub enum SaiError {
    /// SAI API returned an error status.
    #[error("SAI operation failed: {status}")]
    Status { status: SaiStatus },

    /// Invalid parameter passed to SAI API.
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The requested item was not found.
    #[error("item not found: {item}")]
    NotFound { item: String },

    /// The item already exists.
    #[error("item already exists: {item}")]
    AlreadyExists { item: String },

    /// Hardware resource allocation failed (table full or out of resources).
    #[error("resource exhaustion: {resource}")]
    ResourceExhaustion { resource: String },

    /// Object is in use and cannot be removed.
    #[error("object in use: {object}")]
    ObjectInUse { object: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SaiError {
    /// Creates an error from a SAI status code.
    pub fn from_status(status: SaiStatus) -> Self {
        match status {
            SaiStatus::Success => SaiError::Internal {
                message: "from_status called with success status".to_string(),
            },
            SaiStatus::InvalidParameter => SaiError::InvalidParameter {
                message: format!("SAI returned {}", status),
            },
            SaiStatus::ItemNotFound => SaiError::NotFound {
                item: "unknown".to_string(),
            },
            SaiStatus::ItemAlreadyExists => SaiError::AlreadyExists {
                item: "unknown".to_string(),
            },
            SaiStatus::NoMemory | SaiStatus::InsufficientResources | SaiStatus::TableFull => {
                SaiError::ResourceExhaustion {
                    resource: format!("SAI returned {}", status),
                }
            }
            SaiStatus::ObjectInUse => SaiError::ObjectInUse {
                object: "unknown".to_string(),
            },
            _ => SaiError::Status { status },
        }
    }

    /// Creates an invalid parameter error with a message.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a not found error with an item description.
    pub fn not_found(item: impl Into<String>) -> Self {
        SaiError::NotFound { item: item.into() }
    }

    /// Creates an already exists error.
    pub fn already_exists(item: impl Into<String>) -> Self {
        SaiError::AlreadyExists { item: item.into() }
    }

    /// Creates a resource exhaustion error.
    pub fn resource_exhaustion(resource: impl Into<String>) -> Self {
        SaiError::ResourceExhaustion {
            resource: resource.into(),
        }
    }

    /// Creates an object in use error.
    pub fn object_in_use(object: impl Into<String>) -> Self {
        SaiError::ObjectInUse {
            object: object.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        SaiError::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates allocation failure.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, SaiError::ResourceExhaustion { .. })
    }
}

/// Result type for SAI operations.
pub type SaiResult<T> = Result<T, SaiError>;
