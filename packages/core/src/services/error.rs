//! Service Layer Error Types
//!
//! This module defines the public error type of the persistence core. Every
//! variant carries a stable machine-readable code (`DataError::code`) so callers
//! can branch on failures without matching message text.
//!
//! | Code         | Meaning                                        |
//! |--------------|------------------------------------------------|
//! | `ENULL`      | not-null violation                             |
//! | `EUNQ`       | unique-constraint violation                    |
//! | `EVALIDATE`  | other validation failure                       |
//! | `EDATA`      | associated object missing or ambiguous         |
//! | `ECONF`      | configuration / model definition mistake       |
//! | `EACCESS`    | permission denied                              |
//! | `ENOTFOUND`  | target object does not exist                   |
//! | `EQUERY`     | malformed query or unsupported nested path     |
//! | `EFUNC`      | unknown function in a default/calculated value |
//! | `EDB`        | adapter failure                                |
//! | `ESERIALIZE` | JSON (de)serialization failure                 |

use crate::db::DatabaseError;
use thiserror::Error;

/// Persistence core errors
#[derive(Error, Debug, Clone)]
pub enum DataError {
    /// Required attribute is missing or null
    #[error("{model}.{field} cannot be empty")]
    NotNull { model: String, field: String },

    /// Another object already uses the same unique attribute values
    #[error("{model}: an object with the same {} already exists", .fields.join(", "))]
    UniqueConstraint {
        model: String,
        fields: Vec<String>,
        description: Option<String>,
    },

    /// Generic validation failure
    #[error("Validation failed for {model}: {message}")]
    Validation { model: String, message: String },

    /// Object-valued association could not be resolved to a stored object
    #[error("Associated {model} object cannot be found ({field})")]
    AssociationMissing { model: String, field: String },

    /// Object-valued association matches more than one stored object
    #[error("Associated {model} object is ambiguous ({field}): {matches} objects match")]
    AssociationAmbiguous {
        model: String,
        field: String,
        matches: usize,
    },

    /// Model is not registered in the configuration
    #[error("Model '{0}' cannot be found")]
    ModelNotFound(String),

    /// Configuration or model definition mistake
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Explicit or inferred mapping is not valid
    #[error("Invalid mapping for {model}.{field}: {reason}")]
    InvalidMapping {
        model: String,
        field: String,
        reason: String,
    },

    /// Permission gate denied the operation
    #[error("Access denied ({status}): {message}")]
    PermissionDenied { status: u16, message: String },

    /// Object to update or remove does not exist
    #[error("{model} object cannot be found: {key}")]
    ObjectNotFound { model: String, key: String },

    /// Malformed query expression or parameter
    #[error("Query error: {0}")]
    Query(String),

    /// Function referenced by an expression is not registered
    #[error("Function '{0}' is not registered")]
    FunctionNotFound(String),

    /// Adapter operation failed
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl DataError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotNull { .. } => "ENULL",
            Self::UniqueConstraint { .. } => "EUNQ",
            Self::Validation { .. } => "EVALIDATE",
            Self::AssociationMissing { .. } | Self::AssociationAmbiguous { .. } => "EDATA",
            Self::ModelNotFound(_) | Self::Configuration(_) | Self::InvalidMapping { .. } => {
                "ECONF"
            }
            Self::PermissionDenied { .. } => "EACCESS",
            Self::ObjectNotFound { .. } => "ENOTFOUND",
            Self::Query(_) => "EQUERY",
            Self::FunctionNotFound(_) => "EFUNC",
            Self::Database(_) => "EDB",
            Self::Serialization(_) => "ESERIALIZE",
        }
    }

    /// HTTP-like status marker for permission errors
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::PermissionDenied { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::NotNull { .. } | Self::UniqueConstraint { .. } | Self::Validation { .. }
        )
    }

    pub fn is_association_error(&self) -> bool {
        matches!(
            self,
            Self::AssociationMissing { .. } | Self::AssociationAmbiguous { .. }
        )
    }

    /// Create a not-null violation error
    pub fn not_null(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::NotNull {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Create a unique-constraint violation error
    pub fn unique_constraint(
        model: impl Into<String>,
        fields: Vec<String>,
        description: Option<String>,
    ) -> Self {
        Self::UniqueConstraint {
            model: model.into(),
            fields,
            description,
        }
    }

    /// Create a validation error
    pub fn validation(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a missing association error
    pub fn association_missing(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::AssociationMissing {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Create an ambiguous association error
    pub fn association_ambiguous(
        model: impl Into<String>,
        field: impl Into<String>,
        matches: usize,
    ) -> Self {
        Self::AssociationAmbiguous {
            model: model.into(),
            field: field.into(),
            matches,
        }
    }

    /// Create a model not found error
    pub fn model_not_found(name: impl Into<String>) -> Self {
        Self::ModelNotFound(name.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid mapping error
    pub fn invalid_mapping(
        model: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMapping {
            model: model.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(status: u16, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            status,
            message: message.into(),
        }
    }

    /// Create an object not found error
    pub fn object_not_found(model: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            model: model.into(),
            key: key.into(),
        }
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a function not found error
    pub fn function_not_found(name: impl Into<String>) -> Self {
        Self::FunctionNotFound(name.into())
    }
}
