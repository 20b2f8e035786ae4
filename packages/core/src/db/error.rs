//! Database Error Types
//!
//! This module defines error types for adapter operations, providing
//! clear error handling for statement, transaction, and schema failures.

use thiserror::Error;

/// Adapter operation errors
///
/// Covers all error cases an adapter reports back to the persistence core.
/// Validation and association failures are handled by the service-layer
/// error type (`DataError`).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    /// Statement targets a table or view that does not exist
    #[error("Entity '{0}' does not exist")]
    EntityNotFound(String),

    /// Statement could not be executed
    #[error("Statement failed: {context}")]
    StatementFailed { context: String },

    /// Transaction could not be started, committed or rolled back
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Capability not provided by this adapter
    #[error("Operation not supported by adapter: {0}")]
    Unsupported(String),

    /// Schema change conflicts with the existing structure
    #[error("Schema conflict on '{entity}': {reason}")]
    SchemaConflict { entity: String, reason: String },
}

impl DatabaseError {
    /// Create an entity not found error
    pub fn entity_not_found(entity: impl Into<String>) -> Self {
        Self::EntityNotFound(entity.into())
    }

    /// Create a statement failed error with context
    pub fn statement_failed(context: impl Into<String>) -> Self {
        Self::StatementFailed {
            context: context.into(),
        }
    }

    /// Create a transaction failed error
    pub fn transaction_failed(msg: impl Into<String>) -> Self {
        Self::TransactionFailed(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported(operation.into())
    }

    /// Create a schema conflict error
    pub fn schema_conflict(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaConflict {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}
