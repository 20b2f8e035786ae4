//! Database Layer
//!
//! This module defines everything the persistence core needs from storage:
//!
//! - The `DataAdapter` capability trait (statements, transactions, identities,
//!   introspection, migration, views)
//! - Adapter-independent statement and schema-diff descriptors
//! - `MemoryAdapter`, the in-memory reference adapter
//!
//! # Architecture
//!
//! SQL dialects, connection lifecycle and pooling live in concrete adapters
//! outside this crate. The core only ever talks to `Arc<dyn DataAdapter>`, so
//! any backend that can evaluate a `QueryExpression` can be plugged in.

mod adapter;
mod error;
pub(crate) mod evaluator;
mod memory_store;

pub use adapter::{
    execute_in_transaction, ColumnDefinition, DataAdapter, SchemaDiff, Statement,
};
pub use error::DatabaseError;
pub use memory_store::MemoryAdapter;
