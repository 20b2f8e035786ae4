//! DataModel Core Persistence Layer
//!
//! This crate provides the persistence core of a data-modeling layer: it turns
//! object-graph save/remove operations on declaratively defined models into
//! ordered adapter statements, resolves relationships between models and keeps
//! the physical schema in sync with the model definitions.
//!
//! # Architecture
//!
//! - **Declarative Models**: `ModelDefinition` describes fields, constraints,
//!   views and seed data; relationships are inferred from field types and names
//!   when no explicit mapping is given
//! - **Event Pipeline**: every save/remove/execute runs through ordered,
//!   cancelable before/after listener chains (validation, defaults, permissions,
//!   caching)
//! - **Fluent Queries**: `DataQueryable` builds adapter-independent query
//!   expressions, resolving nested attribute paths (`customer/address/city`)
//!   into left joins
//! - **Incremental Migration**: table schemas are diffed against the adapter's
//!   introspection and applied versions are recorded in a ledger
//!
//! # Modules
//!
//! - [`models`] - Model definitions, association mappings, object state
//! - [`association`] - Mapping resolver, related-object strategies, expansion
//! - [`query`] - Query expressions, parameter parser, `DataQueryable`
//! - [`events`] - Event channels and built-in listeners
//! - [`services`] - Configuration, context, models, persistence and migration
//! - [`db`] - Adapter abstraction and the in-memory reference adapter

pub mod association;
pub mod db;
pub mod events;
pub mod logging;
pub mod models;
pub mod query;
pub mod services;

/// A data object: attribute name to JSON value
pub type DataObject = serde_json::Map<String, serde_json::Value>;

// Re-export commonly used types
pub use association::DataAssociation;
pub use db::{DataAdapter, DatabaseError, MemoryAdapter};
pub use events::{DataEventArgs, DataEventListener, EventSource};
pub use models::*;
pub use query::{DataQueryable, DataResultSet, QueryExpression, QueryParams};
pub use services::*;
