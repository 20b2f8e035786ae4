//! Business Services
//!
//! This module contains the runtime side of the persistence core:
//!
//! - `DataConfiguration` - model registry, settings, caches and registries
//! - `DataContext` - configuration + adapter + user, the entry point for models
//! - `DataModel` - a model bound to a context: attributes, queries, save/remove
//!   (`persistence`) and schema migration (`migration`)
//! - `PermissionEvaluator` - pluggable permission gate
//! - `DataCache` - cache backing the data caching listener
//!
//! Services coordinate between the adapter layer and the declarative model
//! definitions; they never build adapter-specific statements themselves.

pub mod cache;
pub mod configuration;
pub mod context;
pub mod error;
pub mod functions;
mod migration;
pub mod model;
pub mod permission;
mod persistence;
pub mod settings;

pub use cache::{DataCache, MemoryDataCache};
pub use configuration::DataConfiguration;
pub use context::DataContext;
pub use error::DataError;
pub use functions::{DataFunction, FunctionContext, FunctionRegistry};
pub use model::DataModel;
pub use permission::{
    denial_status, PermissionDecision, PermissionEvaluator, PermissionMode, PermissionRequest,
};
pub use settings::{DataSettings, DEFAULT_PLURAL_PATTERN};
