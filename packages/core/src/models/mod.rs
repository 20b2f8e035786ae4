//! Data Models
//!
//! This module contains the declarative type model consumed by the core:
//!
//! - `ModelDefinition` / `FieldDefinition` / `ConstraintDefinition` - the
//!   model definition format
//! - `AssociationMapping` - resolved relationship descriptors
//! - `DataObjectState` - lifecycle state of a save/remove/execute operation
//! - `field_types` - primitive type catalog
//!
//! Data objects themselves are plain JSON maps (`DataObject`).

mod definition;
pub mod field_types;
mod mapping;
mod state;

pub use definition::{
    CachingMode, ConstraintDefinition, ConstraintType, EventListenerRef, FieldDefinition,
    FieldExpression, ModelDefinition, ViewDefinition, FUNCTION_PREFIX,
};
pub use mapping::{
    AssociationMapping, AssociationRole, CascadePolicy, ForeignKeyMapping, JunctionMapping,
};
pub use state::{DataObjectState, STATE_ATTRIBUTE};
