//! Associations
//!
//! - `resolver` - infers the `AssociationMapping` of a field
//! - `strategies` - `DataAssociation` access to related objects
//!   (`HasOneAssociation`, `HasManyAssociation`, `DataObjectJunction`,
//!   `HasParentJunction`)
//! - `expand` - batch post-fetch expansion of query results
//! - `write_back` / `cascade` - one-shot save/remove listeners
//! - `junction` - synthetic models backing junction tables

mod cascade;
pub(crate) mod expand;
mod junction;
mod resolver;
mod strategies;
mod write_back;

pub use cascade::CascadeListener;
pub(crate) use junction::{ensure_junction_model, junction_definition};
pub use junction::reference_key;
pub use resolver::infer_mapping;
pub use strategies::{
    DataAssociation, DataObjectJunction, HasManyAssociation, HasOneAssociation, HasParentJunction,
};
pub use write_back::AssociationWriteBack;
