//! Event Listener Contract
//!
//! A listener implements any subset of the six hooks; unimplemented hooks are
//! no-ops. Hooks run strictly in series. Returning an error aborts the
//! remaining listeners and the operation itself; setting `args.result`
//! marks the operation as already satisfied.

use crate::models::DataObjectState;
use crate::query::QueryExpression;
use crate::services::{DataError, DataModel};
use crate::DataObject;
use async_trait::async_trait;
use serde_json::Value;

/// Operation that emitted an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Save,
    Remove,
    /// Query returning rows
    Execute,
    /// Query returning a row count
    Count,
}

/// Arguments shared by every listener of one emission
pub struct DataEventArgs {
    /// Model the operation runs on
    pub model: DataModel,
    pub source: EventSource,
    pub state: DataObjectState,
    /// Object being saved or removed (empty for queries)
    pub target: DataObject,
    /// Stored version of the target for updates and removals
    pub previous: Option<DataObject>,
    /// Expression of a query
    pub query: Option<QueryExpression>,
    /// Fields expanded after a query
    pub expand: Vec<String>,
    /// Operation result; set by a listener to short-circuit the operation
    pub result: Option<Value>,
    /// Set while saving the base part of a derived object
    pub inherited: bool,
}

impl DataEventArgs {
    pub fn for_save(model: DataModel, state: DataObjectState, target: DataObject) -> Self {
        Self {
            model,
            source: EventSource::Save,
            state,
            target,
            previous: None,
            query: None,
            expand: Vec::new(),
            result: None,
            inherited: false,
        }
    }

    pub fn for_remove(model: DataModel, target: DataObject) -> Self {
        Self {
            source: EventSource::Remove,
            ..Self::for_save(model, DataObjectState::Delete, target)
        }
    }

    pub fn for_query(
        model: DataModel,
        source: EventSource,
        query: QueryExpression,
        expand: Vec<String>,
    ) -> Self {
        Self {
            model,
            source,
            state: DataObjectState::Execute,
            target: DataObject::new(),
            previous: None,
            query: Some(query),
            expand,
            result: None,
            inherited: false,
        }
    }
}

impl std::fmt::Debug for DataEventArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEventArgs")
            .field("model", &self.model.name())
            .field("source", &self.source)
            .field("state", &self.state)
            .field("target", &self.target)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

/// Pluggable listener of model events
#[async_trait]
pub trait DataEventListener: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn before_save(&self, _args: &mut DataEventArgs) -> Result<(), DataError> {
        Ok(())
    }

    async fn after_save(&self, _args: &mut DataEventArgs) -> Result<(), DataError> {
        Ok(())
    }

    async fn before_remove(&self, _args: &mut DataEventArgs) -> Result<(), DataError> {
        Ok(())
    }

    async fn after_remove(&self, _args: &mut DataEventArgs) -> Result<(), DataError> {
        Ok(())
    }

    async fn before_execute(&self, _args: &mut DataEventArgs) -> Result<(), DataError> {
        Ok(())
    }

    async fn after_execute(&self, _args: &mut DataEventArgs) -> Result<(), DataError> {
        Ok(())
    }
}
