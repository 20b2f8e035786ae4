//! Data Model
//!
//! `DataModel` is a model definition bound to a `DataContext`. It is created by
//! `DataContext::model` and is cheap to clone; clones share the event
//! channels. Persistence (`save`, `remove`) and migration live in the
//! `persistence` and `migration` modules as further `impl DataModel` blocks.

use crate::association::{self, DataAssociation};
use crate::events::{register_model_listeners, ModelEvents};
use crate::models::{
    AssociationMapping, AssociationRole, ConstraintDefinition, DataObjectState, FieldDefinition,
    ModelDefinition,
};
use crate::query::{DataQueryable, QueryParams};
use crate::services::{DataContext, DataError, PermissionDecision, PermissionRequest};
use crate::DataObject;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct DataModel {
    context: DataContext,
    definition: Arc<ModelDefinition>,
    events: Arc<ModelEvents>,
}

impl std::fmt::Debug for DataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataModel")
            .field("name", &self.definition.name)
            .field("context", &self.context)
            .finish()
    }
}

impl DataModel {
    /// Bind a definition to a context and register its listeners
    pub fn new(context: DataContext, definition: Arc<ModelDefinition>) -> Result<Self, DataError> {
        let events = Arc::new(ModelEvents::new());
        register_model_listeners(&events, &definition, context.configuration())?;
        Ok(Self {
            context,
            definition,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn context(&self) -> &DataContext {
        &self.context
    }

    pub fn events(&self) -> &ModelEvents {
        &self.events
    }

    /// Storage table
    pub fn source_name(&self) -> &str {
        self.definition.source_name()
    }

    /// Entity queries read from
    pub fn view_name(&self) -> String {
        self.definition.view_name()
    }

    /// Same model on an unattended context; shares the event channels
    pub fn elevated(&self) -> Self {
        Self {
            context: self.context.elevated(),
            definition: Arc::clone(&self.definition),
            events: Arc::clone(&self.events),
        }
    }

    /// Another model of the same context
    pub fn related(&self, name: &str) -> Result<DataModel, DataError> {
        let model = self.context.model(name)?;
        Ok(if self.context.is_unattended() {
            model.elevated()
        } else {
            model
        })
    }

    //
    // ATTRIBUTES
    //

    /// Own attributes followed by inherited ones
    pub fn attributes(&self) -> Result<Arc<Vec<FieldDefinition>>, DataError> {
        self.context.configuration().attributes_of(self.name())
    }

    /// Attribute by field name or property alias
    pub fn attribute(&self, name: &str) -> Result<Option<FieldDefinition>, DataError> {
        Ok(self
            .attributes()?
            .iter()
            .find(|a| a.name == name || a.property.as_deref() == Some(name))
            .cloned())
    }

    pub fn primary_key(&self) -> Result<Option<FieldDefinition>, DataError> {
        self.context.configuration().primary_key_of(self.name())
    }

    /// Name of the primary key attribute
    pub fn key_name(&self) -> Result<String, DataError> {
        self.primary_key()?
            .map(|pk| pk.name)
            .ok_or_else(|| {
                DataError::configuration(format!("Model {} has no primary key", self.name()))
            })
    }

    /// Base model of the inheritance chain
    pub fn base(&self) -> Result<Option<DataModel>, DataError> {
        match &self.definition.inherits {
            Some(base) => Ok(Some(self.related(base)?)),
            None => Ok(None),
        }
    }

    /// Name of the model in the inheritance chain that declares `field`
    fn owner_of(&self, field: &str) -> Result<String, DataError> {
        let configuration = self.context.configuration();
        // Fails on inheritance cycles before the walk below
        self.attributes()?;
        let mut current = Some(Arc::clone(&self.definition));
        while let Some(definition) = current {
            if definition.field(field).is_some() {
                return Ok(definition.name.clone());
            }
            current = match &definition.inherits {
                Some(base) => Some(
                    configuration
                        .model_definition(base)
                        .ok_or_else(|| DataError::model_not_found(base))?,
                ),
                None => None,
            };
        }
        Err(DataError::query(format!(
            "Unknown attribute '{}' of model {}",
            field,
            self.name()
        )))
    }

    /// Mapping of a field, resolved against the model declaring it
    pub fn infer_mapping(&self, field: &str) -> Result<Option<AssociationMapping>, DataError> {
        let owner = self.owner_of(field)?;
        let name = self
            .context
            .configuration()
            .model_definition(&owner)
            .and_then(|d| d.field(field).map(|f| f.name.clone()))
            .unwrap_or_else(|| field.to_string());
        association::infer_mapping(self.context.configuration(), &owner, &name)
    }

    /// Mapping of a field together with the role the field plays in it
    pub fn mapping_role(
        &self,
        field: &str,
    ) -> Result<Option<(AssociationMapping, AssociationRole)>, DataError> {
        let owner = self.owner_of(field)?;
        let Some(attribute) = self.attribute(field)? else {
            return Ok(None);
        };
        Ok(self.infer_mapping(field)?.map(|mapping| {
            let role = mapping.role_of(&owner, &attribute.name);
            (mapping, role)
        }))
    }

    /// Whether a field is stored as a column of its model's table
    pub fn is_column(&self, field: &FieldDefinition) -> Result<bool, DataError> {
        if field.many {
            return Ok(false);
        }
        if field.is_primitive() {
            return Ok(true);
        }
        Ok(match self.mapping_role(&field.name)? {
            Some((_, role)) => role == AssociationRole::HasOne,
            None => true,
        })
    }

    /// Every column attribute visible through the model's view
    pub fn column_attributes(&self) -> Result<Vec<FieldDefinition>, DataError> {
        let mut columns = Vec::new();
        for attribute in self.attributes()?.iter() {
            if self.is_column(attribute)? {
                columns.push(attribute.clone());
            }
        }
        Ok(columns)
    }

    /// Columns of the model's own table: the primary key plus own column fields
    pub fn storage_attributes(&self) -> Result<Vec<FieldDefinition>, DataError> {
        let mut columns = Vec::new();
        if let Some(pk) = self.primary_key()? {
            if self.definition.field(&pk.name).is_none() {
                columns.push(pk);
            }
        }
        for field in &self.definition.fields {
            if self.is_column(field)? {
                columns.push(field.clone());
            }
        }
        Ok(columns)
    }

    /// Unique constraints of the model and its base chain
    pub fn unique_constraints(&self) -> Result<Vec<ConstraintDefinition>, DataError> {
        let mut constraints: Vec<ConstraintDefinition> =
            self.definition.unique_constraints().cloned().collect();
        if let Some(base) = self.base()? {
            for constraint in base.unique_constraints()? {
                if !constraints.contains(&constraint) {
                    constraints.push(constraint);
                }
            }
        }
        Ok(constraints)
    }

    //
    // QUERIES
    //

    pub fn queryable(&self) -> DataQueryable {
        DataQueryable::new(self.clone())
    }

    pub fn where_(&self, field: &str) -> DataQueryable {
        self.queryable().where_(field)
    }

    pub fn select(&self, fields: &[&str]) -> DataQueryable {
        self.queryable().select(fields)
    }

    /// Queryable configured from the query parameter surface
    pub fn filter(&self, params: &QueryParams) -> DataQueryable {
        self.queryable().with_params(params)
    }

    /// Load a stored object by primary key
    pub async fn find_by_key(&self, key: &Value) -> Result<Option<DataObject>, DataError> {
        let key_name = self.key_name()?;
        self.where_(&key_name).equal(key.clone()).first().await
    }

    /// Ask the permission evaluator whether an operation would be allowed
    pub async fn is_permitted(
        &self,
        state: DataObjectState,
        target: Option<&DataObject>,
    ) -> Result<bool, DataError> {
        if self.context.is_unattended() {
            return Ok(true);
        }
        let Some(evaluator) = self.context.permissions() else {
            return Ok(true);
        };
        let request = PermissionRequest {
            model: self.name(),
            state,
            user: self.context.user(),
            target,
        };
        Ok(evaluator.evaluate(&request).await? == PermissionDecision::Allow)
    }

    /// Related-object strategy of `field` for a stored object
    pub async fn association(
        &self,
        target: &DataObject,
        field: &str,
    ) -> Result<DataAssociation, DataError> {
        DataAssociation::for_field(self, target, field).await
    }
}
