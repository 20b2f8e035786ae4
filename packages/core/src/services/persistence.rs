//! Save / Remove State Machine
//!
//! Persistence operations of `DataModel`. Every public operation runs inside a
//! transaction of the context adapter (nested operations join the open one)
//! and processes its objects strictly in series.
//!
//! # Save
//!
//! 1. Infer the state: an explicit `$state` wins; otherwise an existing
//!    primary key or a match on a unique constraint means update
//! 2. Emit `before.save` (state check, defaults, calculated values,
//!    permissions, then the one-shot not-null and unique validators)
//! 3. Save the base model part first and copy its key back
//! 4. Insert or update the model's own columns, resolving object-valued
//!    many-to-one references to keys
//! 5. Emit `after.save`, which writes nested collections back
//!
//! # Remove
//!
//! The object's own row is deleted before its base row, after cascading to
//! the associations it is the parent of.

use crate::association::{reference_key, AssociationWriteBack, CascadeListener};
use crate::db::{execute_in_transaction, Statement};
use crate::events::{
    DataEventArgs, DataEventKind, NotNullValidator, UniqueConstraintValidator, ONCE_PRIORITY,
};
use crate::models::{
    field_types, AssociationMapping, AssociationRole, DataObjectState, FieldDefinition,
    STATE_ATTRIBUTE,
};
use crate::query::{Predicate, QueryField};
use crate::services::{DataError, DataModel};
use crate::DataObject;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Scalar value usable in an equality lookup
fn is_lookup_value(value: &Value) -> bool {
    !(value.is_null() || value.is_object() || value.is_array())
}

impl DataModel {
    //
    // SAVE
    //

    /// Insert or update one object
    ///
    /// On success `target` holds the stored attribute values, including a
    /// generated primary key and saved nested objects, without `$state`.
    pub async fn save(&self, target: &mut DataObject) -> Result<(), DataError> {
        self.migrate().await?;
        execute_in_transaction(self.context().adapter(), move || {
            self.save_object(target, None, false)
        })
        .await
    }

    /// Save several objects in one transaction
    ///
    /// The first failure rolls back every object of the batch.
    pub async fn save_many(&self, targets: &mut [DataObject]) -> Result<(), DataError> {
        self.migrate().await?;
        execute_in_transaction(self.context().adapter(), move || {
            async move {
                for target in targets.iter_mut() {
                    self.save_object(target, None, false).await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await
    }

    /// Save with the state forced to insert
    pub async fn insert(&self, target: &mut DataObject) -> Result<(), DataError> {
        self.migrate().await?;
        execute_in_transaction(self.context().adapter(), move || {
            self.save_object(target, Some(DataObjectState::Insert), false)
        })
        .await
    }

    /// Save with the state forced to update
    pub async fn update(&self, target: &mut DataObject) -> Result<(), DataError> {
        self.migrate().await?;
        execute_in_transaction(self.context().adapter(), move || {
            self.save_object(target, Some(DataObjectState::Update), false)
        })
        .await
    }

    /// Explicit `$state`, else update when the object is already stored
    async fn infer_state(&self, target: &mut DataObject) -> Result<DataObjectState, DataError> {
        if let Some(value) = target.get(STATE_ATTRIBUTE) {
            return DataObjectState::from_value(value).ok_or_else(|| {
                DataError::validation(self.name(), format!("Invalid object state: {}", value))
            });
        }

        let Some(pk) = self.primary_key()? else {
            return Ok(DataObjectState::Insert);
        };
        let lookup = self.elevated();

        if let Some(key) = target.get(pk.property_name()).filter(|v| !v.is_null()) {
            return Ok(if lookup.find_by_key(key).await?.is_some() {
                DataObjectState::Update
            } else {
                DataObjectState::Insert
            });
        }

        if let Some(stored) = self.find_by_unique_constraint(target).await? {
            if let Some(key) = stored.get(&pk.name) {
                target.insert(pk.property_name().to_string(), key.clone());
            }
            return Ok(DataObjectState::Update);
        }
        Ok(DataObjectState::Insert)
    }

    /// Stored object sharing the values of any unique constraint with `target`
    async fn find_by_unique_constraint(
        &self,
        target: &DataObject,
    ) -> Result<Option<DataObject>, DataError> {
        let lookup = self.elevated();
        for constraint in self.unique_constraints()? {
            let mut query = lookup.queryable();
            let mut complete = !constraint.fields.is_empty();
            for field in &constraint.fields {
                let property = match self.attribute(field)? {
                    Some(attribute) => attribute.property_name().to_string(),
                    None => field.clone(),
                };
                match target.get(&property).filter(|v| is_lookup_value(v)) {
                    Some(value) => query = query.and(field).equal(value.clone()),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            if let Some(stored) = query.first().await? {
                debug!(
                    "{} matched on unique constraint ({})",
                    self.name(),
                    constraint.fields.join(", ")
                );
                return Ok(Some(stored));
            }
        }
        Ok(None)
    }

    fn save_object<'a>(
        &'a self,
        target: &'a mut DataObject,
        forced: Option<DataObjectState>,
        inherited: bool,
    ) -> BoxFuture<'a, Result<(), DataError>> {
        async move {
            let state = match forced {
                Some(state) => state,
                None => self.infer_state(target).await?,
            };
            target.shift_remove(STATE_ATTRIBUTE);
            debug!("Saving {} ({})", self.name(), state);

            let mut args = DataEventArgs::for_save(self.clone(), state, target.clone());
            args.inherited = inherited;
            let before = self.events().channel(DataEventKind::BeforeSave);
            before.once(Arc::new(NotNullValidator), ONCE_PRIORITY);
            before.once(Arc::new(UniqueConstraintValidator), ONCE_PRIORITY);
            self.events()
                .emit(DataEventKind::BeforeSave, &mut args)
                .await?;

            let pk = self.primary_key()?.ok_or_else(|| {
                DataError::configuration(format!("Model {} has no primary key", self.name()))
            })?;

            if let Some(base) = self.base()? {
                self.save_base(&base, state, &mut args.target).await?;
            }

            let values = self.column_values(&args.target).await?;
            match state {
                DataObjectState::Insert => {
                    let key = self.insert_row(&pk, values).await?;
                    if let Some(key) = key {
                        args.target.insert(pk.property_name().to_string(), key);
                    }
                }
                _ => self.update_row(&pk, values).await?,
            }

            self.events()
                .channel(DataEventKind::AfterSave)
                .once(Arc::new(AssociationWriteBack), ONCE_PRIORITY);
            self.events()
                .emit(DataEventKind::AfterSave, &mut args)
                .await?;

            args.target.shift_remove(STATE_ATTRIBUTE);
            *target = args.target;
            Ok(())
        }
        .boxed()
    }

    /// Save the inherited part of `target` through the base model
    async fn save_base(
        &self,
        base: &DataModel,
        state: DataObjectState,
        target: &mut DataObject,
    ) -> Result<(), DataError> {
        let mut part = DataObject::new();
        for attribute in base.attributes()?.iter() {
            let property = attribute.property_name();
            if let Some(value) = target.get(property) {
                part.insert(property.to_string(), value.clone());
            }
        }
        base.save_object(&mut part, Some(state), true).await?;
        for (name, value) in part {
            target.insert(name, value);
        }
        Ok(())
    }

    /// Column values of the model's own table
    async fn column_values(&self, target: &DataObject) -> Result<DataObject, DataError> {
        let mut values = DataObject::new();
        for attribute in self.storage_attributes()? {
            let Some(value) = target.get(attribute.property_name()) else {
                continue;
            };
            let value = if attribute.is_primitive() {
                value.clone()
            } else {
                self.reference_value(&attribute, value).await?
            };
            values.insert(attribute.name.clone(), value);
        }
        Ok(values)
    }

    /// Key stored in a many-to-one column for an object or key value
    async fn reference_value(
        &self,
        attribute: &FieldDefinition,
        value: &Value,
    ) -> Result<Value, DataError> {
        if !value.is_object() {
            return Ok(value.clone());
        }
        let Some((AssociationMapping::Association(fk), AssociationRole::HasOne)) =
            self.mapping_role(&attribute.name)?
        else {
            return Ok(value.clone());
        };
        if let Some(key) = reference_key(value, &fk.parent_field) {
            return Ok(key);
        }

        let parent = self.related(&fk.parent_model)?.elevated();
        let mut query = parent.queryable();
        let mut conditions = 0;
        if let Value::Object(object) = value {
            for (name, value) in object {
                if !is_lookup_value(value) {
                    continue;
                }
                if let Some(field) = parent.attribute(name)?.filter(|a| a.is_primitive()) {
                    query = query.and(&field.name).equal(value.clone());
                    conditions += 1;
                }
            }
        }
        if conditions == 0 {
            return Err(DataError::association_missing(
                &fk.parent_model,
                &attribute.name,
            ));
        }

        let matches = query.select(&[fk.parent_field.as_str()]).take(2).get_items().await?;
        match matches.as_slice() {
            [single] => Ok(single.get(&fk.parent_field).cloned().unwrap_or(Value::Null)),
            [] => Err(DataError::association_missing(
                &fk.parent_model,
                &attribute.name,
            )),
            more => Err(DataError::association_ambiguous(
                &fk.parent_model,
                &attribute.name,
                more.len(),
            )),
        }
    }

    /// Insert the own row, returning a generated key
    async fn insert_row(
        &self,
        pk: &FieldDefinition,
        mut values: DataObject,
    ) -> Result<Option<Value>, DataError> {
        let adapter = self.context().adapter();
        let generated = pk.field_type == field_types::COUNTER
            && self.definition().inherits.is_none()
            && values.get(&pk.name).map_or(true, Value::is_null);

        let mut key = None;
        if generated {
            values.shift_remove(&pk.name);
            if let Some(identity) = adapter.select_identity(self.source_name(), &pk.name).await? {
                values.insert(pk.name.clone(), identity.clone());
                key = Some(identity);
            }
        }

        let statement = Statement::Insert {
            entity: self.source_name().to_string(),
            values,
        };
        debug!("{}: {}", self.name(), statement);
        adapter.execute(&statement).await?;

        if generated && key.is_none() {
            key = adapter.last_identity().await?;
        }
        Ok(key)
    }

    /// Update the own row; a key-only object changes nothing
    async fn update_row(
        &self,
        pk: &FieldDefinition,
        mut values: DataObject,
    ) -> Result<(), DataError> {
        let key = values
            .shift_remove(&pk.name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| DataError::object_not_found(self.name(), "null"))?;
        if values.is_empty() {
            debug!("{}: nothing to update for {}", self.name(), key);
            return Ok(());
        }
        let statement = Statement::Update {
            entity: self.source_name().to_string(),
            values,
            filter: Predicate::equal(QueryField::new(&pk.name), key),
        };
        debug!("{}: {}", self.name(), statement);
        self.context().adapter().execute(&statement).await?;
        Ok(())
    }

    //
    // REMOVE
    //

    /// Remove one object identified by its key or a unique constraint
    pub async fn remove(&self, target: &mut DataObject) -> Result<(), DataError> {
        self.migrate().await?;
        execute_in_transaction(self.context().adapter(), move || self.remove_object(target))
            .await
    }

    /// Remove several objects in one transaction
    pub async fn remove_many(&self, targets: &mut [DataObject]) -> Result<(), DataError> {
        self.migrate().await?;
        execute_in_transaction(self.context().adapter(), move || {
            async move {
                for target in targets.iter_mut() {
                    self.remove_object(target).await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await
    }

    fn remove_object<'a>(
        &'a self,
        target: &'a mut DataObject,
    ) -> BoxFuture<'a, Result<(), DataError>> {
        async move {
            target.shift_remove(STATE_ATTRIBUTE);
            let pk = self.primary_key()?.ok_or_else(|| {
                DataError::configuration(format!("Model {} has no primary key", self.name()))
            })?;

            let key = match target.get(pk.property_name()).filter(|v| !v.is_null()) {
                Some(key) => key.clone(),
                None => self
                    .find_by_unique_constraint(target)
                    .await?
                    .and_then(|stored| stored.get(&pk.name).cloned())
                    .ok_or_else(|| {
                        DataError::object_not_found(
                            self.name(),
                            Value::Object(target.clone()).to_string(),
                        )
                    })?,
            };
            target.insert(pk.property_name().to_string(), key.clone());
            debug!("Removing {} {}", self.name(), key);

            let mut args = DataEventArgs::for_remove(self.clone(), target.clone());
            self.events()
                .channel(DataEventKind::BeforeRemove)
                .once(Arc::new(CascadeListener), ONCE_PRIORITY);
            self.events()
                .emit(DataEventKind::BeforeRemove, &mut args)
                .await?;

            let statement = Statement::Delete {
                entity: self.source_name().to_string(),
                filter: Predicate::equal(QueryField::new(&pk.name), key.clone()),
            };
            debug!("{}: {}", self.name(), statement);
            self.context().adapter().execute(&statement).await?;

            if let Some(base) = self.base()? {
                let mut part = DataObject::new();
                part.insert(pk.property_name().to_string(), key.clone());
                base.remove_object(&mut part).await?;
            }

            self.events()
                .emit(DataEventKind::AfterRemove, &mut args)
                .await?;
            info!("Removed {} {}", self.name(), key);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_values() {
        assert!(is_lookup_value(&Value::from("jane@example.com")));
        assert!(is_lookup_value(&Value::from(3)));
        assert!(!is_lookup_value(&Value::Null));
        assert!(!is_lookup_value(&serde_json::json!({"id": 1})));
        assert!(!is_lookup_value(&serde_json::json!([1, 2])));
    }
}
