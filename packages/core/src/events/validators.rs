//! Validation Listeners
//!
//! - `StateValidator` checks that the requested state is possible (abstract
//!   models cannot be inserted, updated/removed objects must exist) and loads
//!   the stored version into `args.previous`
//! - `NotNullValidator` and `UniqueConstraintValidator` are one-shot
//!   before.save listeners appended after every other listener, so values
//!   supplied by default/calculated listeners are already in place

use crate::events::{DataEventArgs, DataEventListener};
use crate::models::{field_types, AssociationRole, DataObjectState};
use crate::services::DataError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Checks state preconditions and loads the previous object
pub struct StateValidator;

impl StateValidator {
    async fn load_previous(args: &mut DataEventArgs) -> Result<(), DataError> {
        let model = &args.model;
        let key_name = model.key_name()?;
        let key = args
            .target
            .get(&key_name)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| DataError::object_not_found(model.name(), "<missing key>"))?;

        let previous = model
            .elevated()
            .find_by_key(&key)
            .await?
            .ok_or_else(|| DataError::object_not_found(model.name(), key.to_string()))?;
        args.previous = Some(previous);
        Ok(())
    }
}

#[async_trait]
impl DataEventListener for StateValidator {
    fn name(&self) -> &str {
        "StateValidator"
    }

    async fn before_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        match args.state {
            DataObjectState::Insert => {
                if args.model.definition().is_abstract && !args.inherited {
                    return Err(DataError::validation(
                        args.model.name(),
                        "Abstract models cannot be inserted",
                    ));
                }
                Ok(())
            }
            DataObjectState::Update => Self::load_previous(args).await,
            other => Err(DataError::validation(
                args.model.name(),
                format!("Invalid state for save: {}", other),
            )),
        }
    }

    async fn before_remove(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        Self::load_previous(args).await
    }
}

/// Rejects missing or null values of non-nullable attributes
pub struct NotNullValidator;

#[async_trait]
impl DataEventListener for NotNullValidator {
    fn name(&self) -> &str {
        "NotNullValidator"
    }

    async fn before_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let model = &args.model;
        for attribute in model.attributes()?.iter() {
            if attribute.nullable || attribute.many {
                continue;
            }
            if attribute.primary && field_types::is_auto_increment(&attribute.field_type) {
                continue;
            }
            if !attribute.is_primitive() {
                let role = model.mapping_role(&attribute.name)?.map(|(_, role)| role);
                if matches!(role, Some(r) if r != AssociationRole::HasOne) {
                    continue;
                }
            }

            let value = args.target.get(attribute.property_name());
            let violated = match args.state {
                DataObjectState::Insert => value.map_or(true, Value::is_null),
                _ => value.map_or(false, Value::is_null),
            };
            if violated {
                debug!("{}.{} violates not-null", model.name(), attribute.name);
                return Err(DataError::not_null(model.name(), &attribute.name));
            }
        }
        Ok(())
    }
}

/// Rejects objects whose unique attributes collide with another stored object
pub struct UniqueConstraintValidator;

#[async_trait]
impl DataEventListener for UniqueConstraintValidator {
    fn name(&self) -> &str {
        "UniqueConstraintValidator"
    }

    async fn before_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let model = args.model.elevated();
        let key_name = model.key_name()?;
        let key = args.target.get(&key_name).filter(|v| !v.is_null()).cloned();

        'constraints: for constraint in model.unique_constraints()? {
            let mut query = model.queryable();
            for field in &constraint.fields {
                let property = match model.attribute(field)? {
                    Some(attribute) => attribute.property_name().to_string(),
                    None => field.clone(),
                };
                let value = args
                    .target
                    .get(&property)
                    .or_else(|| args.previous.as_ref().and_then(|p| p.get(&property)));
                match value {
                    Some(v) if !v.is_null() && !v.is_object() && !v.is_array() => {
                        query = query.and(field).equal(v.clone());
                    }
                    _ => continue 'constraints,
                }
            }
            if args.state == DataObjectState::Update {
                if let Some(key) = &key {
                    query = query.and(&key_name).not_equal(key.clone());
                }
            }

            if query.count().await? > 0 {
                return Err(DataError::unique_constraint(
                    model.name(),
                    constraint.fields.clone(),
                    constraint.description.clone(),
                ));
            }
        }
        Ok(())
    }
}
