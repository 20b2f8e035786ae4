//! Nested-object write-back
//!
//! One-shot after.save listener. Child collections submitted with a saved
//! object are persisted once the object itself has a key:
//!
//! - one-to-many arrays: every child is saved with its foreign key set
//! - junction arrays: links are inserted for every item
//! - `{ "items": [...], "deleted": [...] }`: `items` are linked first, then
//!   the `deleted` links are removed

use crate::association::strategies::{DataObjectJunction, HasParentJunction};
use crate::events::{DataEventArgs, DataEventListener};
use crate::models::{AssociationMapping, AssociationRole};
use crate::services::DataError;
use async_trait::async_trait;
use serde_json::Value;

pub struct AssociationWriteBack;

/// Split a submitted collection into items to link and items to unlink
fn collection_parts(value: &Value) -> (Vec<Value>, Vec<Value>) {
    match value {
        Value::Array(items) => (items.clone(), Vec::new()),
        Value::Object(object) if object.contains_key("items") || object.contains_key("deleted") => {
            let list = |name: &str| match object.get(name) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            (list("items"), list("deleted"))
        }
        Value::Null => (Vec::new(), Vec::new()),
        single => (vec![single.clone()], Vec::new()),
    }
}

#[async_trait]
impl DataEventListener for AssociationWriteBack {
    fn name(&self) -> &str {
        "AssociationWriteBack"
    }

    async fn after_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let model = args.model.clone();

        // Inherited collections are written back by the base model's own save
        for attribute in &model.definition().fields {
            if attribute.is_primitive() && !attribute.many {
                continue;
            }
            let property = attribute.property_name().to_string();
            let Some(value) = args.target.get(&property).cloned() else {
                continue;
            };
            let Some((mapping, role)) = model.mapping_role(&attribute.name)? else {
                continue;
            };

            match (role, mapping) {
                (AssociationRole::HasMany, AssociationMapping::Association(fk)) => {
                    let key = args.target.get(&fk.parent_field).cloned().unwrap_or(Value::Null);
                    let child = model.related(&fk.child_model)?;
                    let (items, _) = collection_parts(&value);
                    let mut saved = Vec::with_capacity(items.len());
                    for item in items {
                        let Value::Object(mut object) = item else {
                            saved.push(item);
                            continue;
                        };
                        object.insert(fk.child_field.clone(), key.clone());
                        child.save(&mut object).await?;
                        saved.push(Value::Object(object));
                    }
                    if value.is_array() {
                        args.target.insert(property, Value::Array(saved));
                    } else if let Some(single) = saved.into_iter().next() {
                        args.target.insert(property, single);
                    }
                }
                (AssociationRole::Junction, AssociationMapping::Junction(j)) => {
                    let key = args.target.get(&j.parent_field).cloned().unwrap_or(Value::Null);
                    let links = DataObjectJunction::new(&model, j, key).await?;
                    let (items, deleted) = collection_parts(&value);
                    for item in &items {
                        links.insert(item).await?;
                    }
                    for item in &deleted {
                        links.remove(item).await?;
                    }
                }
                (AssociationRole::ParentJunction, AssociationMapping::Junction(j)) => {
                    let key = args.target.get(&j.child_field).cloned().unwrap_or(Value::Null);
                    let links = HasParentJunction::new(&model, j, key).await?;
                    let (items, deleted) = collection_parts(&value);
                    for item in &items {
                        links.insert(item).await?;
                    }
                    for item in &deleted {
                        links.remove(item).await?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
