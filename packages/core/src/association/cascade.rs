//! Cascade on remove
//!
//! One-shot before.remove listener applying the cascade policy of every
//! association a removed object is the parent of. Runs after the state
//! validator, so `args.previous` holds the stored object.

use crate::association::strategies::{DataObjectJunction, HasParentJunction};
use crate::events::{DataEventArgs, DataEventListener};
use crate::models::{AssociationMapping, AssociationRole, CascadePolicy, STATE_ATTRIBUTE};
use crate::services::DataError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub struct CascadeListener;

#[async_trait]
impl DataEventListener for CascadeListener {
    fn name(&self) -> &str {
        "CascadeListener"
    }

    async fn before_remove(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let model = args.model.elevated();
        let stored = args.previous.clone().unwrap_or_else(|| args.target.clone());
        let key_of = |name: &str| stored.get(name).cloned().unwrap_or(Value::Null);

        for attribute in &model.definition().fields {
            if attribute.is_primitive() && !attribute.many {
                continue;
            }
            let Some((mapping, role)) = model.mapping_role(&attribute.name)? else {
                continue;
            };
            if mapping.cascade() == CascadePolicy::None {
                continue;
            }
            debug!(
                "Cascading {:?} from {}.{}",
                mapping.cascade(),
                model.name(),
                attribute.name
            );

            match (role, mapping) {
                (AssociationRole::HasMany, AssociationMapping::Association(fk)) => {
                    let key = key_of(&fk.parent_field);
                    if key.is_null() {
                        continue;
                    }
                    let child = model.related(&fk.child_model)?;
                    let child_key = child.key_name()?;
                    let children = child
                        .where_(&fk.child_field)
                        .equal(key)
                        .select(&[child_key.as_str()])
                        .get_items()
                        .await?;
                    for mut row in children {
                        if fk.cascade == CascadePolicy::Delete {
                            child.remove(&mut row).await?;
                        } else {
                            row.insert(fk.child_field.clone(), Value::Null);
                            row.insert(STATE_ATTRIBUTE.to_string(), json!(2));
                            child.save(&mut row).await?;
                        }
                    }
                }
                (AssociationRole::Junction, AssociationMapping::Junction(j)) => {
                    if j.cascade == CascadePolicy::Delete {
                        let key = key_of(&j.parent_field);
                        DataObjectJunction::new(&model, j, key)
                            .await?
                            .remove_all()
                            .await?;
                    }
                }
                (AssociationRole::ParentJunction, AssociationMapping::Junction(j)) => {
                    if j.cascade == CascadePolicy::Delete {
                        let key = key_of(&j.child_field);
                        HasParentJunction::new(&model, j, key)
                            .await?
                            .remove_all()
                            .await?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
