//! Post-fetch expansion
//!
//! Attaches related objects to a result set. Each expanded field costs one
//! batch query per related model: the distinct keys of the result set are
//! collected and loaded with a single `in` predicate, then matched back onto
//! the rows. Nested `$expand` options run inside the batch query itself.

use crate::association::junction::{ensure_junction_model, reference_key};
use crate::db::evaluator::values_equal;
use crate::models::{AssociationMapping, AssociationRole};
use crate::query::{ExpandOption, QueryParams};
use crate::services::{DataError, DataModel};
use crate::DataObject;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

/// Resolved expansion target
struct Expansion {
    property: String,
    many: bool,
    mapping: AssociationMapping,
    role: AssociationRole,
}

fn resolve(model: &DataModel, option: &ExpandOption) -> Result<Expansion, DataError> {
    let attribute = model.attribute(&option.name)?.ok_or_else(|| {
        DataError::query(format!(
            "Cannot expand unknown attribute '{}' of {}",
            option.name,
            model.name()
        ))
    })?;
    let (mapping, role) = model.mapping_role(&attribute.name)?.ok_or_else(|| {
        DataError::query(format!(
            "Cannot expand {}.{}: not an association",
            model.name(),
            attribute.name
        ))
    })?;
    Ok(Expansion {
        property: attribute.property_name().to_string(),
        many: attribute.many,
        mapping,
        role,
    })
}

/// Attribute of the result rows an expansion matches on
///
/// The flag is set when the expansion overwrites that attribute with the
/// related object, so the attribute must stay in the returned rows.
pub(crate) fn local_key(
    model: &DataModel,
    option: &ExpandOption,
) -> Result<(String, bool), DataError> {
    let expansion = resolve(model, option)?;
    let replaced = expansion.role == AssociationRole::HasOne;
    let key = match (&expansion.role, &expansion.mapping) {
        (AssociationRole::HasOne, _) => expansion.property,
        (_, AssociationMapping::Association(fk)) => fk.parent_field.clone(),
        (AssociationRole::ParentJunction, AssociationMapping::Junction(j)) => {
            j.child_field.clone()
        }
        (_, AssociationMapping::Junction(j)) => j.parent_field.clone(),
    };
    Ok((key, replaced))
}

/// Expand every option onto `rows`, one option after the other
pub(crate) fn expand_rows<'a>(
    model: &'a DataModel,
    rows: &'a mut [DataObject],
    options: &'a [ExpandOption],
) -> BoxFuture<'a, Result<(), DataError>> {
    async move {
        if rows.is_empty() {
            return Ok(());
        }
        for option in options {
            expand_one(model, rows, option).await?;
        }
        Ok(())
    }
    .boxed()
}

fn distinct(values: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::new();
    for value in values {
        if !keys.iter().any(|k| values_equal(k, &value)) {
            keys.push(value);
        }
    }
    keys
}

fn row_key(row: &DataObject, field: &str, key_name: &str) -> Option<Value> {
    row.get(field).and_then(|v| reference_key(v, key_name))
}

/// Load the rows of `model` whose `key_field` is one of `keys`
///
/// Returns each row paired with its key; the key attribute is removed from
/// the row when the caller's `$select` did not ask for it.
async fn fetch(
    model: &DataModel,
    params: &QueryParams,
    key_field: &str,
    key_name: &str,
    keys: Vec<Value>,
) -> Result<Vec<(Value, DataObject)>, DataError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let (query, added) = model.filter(params).include_field(key_field);
    let rows = query.and(key_field).in_(keys).get_items().await?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| {
            let key = row_key(&row, key_field, key_name)?;
            if added {
                row.remove(key_field);
            }
            Some((key, row))
        })
        .collect())
}

/// Link rows of a junction as `(own key, other value)` pairs
async fn fetch_links(
    junction: &DataModel,
    own_column: &str,
    other_column: &str,
    keys: Vec<Value>,
) -> Result<Vec<(Value, Value)>, DataError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let links = junction
        .where_(own_column)
        .in_(keys)
        .order_by("id")
        .get_items()
        .await?;
    Ok(links
        .into_iter()
        .filter_map(|mut link| {
            let own = link.remove(own_column)?;
            let other = link.remove(other_column)?;
            Some((own, other))
        })
        .collect())
}

async fn expand_one(
    model: &DataModel,
    rows: &mut [DataObject],
    option: &ExpandOption,
) -> Result<(), DataError> {
    let expansion = resolve(model, option)?;
    let property = expansion.property.as_str();
    debug!("Expanding {}.{} ({:?})", model.name(), property, expansion.role);

    match (expansion.role, &expansion.mapping) {
        (AssociationRole::HasOne, AssociationMapping::Association(fk)) => {
            let keys = distinct(rows.iter().filter_map(|r| row_key(r, property, &fk.parent_field)));
            let parent = model.related(&fk.parent_model)?;
            let related = fetch(&parent, &option.params, &fk.parent_field, &fk.parent_field, keys)
                .await?;
            for row in rows.iter_mut() {
                let Some(key) = row_key(row, property, &fk.parent_field) else {
                    continue;
                };
                let found = related
                    .iter()
                    .find(|(k, _)| values_equal(k, &key))
                    .map(|(_, r)| Value::Object(r.clone()))
                    .unwrap_or(Value::Null);
                row.insert(property.to_string(), found);
            }
        }
        (AssociationRole::HasMany, AssociationMapping::Association(fk)) => {
            let keys = distinct(
                rows.iter()
                    .filter_map(|r| row_key(r, &fk.parent_field, &fk.parent_field)),
            );
            let child = model.related(&fk.child_model)?;
            let related =
                fetch(&child, &option.params, &fk.child_field, &fk.parent_field, keys).await?;
            let as_array = expansion.many || !fk.one_to_one;
            for row in rows.iter_mut() {
                let key = row_key(row, &fk.parent_field, &fk.parent_field);
                let children: Vec<Value> = match &key {
                    Some(key) => related
                        .iter()
                        .filter(|(k, _)| values_equal(k, key))
                        .map(|(_, r)| Value::Object(r.clone()))
                        .collect(),
                    None => Vec::new(),
                };
                let value = if as_array {
                    Value::Array(children)
                } else {
                    children.into_iter().next().unwrap_or(Value::Null)
                };
                row.insert(property.to_string(), value);
            }
        }
        (AssociationRole::Junction, AssociationMapping::Junction(j)) => {
            let keys = distinct(
                rows.iter()
                    .filter_map(|r| row_key(r, &j.parent_field, &j.parent_field)),
            );
            let junction = ensure_junction_model(model, j).await?;
            let links = fetch_links(
                &junction,
                &j.association_object_field,
                &j.association_value_field,
                keys,
            )
            .await?;

            let children = if j.inline_values {
                Vec::new()
            } else {
                let child = model.related(&j.child_model)?;
                let child_keys = distinct(links.iter().map(|(_, v)| v.clone()));
                fetch(&child, &option.params, &j.child_field, &j.child_field, child_keys).await?
            };

            for row in rows.iter_mut() {
                let key = row_key(row, &j.parent_field, &j.parent_field);
                let values: Vec<Value> = links
                    .iter()
                    .filter(|(own, _)| key.as_ref().map_or(false, |k| values_equal(own, k)))
                    .filter_map(|(_, other)| {
                        if j.inline_values {
                            Some(other.clone())
                        } else {
                            children
                                .iter()
                                .find(|(k, _)| values_equal(k, other))
                                .map(|(_, c)| Value::Object(c.clone()))
                        }
                    })
                    .collect();
                row.insert(property.to_string(), Value::Array(values));
            }
        }
        (AssociationRole::ParentJunction, AssociationMapping::Junction(j)) => {
            let keys = distinct(
                rows.iter()
                    .filter_map(|r| row_key(r, &j.child_field, &j.child_field)),
            );
            let junction = ensure_junction_model(model, j).await?;
            let links = fetch_links(
                &junction,
                &j.association_value_field,
                &j.association_object_field,
                keys,
            )
            .await?;
            let parent = model.related(&j.parent_model)?;
            let parent_keys = distinct(links.iter().map(|(_, v)| v.clone()));
            let parents =
                fetch(&parent, &option.params, &j.parent_field, &j.parent_field, parent_keys)
                    .await?;

            for row in rows.iter_mut() {
                let key = row_key(row, &j.child_field, &j.child_field);
                let values: Vec<Value> = links
                    .iter()
                    .filter(|(own, _)| key.as_ref().map_or(false, |k| values_equal(own, k)))
                    .filter_map(|(_, other)| {
                        parents
                            .iter()
                            .find(|(k, _)| values_equal(k, other))
                            .map(|(_, p)| Value::Object(p.clone()))
                    })
                    .collect();
                row.insert(property.to_string(), Value::Array(values));
            }
        }
        (role, _) => {
            return Err(DataError::query(format!(
                "Cannot expand {}.{} with role {:?}",
                model.name(),
                property,
                role
            )))
        }
    }
    Ok(())
}
