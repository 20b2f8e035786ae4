//! Related-object strategies
//!
//! `DataAssociation` gives access to the objects related to one stored object
//! through one of its fields. Every variant exposes a `queryable()` over the
//! related model; junction variants additionally manage link rows.

use crate::association::junction::{ensure_junction_model, reference_key};
use crate::models::{
    AssociationMapping, AssociationRole, ForeignKeyMapping, JunctionMapping, STATE_ATTRIBUTE,
};
use crate::query::{DataQueryable, JoinDescriptor, JoinKind, Predicate, QueryField};
use crate::services::{DataError, DataModel};
use crate::DataObject;
use serde_json::{json, Value};
use tracing::debug;

/// The related parent of a many-to-one field
#[derive(Debug, Clone)]
pub struct HasOneAssociation {
    pub parent: DataModel,
    pub mapping: ForeignKeyMapping,
    /// Foreign-key value held by the child object
    pub key: Value,
}

impl HasOneAssociation {
    pub fn queryable(&self) -> DataQueryable {
        self.parent
            .where_(&self.mapping.parent_field)
            .equal(self.key.clone())
    }

    pub async fn get(&self) -> Result<Option<DataObject>, DataError> {
        if self.key.is_null() {
            return Ok(None);
        }
        self.queryable().first().await
    }
}

/// The children of a one-to-many (or reverse one-to-one) field
#[derive(Debug, Clone)]
pub struct HasManyAssociation {
    pub child: DataModel,
    pub mapping: ForeignKeyMapping,
    /// Key of the parent object
    pub key: Value,
}

impl HasManyAssociation {
    pub fn queryable(&self) -> DataQueryable {
        self.child
            .where_(&self.mapping.child_field)
            .equal(self.key.clone())
    }
}

/// Junction link rows seen from one side of the junction
#[derive(Debug, Clone)]
struct JunctionLinks {
    junction: DataModel,
    /// Column holding the key of the object this side belongs to
    own_column: String,
    /// Column holding the key (or inline value) of the other side
    other_column: String,
    key: Value,
}

impl JunctionLinks {
    async fn new(
        owner: &DataModel,
        mapping: &JunctionMapping,
        key: Value,
        parent_side: bool,
    ) -> Result<Self, DataError> {
        let junction = ensure_junction_model(owner, mapping).await?;
        let (own_column, other_column) = if parent_side {
            (
                mapping.association_object_field.clone(),
                mapping.association_value_field.clone(),
            )
        } else {
            (
                mapping.association_value_field.clone(),
                mapping.association_object_field.clone(),
            )
        };
        Ok(Self {
            junction,
            own_column,
            other_column,
            key,
        })
    }

    fn queryable(&self) -> DataQueryable {
        self.junction
            .where_(&self.own_column)
            .equal(self.key.clone())
    }

    async fn values(&self) -> Result<Vec<Value>, DataError> {
        Ok(self
            .queryable()
            .get_items()
            .await?
            .into_iter()
            .filter_map(|mut row| row.remove(&self.other_column))
            .collect())
    }

    async fn count(&self) -> Result<u64, DataError> {
        self.queryable().count().await
    }

    async fn insert(&self, other: Value) -> Result<bool, DataError> {
        let exists = self
            .queryable()
            .and(&self.other_column)
            .equal(other.clone())
            .count()
            .await?
            > 0;
        if exists {
            return Ok(false);
        }

        let mut link = DataObject::new();
        link.insert(self.own_column.clone(), self.key.clone());
        link.insert(self.other_column.clone(), other);
        link.insert(STATE_ATTRIBUTE.to_string(), json!(1));
        self.junction.save(&mut link).await?;
        Ok(true)
    }

    async fn remove(&self, other: Option<Value>) -> Result<usize, DataError> {
        let mut query = self.queryable();
        if let Some(other) = other {
            query = query.and(&self.other_column).equal(other);
        }
        let mut links = query.get_items().await?;
        let removed = links.len();
        for link in links.iter_mut() {
            self.junction.remove(link).await?;
        }
        debug!(
            "Removed {} link(s) of {} from {}",
            removed,
            self.key,
            self.junction.name()
        );
        Ok(removed)
    }
}

/// Many-to-many children seen from the junction's parent
#[derive(Debug, Clone)]
pub struct DataObjectJunction {
    pub owner: DataModel,
    pub mapping: JunctionMapping,
    links: JunctionLinks,
}

impl DataObjectJunction {
    pub async fn new(
        owner: &DataModel,
        mapping: JunctionMapping,
        key: Value,
    ) -> Result<Self, DataError> {
        let links = JunctionLinks::new(owner, &mapping, key, true).await?;
        Ok(Self {
            owner: owner.clone(),
            mapping,
            links,
        })
    }

    pub fn junction(&self) -> &DataModel {
        &self.links.junction
    }

    /// Children linked to the parent; the link rows themselves for tag junctions
    pub fn queryable(&self) -> Result<DataQueryable, DataError> {
        if self.mapping.inline_values {
            return Ok(self.links.queryable());
        }
        let child = self.owner.related(&self.mapping.child_model)?;
        Ok(linked(
            child,
            &self.mapping.child_field,
            &self.mapping.association_adapter,
            &self.mapping.association_value_field,
            &self.mapping.association_object_field,
            self.links.key.clone(),
        ))
    }

    /// Link values: inline values or child keys
    pub async fn values(&self) -> Result<Vec<Value>, DataError> {
        self.links.values().await
    }

    pub async fn count(&self) -> Result<u64, DataError> {
        self.links.count().await
    }

    /// Link a child; object children without key are saved first
    pub async fn insert(&self, item: &Value) -> Result<bool, DataError> {
        let value = self.child_value(item).await?;
        self.links.insert(value).await
    }

    pub async fn remove(&self, item: &Value) -> Result<usize, DataError> {
        let value = self.child_value(item).await?;
        self.links.remove(Some(value)).await
    }

    pub async fn remove_all(&self) -> Result<usize, DataError> {
        self.links.remove(None).await
    }

    async fn child_value(&self, item: &Value) -> Result<Value, DataError> {
        if self.mapping.inline_values {
            return Ok(item.clone());
        }
        if let Some(key) = reference_key(item, &self.mapping.child_field) {
            return Ok(key);
        }
        let Value::Object(object) = item else {
            return Err(DataError::association_missing(
                &self.mapping.parent_model,
                self.mapping.refers_to.as_deref().unwrap_or(&self.mapping.child_model),
            ));
        };
        let child = self.owner.related(&self.mapping.child_model)?;
        let mut object = object.clone();
        child.save(&mut object).await?;
        object
            .get(&self.mapping.child_field)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                DataError::association_missing(&self.mapping.child_model, &self.mapping.child_field)
            })
    }
}

/// Many-to-many parents seen from the junction's child
#[derive(Debug, Clone)]
pub struct HasParentJunction {
    pub owner: DataModel,
    pub mapping: JunctionMapping,
    links: JunctionLinks,
}

impl HasParentJunction {
    pub async fn new(
        owner: &DataModel,
        mapping: JunctionMapping,
        key: Value,
    ) -> Result<Self, DataError> {
        let links = JunctionLinks::new(owner, &mapping, key, false).await?;
        Ok(Self {
            owner: owner.clone(),
            mapping,
            links,
        })
    }

    pub fn junction(&self) -> &DataModel {
        &self.links.junction
    }

    /// Parents linked to the child
    pub fn queryable(&self) -> Result<DataQueryable, DataError> {
        let parent = self.owner.related(&self.mapping.parent_model)?;
        Ok(linked(
            parent,
            &self.mapping.parent_field,
            &self.mapping.association_adapter,
            &self.mapping.association_object_field,
            &self.mapping.association_value_field,
            self.links.key.clone(),
        ))
    }

    /// Keys of the linked parents
    pub async fn values(&self) -> Result<Vec<Value>, DataError> {
        self.links.values().await
    }

    pub async fn count(&self) -> Result<u64, DataError> {
        self.links.count().await
    }

    pub async fn insert(&self, parent: &Value) -> Result<bool, DataError> {
        let key = self.parent_key(parent)?;
        self.links.insert(key).await
    }

    pub async fn remove(&self, parent: &Value) -> Result<usize, DataError> {
        let key = self.parent_key(parent)?;
        self.links.remove(Some(key)).await
    }

    pub async fn remove_all(&self) -> Result<usize, DataError> {
        self.links.remove(None).await
    }

    fn parent_key(&self, parent: &Value) -> Result<Value, DataError> {
        reference_key(parent, &self.mapping.parent_field).ok_or_else(|| {
            DataError::association_missing(&self.mapping.parent_model, &self.mapping.parent_field)
        })
    }
}

/// Queryable over `model` restricted to rows linked to `key` through a junction
fn linked(
    model: DataModel,
    model_key: &str,
    junction: &str,
    junction_model_column: &str,
    junction_key_column: &str,
    key: Value,
) -> DataQueryable {
    let view = model.view_name();
    let join = JoinDescriptor {
        entity: junction.to_string(),
        alias: junction.to_string(),
        kind: JoinKind::Inner,
        local: QueryField::qualified(&view, model_key),
        foreign: QueryField::qualified(junction, junction_model_column),
    };
    model
        .queryable()
        .with_join(join)
        .with_predicate(Predicate::equal(
            QueryField::qualified(junction, junction_key_column),
            key,
        ))
}

/// Related-object strategy of one field of one stored object
#[derive(Debug, Clone)]
pub enum DataAssociation {
    HasOne(HasOneAssociation),
    HasMany(HasManyAssociation),
    Junction(DataObjectJunction),
    ParentJunction(HasParentJunction),
}

impl DataAssociation {
    /// Resolve the strategy of `field` of `model` for `target`
    pub async fn for_field(
        model: &DataModel,
        target: &DataObject,
        field: &str,
    ) -> Result<Self, DataError> {
        let (mapping, role) = model.mapping_role(field)?.ok_or_else(|| {
            DataError::query(format!("{}.{} is not an association", model.name(), field))
        })?;
        let property = model
            .attribute(field)?
            .map(|a| a.property_name().to_string())
            .unwrap_or_else(|| field.to_string());
        let value_of = |name: &str| target.get(name).cloned().unwrap_or(Value::Null);

        match (role, mapping) {
            (AssociationRole::HasOne, AssociationMapping::Association(fk)) => {
                let key = target
                    .get(&property)
                    .and_then(|v| reference_key(v, &fk.parent_field))
                    .unwrap_or(Value::Null);
                Ok(Self::HasOne(HasOneAssociation {
                    parent: model.related(&fk.parent_model)?,
                    mapping: fk,
                    key,
                }))
            }
            (AssociationRole::HasMany, AssociationMapping::Association(fk)) => {
                Ok(Self::HasMany(HasManyAssociation {
                    child: model.related(&fk.child_model)?,
                    key: value_of(&fk.parent_field),
                    mapping: fk,
                }))
            }
            (AssociationRole::Junction, AssociationMapping::Junction(j)) => {
                let key = value_of(&j.parent_field);
                Ok(Self::Junction(DataObjectJunction::new(model, j, key).await?))
            }
            (AssociationRole::ParentJunction, AssociationMapping::Junction(j)) => {
                let key = value_of(&j.child_field);
                Ok(Self::ParentJunction(
                    HasParentJunction::new(model, j, key).await?,
                ))
            }
            (role, _) => Err(DataError::query(format!(
                "Unsupported association role {:?} of {}.{}",
                role,
                model.name(),
                field
            ))),
        }
    }

    /// Queryable over the related objects
    pub fn queryable(&self) -> Result<DataQueryable, DataError> {
        match self {
            Self::HasOne(a) => Ok(a.queryable()),
            Self::HasMany(a) => Ok(a.queryable()),
            Self::Junction(a) => a.queryable(),
            Self::ParentJunction(a) => a.queryable(),
        }
    }
}
