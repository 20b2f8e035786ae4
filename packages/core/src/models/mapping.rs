//! Association Mappings
//!
//! A mapping is the resolved relationship descriptor between a field of one
//! model and another model. It is a closed variant:
//!
//! - `Association` - a foreign key held by the child model and pointing at the
//!   parent model's key (many-to-one / one-to-many / one-to-one)
//! - `Junction` - a synthetic many-to-many table (`associationAdapter`) with an
//!   object column pointing at the parent and a value column pointing at the
//!   child (or holding the value itself for primitive "tag" junctions)
//!
//! ## Serialized Form
//!
//! ```json
//! {
//!   "associationType": "junction",
//!   "parentModel": "Person",
//!   "parentField": "id",
//!   "childModel": "Group",
//!   "childField": "id",
//!   "associationAdapter": "PersonGroups",
//!   "associationObjectField": "parentId",
//!   "associationValueField": "valueId",
//!   "cascade": "delete"
//! }
//! ```

use serde::{Deserialize, Serialize};

/// What happens to dependent rows when a parent object is removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadePolicy {
    #[default]
    None,
    /// Clear the foreign key of dependent rows
    Null,
    /// Remove dependent rows (or junction links)
    Delete,
}

/// Foreign-key association between a parent (one side) and a child (key holder)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyMapping {
    pub parent_model: String,
    #[serde(default)]
    pub parent_field: String,
    #[serde(default)]
    pub child_model: String,
    #[serde(default)]
    pub child_field: String,
    /// Field of the parent model that navigates back to the children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refers_to: Option<String>,
    #[serde(default)]
    pub cascade: CascadePolicy,
    #[serde(default)]
    pub one_to_one: bool,
}

/// Many-to-many association stored in a junction table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JunctionMapping {
    #[serde(default)]
    pub parent_model: String,
    #[serde(default)]
    pub parent_field: String,
    #[serde(default)]
    pub child_model: String,
    #[serde(default)]
    pub child_field: String,
    #[serde(default)]
    pub association_adapter: String,
    #[serde(default)]
    pub association_object_field: String,
    #[serde(default)]
    pub association_value_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refers_to: Option<String>,
    #[serde(default)]
    pub cascade: CascadePolicy,
    /// Values are stored inline in the junction instead of referencing a child model
    #[serde(default)]
    pub inline_values: bool,
}

/// Resolved relationship descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "associationType", rename_all = "camelCase")]
pub enum AssociationMapping {
    Association(ForeignKeyMapping),
    Junction(JunctionMapping),
}

/// How a field of a given model participates in a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRole {
    /// The field holds the foreign key (many-to-one)
    HasOne,
    /// The model is the parent; the field navigates to the children
    HasMany,
    /// The model is the junction's parent (object side)
    Junction,
    /// The model is the junction's child (value side)
    ParentJunction,
}

impl AssociationMapping {
    pub fn parent_model(&self) -> &str {
        match self {
            Self::Association(m) => &m.parent_model,
            Self::Junction(m) => &m.parent_model,
        }
    }

    pub fn parent_field(&self) -> &str {
        match self {
            Self::Association(m) => &m.parent_field,
            Self::Junction(m) => &m.parent_field,
        }
    }

    pub fn child_model(&self) -> &str {
        match self {
            Self::Association(m) => &m.child_model,
            Self::Junction(m) => &m.child_model,
        }
    }

    pub fn child_field(&self) -> &str {
        match self {
            Self::Association(m) => &m.child_field,
            Self::Junction(m) => &m.child_field,
        }
    }

    pub fn cascade(&self) -> CascadePolicy {
        match self {
            Self::Association(m) => m.cascade,
            Self::Junction(m) => m.cascade,
        }
    }

    pub fn refers_to(&self) -> Option<&str> {
        match self {
            Self::Association(m) => m.refers_to.as_deref(),
            Self::Junction(m) => m.refers_to.as_deref(),
        }
    }

    pub fn is_junction(&self) -> bool {
        matches!(self, Self::Junction(_))
    }

    pub fn as_junction(&self) -> Option<&JunctionMapping> {
        match self {
            Self::Junction(m) => Some(m),
            Self::Association(_) => None,
        }
    }

    pub fn as_foreign_key(&self) -> Option<&ForeignKeyMapping> {
        match self {
            Self::Association(m) => Some(m),
            Self::Junction(_) => None,
        }
    }

    /// Role of `field_name` on `model_name` within this mapping
    ///
    /// The foreign-key check runs first so that self-referencing models
    /// (`Person.parent: Person`) resolve the key-holding field as `HasOne`.
    pub fn role_of(&self, model_name: &str, field_name: &str) -> AssociationRole {
        match self {
            Self::Association(m) => {
                if m.child_model == model_name && m.child_field == field_name {
                    AssociationRole::HasOne
                } else if m.parent_model == model_name {
                    AssociationRole::HasMany
                } else {
                    AssociationRole::HasOne
                }
            }
            Self::Junction(m) => {
                if m.parent_model == model_name {
                    AssociationRole::Junction
                } else {
                    AssociationRole::ParentJunction
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_junction_mapping_deserialization() {
        let mapping: AssociationMapping = serde_json::from_value(json!({
            "associationType": "junction",
            "parentModel": "Person",
            "parentField": "id",
            "childModel": "Group",
            "childField": "id",
            "associationAdapter": "PersonGroups",
            "cascade": "delete"
        }))
        .unwrap();

        let junction = mapping.as_junction().unwrap();
        assert_eq!(junction.association_adapter, "PersonGroups");
        assert_eq!(junction.cascade, CascadePolicy::Delete);
        assert!(junction.association_object_field.is_empty());
        assert!(!junction.inline_values);
    }

    #[test]
    fn test_association_mapping_serialization_contract() {
        let mapping = AssociationMapping::Association(ForeignKeyMapping {
            parent_model: "Person".to_string(),
            parent_field: "id".to_string(),
            child_model: "Order".to_string(),
            child_field: "customer".to_string(),
            refers_to: None,
            cascade: CascadePolicy::Null,
            one_to_one: false,
        });

        let value = serde_json::to_value(&mapping).unwrap();
        assert_eq!(value["associationType"], "association");
        assert_eq!(value["parentModel"], "Person");
        assert_eq!(value["childField"], "customer");
        assert_eq!(value["cascade"], "null");
        assert!(value.get("refersTo").is_none());
    }

    #[test]
    fn test_role_of_self_reference() {
        let mapping = AssociationMapping::Association(ForeignKeyMapping {
            parent_model: "Person".to_string(),
            parent_field: "id".to_string(),
            child_model: "Person".to_string(),
            child_field: "parent".to_string(),
            refers_to: Some("children".to_string()),
            cascade: CascadePolicy::None,
            one_to_one: false,
        });

        assert_eq!(mapping.role_of("Person", "parent"), AssociationRole::HasOne);
        assert_eq!(mapping.role_of("Person", "children"), AssociationRole::HasMany);
    }
}
