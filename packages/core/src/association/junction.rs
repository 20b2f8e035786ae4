//! Junction tables as synthetic models
//!
//! A junction mapping names a table (`associationAdapter`) that is not part
//! of the declared models. It is registered on first use as a synthetic model
//! with a `Counter` key and the two link columns, so link rows go through the
//! regular save/remove pipeline and migration.

use crate::models::{
    field_types, ConstraintDefinition, FieldDefinition, JunctionMapping, ModelDefinition,
};
use crate::services::{DataError, DataModel};
use serde_json::Value;

/// Definition of the table backing a junction
pub(crate) fn junction_definition(mapping: &JunctionMapping) -> ModelDefinition {
    let object_type = mapping.parent_type.as_deref().unwrap_or(field_types::INTEGER);
    let value_type = mapping.child_type.as_deref().unwrap_or(field_types::INTEGER);
    let mut definition = ModelDefinition::new(&mapping.association_adapter)
        .with_field(FieldDefinition::primary("id", field_types::COUNTER))
        .with_field(FieldDefinition::new(&mapping.association_object_field, object_type).not_null())
        .with_field(FieldDefinition::new(&mapping.association_value_field, value_type).not_null())
        .with_constraint(ConstraintDefinition::unique(&[
            mapping.association_object_field.as_str(),
            mapping.association_value_field.as_str(),
        ]));
    definition.title = Some(format!(
        "{} to {} links",
        mapping.parent_model, mapping.child_model
    ));
    definition
}

/// Bind the (migrated) junction model of a mapping on an unattended context
pub(crate) async fn ensure_junction_model(
    owner: &DataModel,
    mapping: &JunctionMapping,
) -> Result<DataModel, DataError> {
    owner
        .context()
        .configuration()
        .register_synthetic_model(junction_definition(mapping));
    let junction = owner
        .context()
        .model(&mapping.association_adapter)?
        .elevated();
    junction.migrate().await?;
    Ok(junction)
}

/// Key referenced by a foreign-key or junction value
///
/// Objects yield their `key_name` attribute, scalars are keys themselves and
/// null references nothing.
pub fn reference_key(value: &Value, key_name: &str) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(object) => object.get(key_name).filter(|v| !v.is_null()).cloned(),
        Value::Array(_) => None,
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CascadePolicy;
    use serde_json::json;

    fn tag_mapping() -> JunctionMapping {
        JunctionMapping {
            parent_model: "Person".to_string(),
            parent_field: "id".to_string(),
            child_model: "Text".to_string(),
            child_field: "value".to_string(),
            association_adapter: "PersonSkills".to_string(),
            association_object_field: "object".to_string(),
            association_value_field: "value".to_string(),
            parent_type: Some("Integer".to_string()),
            child_type: Some("Text".to_string()),
            refers_to: Some("skills".to_string()),
            cascade: CascadePolicy::Delete,
            inline_values: true,
        }
    }

    #[test]
    fn test_junction_definition_columns() {
        let definition = junction_definition(&tag_mapping());
        assert_eq!(definition.name, "PersonSkills");
        let names: Vec<&str> = definition.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "object", "value"]);
        assert_eq!(definition.fields[2].field_type, "Text");
        assert!(!definition.fields[1].nullable);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_reference_key() {
        assert_eq!(reference_key(&json!(5), "id"), Some(json!(5)));
        assert_eq!(reference_key(&json!({"id": 5, "name": "x"}), "id"), Some(json!(5)));
        assert_eq!(reference_key(&json!({"name": "x"}), "id"), None);
        assert_eq!(reference_key(&Value::Null, "id"), None);
    }
}
