//! Association Resolver
//!
//! Derives the relationship semantics of a field when no explicit mapping is
//! declared. Results (including "not an association") are memoized in the
//! configuration per `(model, field)`.
//!
//! # Inference Rules
//!
//! 1. An explicit mapping is normalized (missing keys filled from the primary
//!    keys of the models involved) and returned
//! 2. A primitive `many` field becomes a tag junction storing the values inline;
//!    any other primitive field is a plain scalar
//! 3. A type naming no registered model is a plain scalar
//! 4. A back-reference (a field of the associated model typed as the origin
//!    model) decides the direction: a `many` back-reference makes the associated
//!    model the parent, otherwise the origin is the parent (reverse one-to-one
//!    or one-to-many navigation). Two `many` sides form a junction
//! 5. Without back-reference a plural or `many` field becomes a junction named
//!    `Model + Field`, anything else a many-to-one foreign key

use crate::models::{
    field_types, AssociationMapping, CascadePolicy, FieldDefinition, ForeignKeyMapping,
    JunctionMapping, ModelDefinition,
};
use crate::services::{DataConfiguration, DataError};
use tracing::debug;

/// Resolve the mapping of `field` declared on `model`
pub fn infer_mapping(
    configuration: &DataConfiguration,
    model: &str,
    field: &str,
) -> Result<Option<AssociationMapping>, DataError> {
    if let Some(cached) = configuration.cached_mapping(model, field) {
        return Ok(cached);
    }

    let definition = configuration
        .model_definition(model)
        .ok_or_else(|| DataError::model_not_found(model))?;
    let attribute = definition.field(field).ok_or_else(|| {
        DataError::configuration(format!("Model {} has no field '{}'", model, field))
    })?;

    let mapping = match &attribute.mapping {
        Some(explicit) => Some(normalize(configuration, &definition, attribute, explicit)?),
        None => infer(configuration, &definition, attribute)?,
    };

    debug!(
        "Resolved mapping of {}.{}: {}",
        definition.name,
        attribute.name,
        match &mapping {
            Some(AssociationMapping::Association(_)) => "association",
            Some(AssociationMapping::Junction(_)) => "junction",
            None => "none",
        }
    );
    configuration.cache_mapping(&definition.name, &attribute.name, mapping.clone());
    if attribute.name != field {
        configuration.cache_mapping(&definition.name, field, mapping.clone());
    }
    Ok(mapping)
}

fn primary_key_name(
    configuration: &DataConfiguration,
    model: &str,
) -> Result<(String, String), DataError> {
    configuration
        .primary_key_of(model)?
        .map(|pk| (pk.name, pk.field_type))
        .ok_or_else(|| {
            DataError::configuration(format!("Model {} has no primary key", model))
        })
}

fn junction_name(model: &str, field: &str) -> String {
    format!("{}{}", model, field_types::capitalize(field))
}

fn normalize(
    configuration: &DataConfiguration,
    definition: &ModelDefinition,
    attribute: &FieldDefinition,
    explicit: &AssociationMapping,
) -> Result<AssociationMapping, DataError> {
    let invalid =
        |reason: &str| DataError::invalid_mapping(&definition.name, &attribute.name, reason);

    match explicit {
        AssociationMapping::Association(m) => {
            let mut m = m.clone();
            if m.parent_model.is_empty() {
                return Err(invalid("parentModel is required"));
            }
            if configuration.model_definition(&m.parent_model).is_none() {
                return Err(invalid(&format!("unknown parent model {}", m.parent_model)));
            }
            if m.child_model.is_empty() {
                m.child_model = definition.name.clone();
            }
            if m.parent_field.is_empty() {
                m.parent_field = primary_key_name(configuration, &m.parent_model)?.0;
            }
            if m.child_field.is_empty() {
                m.child_field = attribute.name.clone();
            }
            if m.parent_model != definition.name && m.child_model != definition.name {
                return Err(invalid("mapping does not involve the declaring model"));
            }
            Ok(AssociationMapping::Association(m))
        }
        AssociationMapping::Junction(m) => {
            let settings = configuration.settings();
            let mut m = m.clone();
            if m.parent_model.is_empty() {
                m.parent_model = definition.name.clone();
            }
            if m.child_model.is_empty() {
                m.child_model = attribute.field_type.clone();
            }
            let (parent_key, parent_type) = primary_key_name(configuration, &m.parent_model)?;
            if m.parent_field.is_empty() {
                m.parent_field = parent_key;
            }
            if m.parent_type.is_none() {
                m.parent_type = Some(field_types::key_reference_type(&parent_type).to_string());
            }
            if m.association_adapter.is_empty() {
                m.association_adapter = junction_name(&definition.name, &attribute.name);
            }

            if m.inline_values || field_types::is_primitive(&m.child_model) {
                m.inline_values = true;
                if m.association_object_field.is_empty() {
                    m.association_object_field = settings.tag_object_field.clone();
                }
                if m.association_value_field.is_empty() {
                    m.association_value_field = settings.tag_value_field.clone();
                }
                if m.child_field.is_empty() {
                    m.child_field = m.association_value_field.clone();
                }
                if m.child_type.is_none() {
                    m.child_type = Some(m.child_model.clone());
                }
            } else {
                if configuration.model_definition(&m.child_model).is_none() {
                    return Err(invalid(&format!("unknown child model {}", m.child_model)));
                }
                let (child_key, child_type) = primary_key_name(configuration, &m.child_model)?;
                if m.child_field.is_empty() {
                    m.child_field = child_key;
                }
                if m.child_type.is_none() {
                    m.child_type =
                        Some(field_types::key_reference_type(&child_type).to_string());
                }
                if m.association_object_field.is_empty() {
                    m.association_object_field = settings.junction_object_field.clone();
                }
                if m.association_value_field.is_empty() {
                    m.association_value_field = settings.junction_value_field.clone();
                }
            }
            if m.association_object_field == m.association_value_field {
                return Err(invalid("junction object and value fields must differ"));
            }
            Ok(AssociationMapping::Junction(m))
        }
    }
}

fn infer(
    configuration: &DataConfiguration,
    definition: &ModelDefinition,
    attribute: &FieldDefinition,
) -> Result<Option<AssociationMapping>, DataError> {
    let settings = configuration.settings();

    if attribute.is_primitive() {
        if !attribute.many {
            return Ok(None);
        }
        let (parent_key, parent_type) = primary_key_name(configuration, &definition.name)?;
        return Ok(Some(AssociationMapping::Junction(JunctionMapping {
            parent_model: definition.name.clone(),
            parent_field: parent_key,
            child_model: attribute.field_type.clone(),
            child_field: settings.tag_value_field.clone(),
            association_adapter: junction_name(&definition.name, &attribute.name),
            association_object_field: settings.tag_object_field.clone(),
            association_value_field: settings.tag_value_field.clone(),
            parent_type: Some(field_types::key_reference_type(&parent_type).to_string()),
            child_type: Some(attribute.field_type.clone()),
            refers_to: Some(attribute.name.clone()),
            cascade: CascadePolicy::Delete,
            inline_values: true,
        })));
    }

    let Some(associated) = configuration.model_definition(&attribute.field_type) else {
        return Ok(None);
    };

    let back_reference = associated.fields.iter().find(|f| {
        f.field_type == definition.name
            && !(associated.name == definition.name && f.name == attribute.name)
    });

    if let Some(back) = back_reference {
        if back.many && attribute.many {
            return model_junction(configuration, definition, attribute, &associated).map(Some);
        }
        let mapping = if back.many {
            ForeignKeyMapping {
                parent_model: associated.name.clone(),
                parent_field: primary_key_name(configuration, &associated.name)?.0,
                child_model: definition.name.clone(),
                child_field: attribute.name.clone(),
                refers_to: Some(back.name.clone()),
                cascade: CascadePolicy::Null,
                one_to_one: false,
            }
        } else {
            ForeignKeyMapping {
                parent_model: definition.name.clone(),
                parent_field: primary_key_name(configuration, &definition.name)?.0,
                child_model: associated.name.clone(),
                child_field: back.name.clone(),
                refers_to: Some(attribute.name.clone()),
                cascade: CascadePolicy::Null,
                one_to_one: !attribute.many,
            }
        };
        return Ok(Some(AssociationMapping::Association(mapping)));
    }

    if attribute.many || configuration.is_plural(&attribute.name) {
        return model_junction(configuration, definition, attribute, &associated).map(Some);
    }

    Ok(Some(AssociationMapping::Association(ForeignKeyMapping {
        parent_model: associated.name.clone(),
        parent_field: primary_key_name(configuration, &associated.name)?.0,
        child_model: definition.name.clone(),
        child_field: attribute.name.clone(),
        refers_to: None,
        cascade: CascadePolicy::None,
        one_to_one: false,
    })))
}

fn model_junction(
    configuration: &DataConfiguration,
    definition: &ModelDefinition,
    attribute: &FieldDefinition,
    associated: &ModelDefinition,
) -> Result<AssociationMapping, DataError> {
    let settings = configuration.settings();
    let (parent_key, parent_type) = primary_key_name(configuration, &definition.name)?;
    let (child_key, child_type) = primary_key_name(configuration, &associated.name)?;
    Ok(AssociationMapping::Junction(JunctionMapping {
        parent_model: definition.name.clone(),
        parent_field: parent_key,
        child_model: associated.name.clone(),
        child_field: child_key,
        association_adapter: junction_name(&definition.name, &attribute.name),
        association_object_field: settings.junction_object_field.clone(),
        association_value_field: settings.junction_value_field.clone(),
        parent_type: Some(field_types::key_reference_type(&parent_type).to_string()),
        child_type: Some(field_types::key_reference_type(&child_type).to_string()),
        refers_to: Some(attribute.name.clone()),
        cascade: CascadePolicy::Delete,
        inline_values: false,
    }))
}
