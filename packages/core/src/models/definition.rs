//! Model Definitions
//!
//! Declarative description of a model: fields, constraints, listeners, views
//! and seed data. Definitions are loaded once per configuration and shared
//! (`Arc<ModelDefinition>`) by every bound `DataModel`.
//!
//! ## Example Definition
//!
//! ```json
//! {
//!   "name": "Order",
//!   "version": "1.1",
//!   "fields": [
//!     { "name": "id", "type": "Counter", "primary": true },
//!     { "name": "customer", "type": "Person", "nullable": false, "expandable": true },
//!     { "name": "orderDate", "type": "DateTime", "value": "fn:now" }
//!   ],
//!   "constraints": [ { "type": "unique", "fields": ["reference"] } ],
//!   "views": [ { "name": "summary", "fields": ["id", "customer/name as customerName"] } ]
//! }
//! ```

use crate::models::field_types;
use crate::models::mapping::AssociationMapping;
use crate::DataObject;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;

/// Prefix of a string expression naming a registered function
pub const FUNCTION_PREFIX: &str = "fn:";

/// Prefix of free-form script expressions, which are rejected
const SCRIPT_PREFIX: &str = "javascript:";

/// Default or calculated value of a field
///
/// `"fn:now"` names a function of the configuration's function table; any other
/// JSON value is used literally.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldExpression {
    Literal(Value),
    Function(String),
}

impl FieldExpression {
    /// Parse an expression from its JSON form
    pub fn parse(value: Value) -> Result<Self, String> {
        if let Value::String(text) = &value {
            if let Some(name) = text.strip_prefix(FUNCTION_PREFIX) {
                let name = name.trim().trim_end_matches("()");
                if name.is_empty() {
                    return Err("Function expression must name a function".to_string());
                }
                return Ok(Self::Function(name.to_string()));
            }
            if text.starts_with(SCRIPT_PREFIX) {
                return Err(format!(
                    "Script expressions are not supported: '{}'. Register a function and use '{}<name>'",
                    text, FUNCTION_PREFIX
                ));
            }
        }
        Ok(Self::Literal(value))
    }
}

impl Serialize for FieldExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(value) => value.serialize(serializer),
            Self::Function(name) => format!("{}{}", FUNCTION_PREFIX, name).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::parse(value).map_err(serde::de::Error::custom)
    }
}

fn default_field_type() -> String {
    field_types::TEXT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Definition of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,

    /// Alias under which the field is exposed to callers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    /// Primitive type name or the name of another model
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,

    #[serde(default = "default_true")]
    pub nullable: bool,

    /// One-to-many / many-to-many marker
    #[serde(default)]
    pub many: bool,

    #[serde(default)]
    pub primary: bool,

    /// Selecting this foreign-key field by name expands it into the related object
    #[serde(default)]
    pub expandable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<AssociationMapping>,

    /// Default value applied on insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldExpression>,

    /// Value recalculated on every save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<FieldExpression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    /// Create a nullable field of the given type
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property: None,
            field_type: field_type.into(),
            nullable: true,
            many: false,
            primary: false,
            expandable: false,
            mapping: None,
            value: None,
            calculation: None,
            description: None,
        }
    }

    /// Create a primary key field
    pub fn primary(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            primary: true,
            nullable: false,
            ..Self::new(name, field_type)
        }
    }

    pub fn with_many(mut self) -> Self {
        self.many = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_mapping(mut self, mapping: AssociationMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn with_value(mut self, value: FieldExpression) -> Self {
        self.value = Some(value);
        self
    }

    pub fn is_primitive(&self) -> bool {
        field_types::is_primitive(&self.field_type)
    }

    /// Name under which the value travels in data objects
    pub fn property_name(&self) -> &str {
        self.property.as_deref().unwrap_or(&self.name)
    }
}

/// Kind of a model constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintType {
    Unique,
    Constraint,
}

/// Model constraint; unique constraints double as natural keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConstraintDefinition {
    pub fn unique(fields: &[&str]) -> Self {
        Self {
            constraint_type: ConstraintType::Unique,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            description: None,
        }
    }
}

/// Reference to a listener registered in the configuration by type name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventListenerRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub listener_type: String,
}

/// Predefined projection + filter + order bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Field expressions (`name`, `customer/name`, `name as alias`)
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Whether query results of a model are served from the data cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachingMode {
    #[default]
    None,
    Always,
}

/// Complete model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Base model of the single inheritance chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    /// Sealed models never migrate
    #[serde(default)]
    pub sealed: bool,

    /// Abstract models cannot be inserted
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,

    /// Storage table (defaults to the model name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Queryable view (defaults to the source, or `<Name>Data` for inherited models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,

    #[serde(default)]
    pub fields: Vec<FieldDefinition>,

    #[serde(default)]
    pub constraints: Vec<ConstraintDefinition>,

    #[serde(default)]
    pub event_listeners: Vec<EventListenerRef>,

    #[serde(default)]
    pub views: Vec<ViewDefinition>,

    #[serde(default)]
    pub seed: Vec<DataObject>,

    #[serde(default)]
    pub caching: CachingMode,
}

impl ModelDefinition {
    /// Create an empty definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            inherits: None,
            version: default_version(),
            sealed: false,
            is_abstract: false,
            source: None,
            view: None,
            fields: Vec::new(),
            constraints: Vec::new(),
            event_listeners: Vec::new(),
            views: Vec::new(),
            seed: Vec::new(),
            caching: CachingMode::None,
        }
    }

    /// Parse a definition from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_constraint(mut self, constraint: ConstraintDefinition) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.inherits = Some(base.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Storage table name
    pub fn source_name(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    /// Name of the entity queries read from
    pub fn view_name(&self) -> String {
        match (&self.view, &self.inherits) {
            (Some(view), _) => view.clone(),
            (None, Some(_)) => format!("{}Data", self.name),
            (None, None) => self.source_name().to_string(),
        }
    }

    /// Whether queries read from an entity other than the storage table
    pub fn has_distinct_view(&self) -> bool {
        self.view_name() != self.source_name()
    }

    /// Field declared directly on this model
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.name == name || f.property.as_deref() == Some(name))
    }

    /// Primary key declared directly on this model
    pub fn primary_key(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.primary)
    }

    pub fn unique_constraints(&self) -> impl Iterator<Item = &ConstraintDefinition> {
        self.constraints
            .iter()
            .filter(|c| c.constraint_type == ConstraintType::Unique)
    }

    pub fn view_definition(&self, name: &str) -> Option<&ViewDefinition> {
        self.views.iter().find(|v| v.name == name)
    }

    /// Check structural consistency of the definition
    ///
    /// Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_')
        {
            return Err(format!(
                "Invalid model name '{}': must contain only alphanumeric characters and underscores",
                self.name
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(format!("Model '{}' declares a field without a name", self.name));
            }
            if field.name.contains('/') {
                return Err(format!(
                    "Invalid field name '{}.{}': '/' is reserved for nested attributes",
                    self.name, field.name
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!(
                    "Model '{}' declares field '{}' more than once",
                    self.name, field.name
                ));
            }
        }

        if self.fields.iter().filter(|f| f.primary).count() > 1 {
            return Err(format!(
                "Model '{}' declares more than one primary key",
                self.name
            ));
        }

        for constraint in &self.constraints {
            if constraint.fields.is_empty() {
                return Err(format!(
                    "Model '{}' declares a constraint without fields",
                    self.name
                ));
            }
        }

        for view in &self.views {
            if self.fields.iter().any(|f| f.name == view.name) {
                return Err(format!(
                    "View '{}' of model '{}' collides with a field name",
                    view.name, self.name
                ));
            }
            let mut trail = vec![view.name.as_str()];
            self.check_nested_views(view, &mut trail)?;
        }

        Ok(())
    }

    /// Views may select other views as long as none of them selects itself
    fn check_nested_views<'a>(
        &'a self,
        view: &'a ViewDefinition,
        trail: &mut Vec<&'a str>,
    ) -> Result<(), String> {
        for field in &view.fields {
            let Some(nested) = self.view_definition(field.trim()) else {
                continue;
            };
            if trail.contains(&nested.name.as_str()) {
                return Err(format!(
                    "View '{}' of model '{}' selects itself through '{}'",
                    nested.name,
                    self.name,
                    trail.join("' -> '")
                ));
            }
            trail.push(nested.name.as_str());
            self.check_nested_views(nested, trail)?;
            trail.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_definition_defaults() {
        let definition: ModelDefinition = serde_json::from_value(json!({
            "name": "Person",
            "fields": [
                { "name": "id", "type": "Counter", "primary": true },
                { "name": "name" },
                { "name": "skills", "type": "Text", "many": true }
            ]
        }))
        .unwrap();

        assert_eq!(definition.version, "1.0");
        assert_eq!(definition.source_name(), "Person");
        assert_eq!(definition.view_name(), "Person");
        assert!(!definition.has_distinct_view());
        assert_eq!(definition.primary_key().unwrap().name, "id");
        assert_eq!(definition.fields[1].field_type, "Text");
        assert!(definition.fields[1].nullable);
        assert!(definition.fields[2].many);
    }

    #[test]
    fn test_inherited_model_gets_distinct_view() {
        let definition = ModelDefinition::new("Employee").with_base("Person");
        assert_eq!(definition.source_name(), "Employee");
        assert_eq!(definition.view_name(), "EmployeeData");
        assert!(definition.has_distinct_view());
    }

    #[test]
    fn test_field_expression_parsing() {
        let field: FieldDefinition = serde_json::from_value(json!({
            "name": "createdAt",
            "type": "DateTime",
            "value": "fn:now()"
        }))
        .unwrap();
        assert_eq!(
            field.value,
            Some(FieldExpression::Function("now".to_string()))
        );

        let field: FieldDefinition = serde_json::from_value(json!({
            "name": "status",
            "value": "open"
        }))
        .unwrap();
        assert_eq!(field.value, Some(FieldExpression::Literal(json!("open"))));
    }

    #[test]
    fn test_script_expressions_are_rejected() {
        let result: Result<FieldDefinition, _> = serde_json::from_value(json!({
            "name": "createdAt",
            "value": "javascript:return new Date();"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_fields() {
        let definition = ModelDefinition::new("Person")
            .with_field(FieldDefinition::new("name", "Text"))
            .with_field(FieldDefinition::new("name", "Text"));
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nested_field_names() {
        let definition =
            ModelDefinition::new("Person").with_field(FieldDefinition::new("a/b", "Text"));
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_views_selecting_each_other() {
        let definition: ModelDefinition = serde_json::from_value(json!({
            "name": "Person",
            "fields": [ { "name": "id", "type": "Counter", "primary": true } ],
            "views": [
                { "name": "summary", "fields": ["id", "details"] },
                { "name": "details", "fields": ["summary"] }
            ]
        }))
        .unwrap();
        let reason = definition.validate().unwrap_err();
        assert!(reason.contains("selects itself"), "{}", reason);

        let nested: ModelDefinition = serde_json::from_value(json!({
            "name": "Person",
            "fields": [ { "name": "id", "type": "Counter", "primary": true } ],
            "views": [
                { "name": "summary", "fields": ["details"] },
                { "name": "details", "fields": ["id"] }
            ]
        }))
        .unwrap();
        assert!(nested.validate().is_ok());
    }

    #[test]
    fn test_unique_constraints() {
        let definition = ModelDefinition::new("Skill")
            .with_constraint(ConstraintDefinition::unique(&["name"]))
            .with_constraint(ConstraintDefinition {
                constraint_type: ConstraintType::Constraint,
                fields: vec!["level".to_string()],
                description: None,
            });
        assert_eq!(definition.unique_constraints().count(), 1);
    }
}
