//! Data Settings
//!
//! Tunable knobs of a `DataConfiguration`. Every field has a default, so an
//! empty JSON object (`{}`) is a valid settings document.

use crate::services::permission::PermissionMode;
use crate::services::DataError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Plural-name pattern used to infer many-to-many junctions
pub const DEFAULT_PLURAL_PATTERN: &str = r"([a-zA-Z]+?)([e']s|[^aiou]s)$";

/// Settings of a data configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSettings {
    /// Lifetime of data cache entries in seconds
    pub cache_ttl_secs: u64,

    /// How a permission denial is surfaced
    pub permission_mode: PermissionMode,

    /// Entity recording applied migrations
    pub migration_entity: String,

    /// Object column of model junctions
    pub junction_object_field: String,

    /// Value column of model junctions
    pub junction_value_field: String,

    /// Object column of primitive-value junctions
    pub tag_object_field: String,

    /// Value column of primitive-value junctions
    pub tag_value_field: String,

    /// Regular expression matching plural field names
    pub plural_pattern: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 1200,
            permission_mode: PermissionMode::Assert,
            migration_entity: "migrations".to_string(),
            junction_object_field: "parentId".to_string(),
            junction_value_field: "valueId".to_string(),
            tag_object_field: "object".to_string(),
            tag_value_field: "value".to_string(),
            plural_pattern: DEFAULT_PLURAL_PATTERN.to_string(),
        }
    }
}

impl DataSettings {
    /// Parse settings from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self, DataError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check that names are usable and the plural pattern compiles
    pub fn validate(&self) -> Result<(), DataError> {
        if self.cache_ttl_secs == 0 {
            return Err(DataError::configuration("cacheTtlSecs must be greater than 0"));
        }

        let names = [
            ("migrationEntity", &self.migration_entity),
            ("junctionObjectField", &self.junction_object_field),
            ("junctionValueField", &self.junction_value_field),
            ("tagObjectField", &self.tag_object_field),
            ("tagValueField", &self.tag_value_field),
        ];
        for (key, value) in names {
            if value.trim().is_empty() {
                return Err(DataError::configuration(format!("{} cannot be empty", key)));
            }
        }
        if self.junction_object_field == self.junction_value_field
            || self.tag_object_field == self.tag_value_field
        {
            return Err(DataError::configuration(
                "Junction object and value columns must differ",
            ));
        }

        self.plural_regex()?;
        Ok(())
    }

    pub(crate) fn plural_regex(&self) -> Result<Regex, DataError> {
        Regex::new(&self.plural_pattern).map_err(|e| {
            DataError::configuration(format!(
                "Invalid plural pattern '{}': {}",
                self.plural_pattern, e
            ))
        })
    }
}
