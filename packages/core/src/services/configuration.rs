//! Data Configuration
//!
//! `DataConfiguration` is the explicit replacement for a global configuration
//! singleton. It owns everything that is shared by every context created
//! from it:
//!
//! - the model-definition registry (with field overrides)
//! - the memoized association-mapping cache keyed by `(model, field)`
//! - the attribute cache (own fields plus the inherited chain)
//! - the migration-state cache (model name to migrated version)
//! - the function table, the listener registry and the data cache
//!
//! # Thread Safety
//!
//! Registries and caches sit behind `std::sync::RwLock`s; no lock is ever held
//! across an `.await`. A poisoned lock is recovered, since every guarded value
//! is a plain cache that stays consistent between writes.

use crate::events::DataEventListener;
use crate::models::{AssociationMapping, FieldDefinition, ModelDefinition};
use crate::services::cache::{DataCache, MemoryDataCache};
use crate::services::functions::{FunctionContext, FunctionRegistry};
use crate::services::{DataError, DataSettings};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

type MappingKey = (String, String);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared configuration of a set of models
pub struct DataConfiguration {
    settings: DataSettings,
    plural: Regex,
    models: RwLock<HashMap<String, Arc<ModelDefinition>>>,
    mappings: RwLock<HashMap<MappingKey, Option<AssociationMapping>>>,
    attributes: RwLock<HashMap<String, Arc<Vec<FieldDefinition>>>>,
    migrations: RwLock<HashMap<String, String>>,
    ledger_ready: AtomicBool,
    functions: RwLock<FunctionRegistry>,
    listeners: RwLock<HashMap<String, Arc<dyn DataEventListener>>>,
    cache: Arc<dyn DataCache>,
}

impl std::fmt::Debug for DataConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConfiguration")
            .field("settings", &self.settings)
            .field("models", &self.model_names())
            .finish()
    }
}

impl DataConfiguration {
    /// Create a configuration with the given settings
    pub fn new(settings: DataSettings) -> Result<Self, DataError> {
        settings.validate()?;
        let plural = settings.plural_regex()?;
        let cache: Arc<dyn DataCache> = Arc::new(MemoryDataCache::new(Duration::from_secs(
            settings.cache_ttl_secs,
        )));

        Ok(Self {
            settings,
            plural,
            models: RwLock::new(HashMap::new()),
            mappings: RwLock::new(HashMap::new()),
            attributes: RwLock::new(HashMap::new()),
            migrations: RwLock::new(HashMap::new()),
            ledger_ready: AtomicBool::new(false),
            functions: RwLock::new(FunctionRegistry::new()),
            listeners: RwLock::new(HashMap::new()),
            cache,
        })
    }

    /// Replace the data cache
    pub fn with_cache(mut self, cache: Arc<dyn DataCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn settings(&self) -> &DataSettings {
        &self.settings
    }

    pub fn cache(&self) -> Arc<dyn DataCache> {
        Arc::clone(&self.cache)
    }

    /// Whether a field name looks plural
    pub fn is_plural(&self, name: &str) -> bool {
        self.plural.is_match(name)
    }

    //
    // MODEL REGISTRY
    //

    /// Register (or replace) a model definition
    ///
    /// Invalidates the mapping and attribute caches, since inferred mappings
    /// depend on the fields of related models.
    pub fn register_model(&self, definition: ModelDefinition) -> Result<(), DataError> {
        definition
            .validate()
            .map_err(DataError::configuration)?;
        debug!("Registering model {}", definition.name);
        write(&self.models).insert(definition.name.clone(), Arc::new(definition));
        self.invalidate_definitions();
        Ok(())
    }

    /// Register every definition of a JSON array
    pub fn register_models_json(&self, json: &str) -> Result<usize, DataError> {
        let definitions: Vec<ModelDefinition> = serde_json::from_str(json)
            .map_err(|e| DataError::configuration(format!("Invalid model definitions: {}", e)))?;
        let count = definitions.len();
        for definition in definitions {
            self.register_model(definition)?;
        }
        Ok(count)
    }

    /// Register a synthetic model without touching other models' caches
    pub(crate) fn register_synthetic_model(&self, definition: ModelDefinition) {
        let name = definition.name.clone();
        let mut models = write(&self.models);
        if !models.contains_key(&name) {
            models.insert(name.clone(), Arc::new(definition));
            write(&self.attributes).remove(&name);
        }
    }

    /// Add or override a field of a registered model
    pub fn add_field(&self, model: &str, field: FieldDefinition) -> Result<(), DataError> {
        let mut models = write(&self.models);
        let current = models
            .get(model)
            .ok_or_else(|| DataError::model_not_found(model))?;

        let mut definition = ModelDefinition::clone(current);
        definition.fields.retain(|f| f.name != field.name);
        definition.fields.push(field);
        definition
            .validate()
            .map_err(DataError::configuration)?;

        models.insert(model.to_string(), Arc::new(definition));
        drop(models);
        self.invalidate_definitions();
        Ok(())
    }

    /// Look up a definition by name (exact match first, then case-insensitive)
    pub fn model_definition(&self, name: &str) -> Option<Arc<ModelDefinition>> {
        let models = read(&self.models);
        if let Some(definition) = models.get(name) {
            return Some(Arc::clone(definition));
        }
        models
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .map(Arc::clone)
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.models).keys().cloned().collect();
        names.sort();
        names
    }

    fn invalidate_definitions(&self) {
        write(&self.mappings).clear();
        write(&self.attributes).clear();
    }

    //
    // MAPPING / ATTRIBUTE CACHES
    //

    pub(crate) fn cached_mapping(
        &self,
        model: &str,
        field: &str,
    ) -> Option<Option<AssociationMapping>> {
        read(&self.mappings)
            .get(&(model.to_string(), field.to_string()))
            .cloned()
    }

    pub(crate) fn cache_mapping(
        &self,
        model: &str,
        field: &str,
        mapping: Option<AssociationMapping>,
    ) {
        write(&self.mappings).insert((model.to_string(), field.to_string()), mapping);
    }

    /// Attributes of a model: its own fields followed by every inherited field
    /// it does not override, walking the base chain
    pub fn attributes_of(&self, model: &str) -> Result<Arc<Vec<FieldDefinition>>, DataError> {
        if let Some(cached) = read(&self.attributes).get(model) {
            return Ok(Arc::clone(cached));
        }

        let definition = self
            .model_definition(model)
            .ok_or_else(|| DataError::model_not_found(model))?;
        let mut attributes: Vec<FieldDefinition> = definition.fields.clone();
        let mut visited = vec![definition.name.clone()];
        let mut base = definition.inherits.clone();

        while let Some(base_name) = base {
            if visited.contains(&base_name) {
                return Err(DataError::configuration(format!(
                    "Inheritance cycle detected at model '{}'",
                    base_name
                )));
            }
            let base_definition = self
                .model_definition(&base_name)
                .ok_or_else(|| DataError::model_not_found(&base_name))?;
            for field in &base_definition.fields {
                if !attributes.iter().any(|a| a.name == field.name) {
                    attributes.push(field.clone());
                }
            }
            visited.push(base_name);
            base = base_definition.inherits.clone();
        }

        let attributes = Arc::new(attributes);
        write(&self.attributes).insert(definition.name.clone(), Arc::clone(&attributes));
        Ok(attributes)
    }

    /// Primary key attribute of a model (own or inherited)
    pub fn primary_key_of(&self, model: &str) -> Result<Option<FieldDefinition>, DataError> {
        Ok(self.attributes_of(model)?.iter().find(|f| f.primary).cloned())
    }

    //
    // MIGRATION STATE
    //

    /// Version a model was migrated to in this process
    pub fn migrated_version(&self, model: &str) -> Option<String> {
        read(&self.migrations).get(model).cloned()
    }

    pub(crate) fn set_migrated(&self, model: &str, version: &str) {
        write(&self.migrations).insert(model.to_string(), version.to_string());
    }

    pub(crate) fn ledger_ready(&self) -> bool {
        self.ledger_ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ledger_ready(&self) {
        self.ledger_ready.store(true, Ordering::Release);
    }

    //
    // FUNCTIONS
    //

    /// Register a function usable as `"fn:<name>"` in default/calculated values
    pub fn register_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&FunctionContext<'_>) -> Result<Value, DataError> + Send + Sync + 'static,
    {
        write(&self.functions).register(name, function);
    }

    pub fn has_function(&self, name: &str) -> bool {
        read(&self.functions).contains(name)
    }

    pub fn evaluate_function(
        &self,
        name: &str,
        ctx: &FunctionContext<'_>,
    ) -> Result<Value, DataError> {
        read(&self.functions).evaluate(name, ctx)
    }

    //
    // LISTENERS
    //

    /// Register a listener referenced by `eventListeners[].type` in definitions
    pub fn register_listener(
        &self,
        type_name: impl Into<String>,
        listener: Arc<dyn DataEventListener>,
    ) {
        write(&self.listeners).insert(type_name.into(), listener);
    }

    pub fn listener(&self, type_name: &str) -> Option<Arc<dyn DataEventListener>> {
        read(&self.listeners).get(type_name).cloned()
    }

    //
    // RELOAD
    //

    /// Clear every process-wide cache (configuration reload)
    pub async fn reset_caches(&self) -> Result<(), DataError> {
        self.invalidate_definitions();
        write(&self.migrations).clear();
        self.ledger_ready.store(false, Ordering::Release);
        self.cache.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldDefinition;

    fn config() -> DataConfiguration {
        DataConfiguration::new(DataSettings::default()).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let config = config();
        config
            .register_model(
                ModelDefinition::new("Person")
                    .with_field(FieldDefinition::primary("id", "Counter")),
            )
            .unwrap();

        assert!(config.model_definition("Person").is_some());
        assert!(config.model_definition("person").is_some());
        assert!(config.model_definition("Order").is_none());
        assert_eq!(config.model_names(), vec!["Person".to_string()]);
    }

    #[test]
    fn test_register_rejects_invalid_definition() {
        let config = config();
        let err = config
            .register_model(ModelDefinition::new("Bad Name"))
            .unwrap_err();
        assert_eq!(err.code(), "ECONF");
    }

    #[test]
    fn test_add_field_invalidates_mapping_cache() {
        let config = config();
        config.register_model(ModelDefinition::new("Person")).unwrap();
        config.cache_mapping("Person", "groups", None);
        assert!(config.cached_mapping("Person", "groups").is_some());

        config
            .add_field("Person", FieldDefinition::new("groups", "Group").with_many())
            .unwrap();
        assert!(config.cached_mapping("Person", "groups").is_none());
        assert!(config
            .model_definition("Person")
            .unwrap()
            .field("groups")
            .is_some());
    }

    #[test]
    fn test_add_field_to_missing_model() {
        let config = config();
        let err = config
            .add_field("Missing", FieldDefinition::new("name", "Text"))
            .unwrap_err();
        assert!(matches!(err, DataError::ModelNotFound(_)));
    }

    #[test]
    fn test_register_models_json() {
        let config = config();
        let count = config
            .register_models_json(
                r#"[
                    { "name": "Person", "fields": [{ "name": "id", "type": "Counter", "primary": true }] },
                    { "name": "Order", "fields": [{ "name": "customer", "type": "Person" }] }
                ]"#,
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_attributes_walk_base_chain() {
        let config = config();
        config
            .register_model(
                ModelDefinition::new("Thing")
                    .with_field(FieldDefinition::primary("id", "Counter"))
                    .with_field(FieldDefinition::new("name", "Text")),
            )
            .unwrap();
        config
            .register_model(
                ModelDefinition::new("Person")
                    .with_base("Thing")
                    .with_field(FieldDefinition::new("name", "Text").not_null())
                    .with_field(FieldDefinition::new("email", "Email")),
            )
            .unwrap();

        let attributes = config.attributes_of("Person").unwrap();
        let names: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["name", "email", "id"]);
        assert!(!attributes[0].nullable);
        assert_eq!(config.primary_key_of("Person").unwrap().unwrap().name, "id");
    }

    #[test]
    fn test_inheritance_cycle_detected() {
        let config = config();
        config
            .register_model(ModelDefinition::new("A").with_base("B"))
            .unwrap();
        config
            .register_model(ModelDefinition::new("B").with_base("A"))
            .unwrap();
        assert_eq!(config.attributes_of("A").unwrap_err().code(), "ECONF");
    }

    #[tokio::test]
    async fn test_reset_caches() {
        let config = config();
        config.set_migrated("Person", "1.0");
        config.set_ledger_ready();
        config.reset_caches().await.unwrap();
        assert!(config.migrated_version("Person").is_none());
        assert!(!config.ledger_ready());
    }
}
