//! Function Table
//!
//! Default and calculated values reference functions by name (`"fn:now"`).
//! Functions are registered statically on the configuration; free-form script
//! expressions are never evaluated.
//!
//! Built-in functions:
//!
//! - `now` - current UTC timestamp (RFC 3339)
//! - `today` - current UTC date (`YYYY-MM-DD`)
//! - `newGuid` - random UUID v4
//! - `user` - name of the context user, or null

use crate::services::DataError;
use crate::DataObject;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Arguments passed to a registered function
#[derive(Debug, Clone, Copy)]
pub struct FunctionContext<'a> {
    pub model: &'a str,
    pub field: &'a str,
    pub user: Option<&'a str>,
    pub target: &'a DataObject,
}

/// Registered function
pub type DataFunction =
    Arc<dyn Fn(&FunctionContext<'_>) -> Result<Value, DataError> + Send + Sync>;

/// Name-keyed table of value functions
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, DataFunction>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a registry holding the built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register("now", |_| Ok(Value::String(Utc::now().to_rfc3339())));
        registry.register("today", |_| {
            Ok(Value::String(Utc::now().date_naive().to_string()))
        });
        registry.register("newGuid", |_| Ok(Value::String(Uuid::new_v4().to_string())));
        registry.register("user", |ctx| {
            Ok(ctx
                .user
                .map(|u| Value::String(u.to_string()))
                .unwrap_or(Value::Null))
        });
        registry
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&FunctionContext<'_>) -> Result<Value, DataError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Evaluate a function by name
    pub fn evaluate(&self, name: &str, ctx: &FunctionContext<'_>) -> Result<Value, DataError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| DataError::function_not_found(name))?;
        function(ctx)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(target: &'a DataObject, user: Option<&'a str>) -> FunctionContext<'a> {
        FunctionContext {
            model: "Order",
            field: "createdBy",
            user,
            target,
        }
    }

    #[test]
    fn test_builtins() {
        let registry = FunctionRegistry::new();
        let target = DataObject::new();

        let guid = registry.evaluate("newGuid", &ctx(&target, None)).unwrap();
        assert!(Uuid::parse_str(guid.as_str().unwrap()).is_ok());

        let user = registry.evaluate("user", &ctx(&target, Some("alice"))).unwrap();
        assert_eq!(user, json!("alice"));
        assert_eq!(
            registry.evaluate("user", &ctx(&target, None)).unwrap(),
            Value::Null
        );

        let now = registry.evaluate("now", &ctx(&target, None)).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(now.as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_custom_function_reads_target() {
        let mut registry = FunctionRegistry::new();
        registry.register("total", |ctx| {
            let price = ctx.target.get("price").and_then(Value::as_f64).unwrap_or(0.0);
            let quantity = ctx.target.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!(price * quantity))
        });

        let target = json!({ "price": 2.5, "quantity": 4 })
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(
            registry.evaluate("total", &ctx(&target, None)).unwrap(),
            json!(10.0)
        );
    }

    #[test]
    fn test_unknown_function() {
        let registry = FunctionRegistry::new();
        let target = DataObject::new();
        let err = registry.evaluate("missing", &ctx(&target, None)).unwrap_err();
        assert_eq!(err.code(), "EFUNC");
    }
}
