//! Data Context
//!
//! A context binds a shared `DataConfiguration` to a storage adapter and to the
//! identity of the caller. Contexts are cheap to clone; models obtained from
//! a context carry a clone of it.

use crate::db::DataAdapter;
use crate::services::{DataConfiguration, DataError, DataModel, PermissionEvaluator};
use std::sync::Arc;

#[derive(Clone)]
pub struct DataContext {
    configuration: Arc<DataConfiguration>,
    adapter: Arc<dyn DataAdapter>,
    user: Option<String>,
    permissions: Option<Arc<dyn PermissionEvaluator>>,
    unattended: bool,
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("user", &self.user)
            .field("unattended", &self.unattended)
            .field("has_permissions", &self.permissions.is_some())
            .finish()
    }
}

impl DataContext {
    pub fn new(configuration: Arc<DataConfiguration>, adapter: Arc<dyn DataAdapter>) -> Self {
        Self {
            configuration,
            adapter,
            user: None,
            permissions: None,
            unattended: false,
        }
    }

    /// Identify the caller
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Gate operations through a permission evaluator
    pub fn with_permissions(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.permissions = Some(evaluator);
        self
    }

    /// Copy of this context that bypasses the permission gate
    ///
    /// Used for internal lookups (state inference, unique checks, seeding).
    pub fn elevated(&self) -> Self {
        Self {
            unattended: true,
            ..self.clone()
        }
    }

    pub fn is_unattended(&self) -> bool {
        self.unattended
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn configuration(&self) -> &Arc<DataConfiguration> {
        &self.configuration
    }

    pub fn adapter(&self) -> &dyn DataAdapter {
        self.adapter.as_ref()
    }

    pub fn permissions(&self) -> Option<&Arc<dyn PermissionEvaluator>> {
        self.permissions.as_ref()
    }

    /// Bind a model of the configuration to this context
    pub fn model(&self, name: &str) -> Result<DataModel, DataError> {
        let definition = self
            .configuration
            .model_definition(name)
            .ok_or_else(|| DataError::model_not_found(name))?;
        DataModel::new(self.clone(), definition)
    }
}
