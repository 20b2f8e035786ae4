//! Event Pipeline
//!
//! Every bound model owns six listener channels. Built-in listeners are
//! registered at fixed priorities ahead of user-configured ones:
//!
//! | priority | listener                    | channels                              |
//! |----------|-----------------------------|---------------------------------------|
//! | 10       | `StateValidator`            | before.save, before.remove            |
//! | 20       | `DefaultValueListener`      | before.save                           |
//! | 30       | `CalculatedValueListener`   | before.save                           |
//! | 40       | `PermissionListener`        | before.save/remove/execute            |
//! | 50       | `DataCachingListener`       | before/after.execute (caching models) |
//! | 60       | `CacheInvalidationListener` | after.save/remove (caching models)    |
//! | 100      | configured listeners        | all                                   |
//! | 1000     | one-shot not-null/unique validators, write-back, cascade | per call |

mod caching;
mod channel;
mod listener;
mod permission;
mod validators;
mod values;

pub use caching::{CacheInvalidationListener, DataCachingListener};
pub use channel::{DataEventKind, EventChannel, ModelEvents, ONCE_PRIORITY, USER_PRIORITY};
pub use listener::{DataEventArgs, DataEventListener, EventSource};
pub use permission::PermissionListener;
pub use validators::{NotNullValidator, StateValidator, UniqueConstraintValidator};
pub use values::{CalculatedValueListener, DefaultValueListener};

use crate::models::{CachingMode, ModelDefinition};
use crate::services::{DataConfiguration, DataError};
use std::sync::Arc;

/// Register the built-in and configured listeners of a model
pub(crate) fn register_model_listeners(
    events: &ModelEvents,
    definition: &ModelDefinition,
    configuration: &DataConfiguration,
) -> Result<(), DataError> {
    use DataEventKind::*;

    events.subscribe(&[BeforeSave, BeforeRemove], Arc::new(StateValidator), 10);
    events.subscribe(&[BeforeSave], Arc::new(DefaultValueListener), 20);
    events.subscribe(&[BeforeSave], Arc::new(CalculatedValueListener), 30);
    events.subscribe(
        &[BeforeSave, BeforeRemove, BeforeExecute],
        Arc::new(PermissionListener),
        40,
    );
    if definition.caching == CachingMode::Always {
        events.subscribe(&[BeforeExecute, AfterExecute], Arc::new(DataCachingListener), 50);
        events.subscribe(&[AfterSave, AfterRemove], Arc::new(CacheInvalidationListener), 60);
    }

    for reference in &definition.event_listeners {
        let listener = configuration
            .listener(&reference.listener_type)
            .ok_or_else(|| {
                DataError::configuration(format!(
                    "Listener type '{}' of model {} is not registered",
                    reference.listener_type, definition.name
                ))
            })?;
        events.subscribe(&DataEventKind::ALL, listener, USER_PRIORITY);
    }
    Ok(())
}
