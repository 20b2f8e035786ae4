//! Event Channels
//!
//! Each bound model exposes six named channels (`before.save`, `after.save`,
//! `before.remove`, `after.remove`, `before.execute`, `after.execute`). A
//! channel keeps its listeners sorted by priority; listeners of equal priority
//! run in registration order. One-shot listeners (`once`) take part in exactly
//! one emission and are dropped when it starts.

use crate::events::{DataEventArgs, DataEventListener};
use crate::services::DataError;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Priority of user-configured listeners
pub const USER_PRIORITY: i32 = 100;

/// Priority of one-shot listeners appended after every other listener
pub const ONCE_PRIORITY: i32 = 1000;

/// Named event of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataEventKind {
    BeforeSave,
    AfterSave,
    BeforeRemove,
    AfterRemove,
    BeforeExecute,
    AfterExecute,
}

impl DataEventKind {
    pub const ALL: [DataEventKind; 6] = [
        Self::BeforeSave,
        Self::AfterSave,
        Self::BeforeRemove,
        Self::AfterRemove,
        Self::BeforeExecute,
        Self::AfterExecute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeSave => "before.save",
            Self::AfterSave => "after.save",
            Self::BeforeRemove => "before.remove",
            Self::AfterRemove => "after.remove",
            Self::BeforeExecute => "before.execute",
            Self::AfterExecute => "after.execute",
        }
    }
}

#[derive(Clone)]
struct ListenerEntry {
    listener: Arc<dyn DataEventListener>,
    priority: i32,
    once: bool,
}

/// Ordered listener chain of one event
pub struct EventChannel {
    kind: DataEventKind,
    entries: Mutex<Vec<ListenerEntry>>,
}

impl EventChannel {
    pub fn new(kind: DataEventKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> DataEventKind {
        self.kind
    }

    /// Register a listener at `priority` (lower runs first)
    pub fn on(&self, listener: Arc<dyn DataEventListener>, priority: i32) {
        self.insert(ListenerEntry {
            listener,
            priority,
            once: false,
        });
    }

    /// Register a listener for the next emission only
    pub fn once(&self, listener: Arc<dyn DataEventListener>, priority: i32) {
        self.insert(ListenerEntry {
            listener,
            priority,
            once: true,
        });
    }

    fn insert(&self, entry: ListenerEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let position = entries
            .iter()
            .position(|e| e.priority > entry.priority)
            .unwrap_or(entries.len());
        entries.insert(position, entry);
    }

    pub fn has_listeners(&self) -> bool {
        !self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Names of the registered listeners in execution order
    pub fn listener_names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.listener.name().to_string())
            .collect()
    }

    /// Run every listener in series, stopping at the first error
    pub async fn emit(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let snapshot: Vec<ListenerEntry> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let snapshot = entries.clone();
            entries.retain(|e| !e.once);
            snapshot
        };

        for entry in snapshot {
            debug!(
                "{} {} -> {}",
                args.model.name(),
                self.kind.as_str(),
                entry.listener.name()
            );
            let listener = entry.listener.as_ref();
            let outcome = match self.kind {
                DataEventKind::BeforeSave => listener.before_save(args).await,
                DataEventKind::AfterSave => listener.after_save(args).await,
                DataEventKind::BeforeRemove => listener.before_remove(args).await,
                DataEventKind::AfterRemove => listener.after_remove(args).await,
                DataEventKind::BeforeExecute => listener.before_execute(args).await,
                DataEventKind::AfterExecute => listener.after_execute(args).await,
            };
            if let Err(err) = outcome {
                debug!(
                    "{} {} aborted by {}: {}",
                    args.model.name(),
                    self.kind.as_str(),
                    entry.listener.name(),
                    err
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

/// The six channels of a bound model
pub struct ModelEvents {
    channels: [EventChannel; 6],
}

impl Default for ModelEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelEvents {
    pub fn new() -> Self {
        Self {
            channels: DataEventKind::ALL.map(EventChannel::new),
        }
    }

    pub fn channel(&self, kind: DataEventKind) -> &EventChannel {
        &self.channels[kind as usize]
    }

    /// Register a listener on several channels at once
    pub fn subscribe(
        &self,
        kinds: &[DataEventKind],
        listener: Arc<dyn DataEventListener>,
        priority: i32,
    ) {
        for kind in kinds {
            self.channel(*kind).on(Arc::clone(&listener), priority);
        }
    }

    pub async fn emit(
        &self,
        kind: DataEventKind,
        args: &mut DataEventArgs,
    ) -> Result<(), DataError> {
        self.channel(kind).emit(args).await
    }
}
