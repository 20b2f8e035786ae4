//! Query result caching for models declared with `caching: "always"`
//!
//! Keys are `/<Model>/<json of query, expansions and user>` so that every key
//! of a model can be dropped with one prefix removal.

use crate::events::{DataEventArgs, DataEventListener, EventSource};
use crate::services::DataError;
use async_trait::async_trait;
use tracing::{debug, warn};

fn model_prefix(model: &str) -> String {
    format!("/{}/", model)
}

fn cache_key(args: &DataEventArgs) -> Option<String> {
    if args.source != EventSource::Execute {
        return None;
    }
    let query = args.query.as_ref()?;
    let user = args.model.context().user();
    match serde_json::to_string(&(query, &args.expand, user)) {
        Ok(body) => Some(format!("{}{}", model_prefix(args.model.name()), body)),
        Err(e) => {
            warn!("Query of {} is not cacheable: {}", args.model.name(), e);
            None
        }
    }
}

/// Serves query results from the data cache and stores fresh ones
pub struct DataCachingListener;

#[async_trait]
impl DataEventListener for DataCachingListener {
    fn name(&self) -> &str {
        "DataCachingListener"
    }

    async fn before_execute(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        if args.result.is_some() {
            return Ok(());
        }
        let Some(key) = cache_key(args) else {
            return Ok(());
        };
        let cache = args.model.context().configuration().cache();
        if let Some(hit) = cache.get(&key).await {
            debug!("Cache hit for {}", key);
            args.result = Some(hit);
        }
        Ok(())
    }

    async fn after_execute(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        let (Some(key), Some(result)) = (cache_key(args), args.result.as_ref()) else {
            return Ok(());
        };
        let cache = args.model.context().configuration().cache();
        if let Err(e) = cache.set(&key, result.clone(), None).await {
            warn!("Failed to cache query result of {}: {}", args.model.name(), e);
        }
        Ok(())
    }
}

/// Drops every cached query of a model after it changes
pub struct CacheInvalidationListener;

impl CacheInvalidationListener {
    async fn invalidate(args: &DataEventArgs) {
        let cache = args.model.context().configuration().cache();
        match cache.remove_prefix(&model_prefix(args.model.name())).await {
            Ok(removed) => debug!("Invalidated {} cached queries of {}", removed, args.model.name()),
            Err(e) => warn!("Cache invalidation failed for {}: {}", args.model.name(), e),
        }
    }
}

#[async_trait]
impl DataEventListener for CacheInvalidationListener {
    fn name(&self) -> &str {
        "CacheInvalidationListener"
    }

    async fn after_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        Self::invalidate(args).await;
        Ok(())
    }

    async fn after_remove(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        Self::invalidate(args).await;
        Ok(())
    }
}
