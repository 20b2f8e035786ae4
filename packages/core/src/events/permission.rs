//! Permission gate
//!
//! Consults the context's `PermissionEvaluator` before save, remove and query
//! execution. Unattended contexts and contexts without an evaluator pass.

use crate::events::{DataEventArgs, DataEventListener, EventSource};
use crate::services::{
    denial_status, DataError, PermissionDecision, PermissionMode, PermissionRequest,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

pub struct PermissionListener;

impl PermissionListener {
    async fn check(args: &mut DataEventArgs) -> Result<(), DataError> {
        let context = args.model.context();
        if context.is_unattended() {
            return Ok(());
        }
        let Some(evaluator) = context.permissions() else {
            return Ok(());
        };

        let target = match args.source {
            EventSource::Save | EventSource::Remove => Some(&args.target),
            EventSource::Execute | EventSource::Count => None,
        };
        let request = PermissionRequest {
            model: args.model.name(),
            state: args.state,
            user: context.user(),
            target,
        };
        if evaluator.evaluate(&request).await? == PermissionDecision::Allow {
            return Ok(());
        }

        let mode = context.configuration().settings().permission_mode;
        debug!(
            "Permission denied: {} {} ({:?} mode)",
            args.state,
            args.model.name(),
            mode
        );
        match (mode, args.source) {
            (PermissionMode::Filter, EventSource::Execute) => {
                args.result = Some(json!([]));
                Ok(())
            }
            (PermissionMode::Filter, EventSource::Count) => {
                args.result = Some(json!(0));
                Ok(())
            }
            _ => Err(DataError::permission_denied(
                denial_status(context.user()),
                format!("Access denied: {} on {}", args.state, args.model.name()),
            )),
        }
    }
}

#[async_trait]
impl DataEventListener for PermissionListener {
    fn name(&self) -> &str {
        "PermissionListener"
    }

    async fn before_save(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        Self::check(args).await
    }

    async fn before_remove(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        Self::check(args).await
    }

    async fn before_execute(&self, args: &mut DataEventArgs) -> Result<(), DataError> {
        Self::check(args).await
    }
}
