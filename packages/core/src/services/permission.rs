//! Permission Gate
//!
//! Authorization is an external collaborator. The core consumes it through the
//! `PermissionEvaluator` trait and gates before.save, before.remove and
//! before.execute with it. How a denial surfaces depends on `PermissionMode`:
//!
//! - `Assert` - the operation fails with `EACCESS`
//! - `Filter` - a denied query yields an empty result; writes still fail
//!
//! Elevated (unattended) contexts bypass the gate.

use crate::models::DataObjectState;
use crate::services::DataError;
use crate::DataObject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How a permission denial is surfaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    #[default]
    Assert,
    Filter,
}

/// Outcome of a permission evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// Operation submitted to the evaluator
#[derive(Debug, Clone, Copy)]
pub struct PermissionRequest<'a> {
    pub model: &'a str,
    pub state: DataObjectState,
    pub user: Option<&'a str>,
    /// Object being written (`None` for queries)
    pub target: Option<&'a DataObject>,
}

/// External authorization capability
#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        request: &PermissionRequest<'_>,
    ) -> Result<PermissionDecision, DataError>;
}

/// Status marker of a denial: 401 for anonymous callers, 403 otherwise
pub fn denial_status(user: Option<&str>) -> u16 {
    if user.is_some() {
        403
    } else {
        401
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_status() {
        assert_eq!(denial_status(None), 401);
        assert_eq!(denial_status(Some("alice")), 403);
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(
            serde_json::to_value(PermissionMode::Filter).unwrap(),
            serde_json::json!("filter")
        );
    }
}
