//! DataAdapter Trait - Database Abstraction Layer
//!
//! This module defines the `DataAdapter` trait through which the persistence
//! core reaches storage. The core never builds SQL; it hands the adapter
//! abstract `Statement`s (query expressions, inserts, updates, deletes) and
//! schema diffs, and the adapter translates them for its backend.
//!
//! # Architecture
//!
//! - **Abstraction Point**: Between `DataModel` (business logic) and the storage backend
//! - **Statement Form**: Adapter-independent `QueryExpression` / `Predicate` trees
//! - **Transactions**: Explicit begin/commit/rollback plus the
//!   [`execute_in_transaction`] helper, which joins an already open transaction
//! - **Identities**: Optional pre-allocation (`select_identity`) with a
//!   post-insert fallback (`last_identity`)
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All I/O methods are async so network and embedded
//!    backends share one surface
//! 2. **Borrowed Statements**: Statements are passed by reference; the core
//!    keeps them for logging and error context
//! 3. **Optional Capabilities**: Introspection and identity pre-allocation
//!    return `Ok(None)` when a backend cannot provide them

use crate::db::DatabaseError;
use crate::query::{Predicate, QueryExpression};
use crate::DataObject;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Single statement handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read rows; result rows are keyed by output names
    Select(QueryExpression),
    /// Count rows matching the expression; returns `[{"total": n}]`
    Count(QueryExpression),
    Insert {
        entity: String,
        values: DataObject,
    },
    Update {
        entity: String,
        values: DataObject,
        filter: Predicate,
    },
    Delete {
        entity: String,
        filter: Predicate,
    },
}

impl Statement {
    /// Entity (table or view) the statement targets
    pub fn entity(&self) -> &str {
        match self {
            Statement::Select(query) | Statement::Count(query) => &query.entity,
            Statement::Insert { entity, .. }
            | Statement::Update { entity, .. }
            | Statement::Delete { entity, .. } => entity,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. }
        )
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(query) => write!(f, "SELECT {}", query.entity),
            Statement::Count(query) => write!(f, "COUNT {}", query.entity),
            Statement::Insert { entity, .. } => write!(f, "INSERT {}", entity),
            Statement::Update { entity, .. } => write!(f, "UPDATE {}", entity),
            Statement::Delete { entity, .. } => write!(f, "DELETE {}", entity),
        }
    }
}

/// Physical column description used by introspection and schema diffs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub auto_increment: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            primary: false,
            auto_increment: false,
        }
    }

    /// Whether two definitions of the same column differ in storage shape
    pub fn differs_from(&self, other: &ColumnDefinition) -> bool {
        self.type_name != other.type_name || self.nullable != other.nullable
    }
}

/// Schema change for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    /// Table the diff applies to
    pub applies_to: String,
    /// Model that owns the table
    pub model: String,
    pub version: String,
    #[serde(default)]
    pub add: Vec<ColumnDefinition>,
    #[serde(default)]
    pub change: Vec<ColumnDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaDiff {
    pub fn new(
        applies_to: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            applies_to: applies_to.into(),
            model: model.into(),
            version: version.into(),
            add: Vec::new(),
            change: Vec::new(),
            description: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.change.is_empty()
    }
}

/// Storage capability consumed by the persistence core
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one adapter instance is shared by
/// every `DataContext` cloned from the same root. The core issues statements
/// strictly in series and never runs two statements of one operation at the
/// same time.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    //
    // LIFECYCLE
    //

    async fn open(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    //
    // STATEMENTS
    //

    /// Execute a single statement
    ///
    /// Select statements return rows keyed by output name; write statements
    /// return an empty vector; count statements return one `{"total": n}` row.
    async fn execute(&self, statement: &Statement) -> Result<Vec<DataObject>, DatabaseError>;

    /// Execute statements in order, stopping at the first failure
    async fn execute_batch(&self, statements: &[Statement]) -> Result<(), DatabaseError> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }

    //
    // TRANSACTIONS
    //

    async fn begin_transaction(&self) -> Result<(), DatabaseError>;

    async fn commit(&self) -> Result<(), DatabaseError>;

    async fn rollback(&self) -> Result<(), DatabaseError>;

    async fn in_transaction(&self) -> bool;

    //
    // IDENTITIES
    //

    /// Pre-allocate the next identity value of `entity.attribute`
    ///
    /// `Ok(None)` means the adapter generates identities on insert and the
    /// caller must read [`DataAdapter::last_identity`] afterwards.
    async fn select_identity(
        &self,
        _entity: &str,
        _attribute: &str,
    ) -> Result<Option<Value>, DatabaseError> {
        Ok(None)
    }

    /// Identity generated by the most recent insert
    async fn last_identity(&self) -> Result<Option<Value>, DatabaseError>;

    //
    // SCHEMA
    //

    /// Existing columns of `entity`, or `None` if the table does not exist
    async fn table_columns(
        &self,
        entity: &str,
    ) -> Result<Option<Vec<ColumnDefinition>>, DatabaseError>;

    /// Create the table of `diff.applies_to` or apply column additions/changes
    async fn migrate(&self, diff: &SchemaDiff) -> Result<(), DatabaseError>;

    /// Create or replace a view defined by a query expression
    async fn create_view(&self, name: &str, query: &QueryExpression)
        -> Result<(), DatabaseError>;
}

/// Run `work` inside a transaction of `adapter`
///
/// Joins the current transaction when one is already open (nested batch
/// operations), otherwise begins one, commits on success and rolls back on
/// failure. The error of `work` wins over a rollback error.
pub async fn execute_in_transaction<'a, T, E, F>(
    adapter: &'a dyn DataAdapter,
    work: F,
) -> Result<T, E>
where
    F: FnOnce() -> BoxFuture<'a, Result<T, E>>,
    E: From<DatabaseError>,
{
    if adapter.in_transaction().await {
        return work().await;
    }

    adapter.begin_transaction().await?;
    match work().await {
        Ok(value) => {
            adapter.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = adapter.rollback().await {
                tracing::warn!("Rollback failed after aborted transaction: {}", rollback_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_entity_and_display() {
        let statement = Statement::Delete {
            entity: "Person".to_string(),
            filter: Predicate::equal(crate::query::QueryField::new("id"), Value::from(1)),
        };
        assert_eq!(statement.entity(), "Person");
        assert!(statement.is_write());
        assert_eq!(statement.to_string(), "DELETE Person");

        let statement = Statement::Select(QueryExpression::new("Order"));
        assert!(!statement.is_write());
        assert_eq!(statement.to_string(), "SELECT Order");
    }

    #[test]
    fn test_column_differs() {
        let a = ColumnDefinition::new("name", "Text");
        let mut b = a.clone();
        assert!(!a.differs_from(&b));
        b.nullable = false;
        assert!(a.differs_from(&b));
    }

    #[test]
    fn test_schema_diff_serialization() {
        let mut diff = SchemaDiff::new("PersonSkills", "Person", "1.0");
        assert!(diff.is_empty());
        diff.add.push(ColumnDefinition::new("value", "Text"));

        let value = serde_json::to_value(&diff).unwrap();
        assert_eq!(value["appliesTo"], "PersonSkills");
        assert_eq!(value["add"][0]["type"], "Text");
        assert_eq!(value["add"][0]["nullable"], true);
    }
}
