//! In-Memory Data Adapter
//!
//! `MemoryAdapter` is the reference implementation of [`DataAdapter`]. It keeps
//! tables, views and identity counters in process memory and evaluates query
//! expressions directly, which makes it the adapter of the test-suite and of
//! embedders that need a zero-dependency store.
//!
//! # Features
//!
//! - Tables with column metadata created and altered through `migrate`
//! - Auto-increment identities, read back through `last_identity` or
//!   pre-allocated through `select_identity` (opt-in)
//! - Views stored as query expressions and evaluated on read
//! - Snapshot transactions: `rollback` restores the state captured by `begin`
//! - A statement log and a migrate-call counter for assertions in tests

use crate::db::evaluator::{self, RowSource};
use crate::db::{ColumnDefinition, DataAdapter, DatabaseError, SchemaDiff, Statement};
use crate::query::QueryExpression;
use crate::DataObject;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<ColumnDefinition>,
    rows: Vec<DataObject>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Transactional part of the adapter state
#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
    views: HashMap<String, QueryExpression>,
    identities: HashMap<String, i64>,
}

impl RowSource for MemoryState {
    fn rows(&self, entity: &str) -> Result<Vec<DataObject>, DatabaseError> {
        if let Some(table) = self.tables.get(entity) {
            return Ok(table.rows.clone());
        }
        if let Some(view) = self.views.get(entity) {
            return evaluator::evaluate_query(view, self);
        }
        Err(DatabaseError::entity_not_found(entity))
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: MemoryState,
    snapshot: Option<MemoryState>,
    last_identity: Option<Value>,
    statements: Vec<Statement>,
    migrate_calls: usize,
}

/// In-memory implementation of [`DataAdapter`]
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    inner: Mutex<Inner>,
    preallocate_identities: bool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter that hands out identities before insert through `select_identity`
    pub fn with_identity_preallocation() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            preallocate_identities: true,
        }
    }

    /// Stored rows of a table, in insertion order
    pub async fn rows(&self, entity: &str) -> Result<Vec<DataObject>, DatabaseError> {
        let inner = self.inner.lock().await;
        inner
            .state
            .tables
            .get(entity)
            .map(|t| t.rows.clone())
            .ok_or_else(|| DatabaseError::entity_not_found(entity))
    }

    pub async fn has_table(&self, entity: &str) -> bool {
        self.inner.lock().await.state.tables.contains_key(entity)
    }

    pub async fn has_view(&self, entity: &str) -> bool {
        self.inner.lock().await.state.views.contains_key(entity)
    }

    /// Every statement executed so far
    pub async fn statements(&self) -> Vec<Statement> {
        self.inner.lock().await.statements.clone()
    }

    pub async fn clear_statements(&self) {
        self.inner.lock().await.statements.clear();
    }

    /// Number of `migrate` calls received
    pub async fn migrate_calls(&self) -> usize {
        self.inner.lock().await.migrate_calls
    }

    fn next_identity(state: &mut MemoryState, entity: &str) -> i64 {
        let counter = state.identities.entry(entity.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn insert(
        inner: &mut Inner,
        entity: &str,
        values: &DataObject,
    ) -> Result<(), DatabaseError> {
        let table = inner
            .state
            .tables
            .get(entity)
            .ok_or_else(|| DatabaseError::entity_not_found(entity))?;

        if let Some(unknown) = values.keys().find(|k| table.column(k).is_none()) {
            return Err(DatabaseError::statement_failed(format!(
                "Table '{}' has no column '{}'",
                entity, unknown
            )));
        }

        let columns = table.columns.clone();
        let mut row = DataObject::new();
        let mut generated = None;
        for column in &columns {
            let mut value = values.get(&column.name).cloned().unwrap_or(Value::Null);
            if column.auto_increment {
                if value.is_null() {
                    let id = Self::next_identity(&mut inner.state, entity);
                    value = Value::from(id);
                    generated = Some(value.clone());
                } else if let Some(explicit) = value.as_i64() {
                    let counter = inner.state.identities.entry(entity.to_string()).or_insert(0);
                    *counter = (*counter).max(explicit);
                }
            }
            if value.is_null() && !column.nullable {
                return Err(DatabaseError::statement_failed(format!(
                    "Column '{}.{}' cannot be null",
                    entity, column.name
                )));
            }
            row.insert(column.name.clone(), value);
        }

        let table = inner
            .state
            .tables
            .get_mut(entity)
            .ok_or_else(|| DatabaseError::entity_not_found(entity))?;
        for primary in columns.iter().filter(|c| c.primary) {
            let key = row.get(&primary.name).cloned().unwrap_or(Value::Null);
            let duplicate = !key.is_null()
                && table.rows.iter().any(|existing| {
                    existing
                        .get(&primary.name)
                        .map(|v| evaluator::values_equal(v, &key))
                        .unwrap_or(false)
                });
            if duplicate {
                return Err(DatabaseError::statement_failed(format!(
                    "Duplicate key {} in '{}'",
                    key, entity
                )));
            }
        }
        table.rows.push(row);

        if generated.is_some() {
            inner.last_identity = generated;
        }
        Ok(())
    }

    fn apply(inner: &mut Inner, statement: &Statement) -> Result<Vec<DataObject>, DatabaseError> {
        match statement {
            Statement::Select(query) => evaluator::evaluate_query(query, &inner.state),
            Statement::Count(query) => {
                let total = evaluator::evaluate_count(query, &inner.state)?;
                let mut row = DataObject::new();
                row.insert("total".to_string(), Value::from(total));
                Ok(vec![row])
            }
            Statement::Insert { entity, values } => {
                Self::insert(inner, entity, values)?;
                Ok(Vec::new())
            }
            Statement::Update {
                entity,
                values,
                filter,
            } => {
                let table = inner
                    .state
                    .tables
                    .get_mut(entity)
                    .ok_or_else(|| DatabaseError::entity_not_found(entity))?;
                if let Some(unknown) = values.keys().find(|k| table.column(k).is_none()) {
                    return Err(DatabaseError::statement_failed(format!(
                        "Table '{}' has no column '{}'",
                        entity, unknown
                    )));
                }
                for row in table
                    .rows
                    .iter_mut()
                    .filter(|row| evaluator::row_matches(filter, row, entity))
                {
                    for (key, value) in values {
                        row.insert(key.clone(), value.clone());
                    }
                }
                Ok(Vec::new())
            }
            Statement::Delete { entity, filter } => {
                let table = inner
                    .state
                    .tables
                    .get_mut(entity)
                    .ok_or_else(|| DatabaseError::entity_not_found(entity))?;
                table
                    .rows
                    .retain(|row| !evaluator::row_matches(filter, row, entity));
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl DataAdapter for MemoryAdapter {
    async fn execute(&self, statement: &Statement) -> Result<Vec<DataObject>, DatabaseError> {
        let mut inner = self.inner.lock().await;
        debug!("MemoryAdapter: {}", statement);
        inner.statements.push(statement.clone());
        Self::apply(&mut inner, statement)
    }

    async fn begin_transaction(&self) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if inner.snapshot.is_some() {
            return Err(DatabaseError::transaction_failed(
                "A transaction is already open",
            ));
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        inner
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| DatabaseError::transaction_failed("No open transaction to commit"))
    }

    async fn rollback(&self) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        let snapshot = inner
            .snapshot
            .take()
            .ok_or_else(|| DatabaseError::transaction_failed("No open transaction to roll back"))?;
        inner.state = snapshot;
        debug!("MemoryAdapter: transaction rolled back");
        Ok(())
    }

    async fn in_transaction(&self) -> bool {
        self.inner.lock().await.snapshot.is_some()
    }

    async fn select_identity(
        &self,
        entity: &str,
        _attribute: &str,
    ) -> Result<Option<Value>, DatabaseError> {
        if !self.preallocate_identities {
            return Ok(None);
        }
        let mut inner = self.inner.lock().await;
        if !inner.state.tables.contains_key(entity) {
            return Err(DatabaseError::entity_not_found(entity));
        }
        let id = Self::next_identity(&mut inner.state, entity);
        Ok(Some(Value::from(id)))
    }

    async fn last_identity(&self) -> Result<Option<Value>, DatabaseError> {
        Ok(self.inner.lock().await.last_identity.clone())
    }

    async fn table_columns(
        &self,
        entity: &str,
    ) -> Result<Option<Vec<ColumnDefinition>>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner.state.tables.get(entity).map(|t| t.columns.clone()))
    }

    async fn migrate(&self, diff: &SchemaDiff) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        inner.migrate_calls += 1;
        debug!(
            "MemoryAdapter: migrate {} ({} add, {} change)",
            diff.applies_to,
            diff.add.len(),
            diff.change.len()
        );

        if inner.state.views.contains_key(&diff.applies_to) {
            return Err(DatabaseError::schema_conflict(
                &diff.applies_to,
                "a view with this name exists",
            ));
        }

        let table = inner
            .state
            .tables
            .entry(diff.applies_to.clone())
            .or_default();

        for column in &diff.add {
            if table.column(&column.name).is_some() {
                return Err(DatabaseError::schema_conflict(
                    &diff.applies_to,
                    format!("column '{}' already exists", column.name),
                ));
            }
            table.columns.push(column.clone());
            for row in table.rows.iter_mut() {
                row.insert(column.name.clone(), Value::Null);
            }
        }

        for column in &diff.change {
            let existing = table
                .columns
                .iter_mut()
                .find(|c| c.name == column.name)
                .ok_or_else(|| {
                    DatabaseError::schema_conflict(
                        &diff.applies_to,
                        format!("column '{}' does not exist", column.name),
                    )
                })?;
            *existing = column.clone();
        }

        Ok(())
    }

    async fn create_view(
        &self,
        name: &str,
        query: &QueryExpression,
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if inner.state.tables.contains_key(name) {
            return Err(DatabaseError::schema_conflict(
                name,
                "a table with this name exists",
            ));
        }
        inner.state.views.insert(name.to_string(), query.clone());
        debug!("MemoryAdapter: view {} created", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::execute_in_transaction;
    use crate::query::{Predicate, QueryField};
    use futures::FutureExt;
    use serde_json::json;

    fn obj(value: Value) -> DataObject {
        value.as_object().cloned().unwrap()
    }

    async fn create_person_table(adapter: &MemoryAdapter) {
        let mut diff = SchemaDiff::new("Person", "Person", "1.0");
        let mut id = ColumnDefinition::new("id", "Integer");
        id.primary = true;
        id.nullable = false;
        id.auto_increment = true;
        diff.add.push(id);
        diff.add.push(ColumnDefinition::new("name", "Text"));
        adapter.migrate(&diff).await.unwrap();
    }

    fn insert_person(name: &str) -> Statement {
        Statement::Insert {
            entity: "Person".to_string(),
            values: obj(json!({ "name": name })),
        }
    }

    #[tokio::test]
    async fn test_insert_generates_identity() {
        let adapter = MemoryAdapter::new();
        create_person_table(&adapter).await;

        adapter.execute(&insert_person("Jane")).await.unwrap();
        adapter.execute(&insert_person("John")).await.unwrap();

        assert_eq!(adapter.last_identity().await.unwrap(), Some(json!(2)));
        let rows = adapter.rows("Person").await.unwrap();
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[1]["name"], "John");
    }

    #[tokio::test]
    async fn test_preallocated_identity() {
        let adapter = MemoryAdapter::with_identity_preallocation();
        create_person_table(&adapter).await;

        let id = adapter.select_identity("Person", "id").await.unwrap();
        assert_eq!(id, Some(json!(1)));

        adapter
            .execute(&Statement::Insert {
                entity: "Person".to_string(),
                values: obj(json!({ "id": 1, "name": "Jane" })),
            })
            .await
            .unwrap();
        adapter.execute(&insert_person("John")).await.unwrap();
        assert_eq!(adapter.last_identity().await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let adapter = MemoryAdapter::new();
        create_person_table(&adapter).await;
        let result = adapter
            .execute(&Statement::Insert {
                entity: "Person".to_string(),
                values: obj(json!({ "nickname": "JJ" })),
            })
            .await;
        assert!(matches!(result, Err(DatabaseError::StatementFailed { .. })));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let adapter = MemoryAdapter::new();
        create_person_table(&adapter).await;
        adapter.execute(&insert_person("Jane")).await.unwrap();
        adapter.execute(&insert_person("John")).await.unwrap();

        adapter
            .execute(&Statement::Update {
                entity: "Person".to_string(),
                values: obj(json!({ "name": "Janet" })),
                filter: Predicate::equal(QueryField::new("id"), json!(1)),
            })
            .await
            .unwrap();
        adapter
            .execute(&Statement::Delete {
                entity: "Person".to_string(),
                filter: Predicate::equal(QueryField::new("id"), json!(2)),
            })
            .await
            .unwrap();

        let rows = adapter.rows("Person").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Janet");
    }

    #[tokio::test]
    async fn test_transaction_rollback_restores_state() {
        let adapter = MemoryAdapter::new();
        create_person_table(&adapter).await;
        adapter.execute(&insert_person("Jane")).await.unwrap();

        let result: Result<(), DatabaseError> = execute_in_transaction(&adapter, || {
            async {
                adapter.execute(&insert_person("John")).await?;
                Err(DatabaseError::statement_failed("boom"))
            }
            .boxed()
        })
        .await;

        assert!(result.is_err());
        assert!(!adapter.in_transaction().await);
        assert_eq!(adapter.rows("Person").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_and_views() {
        let adapter = MemoryAdapter::new();
        create_person_table(&adapter).await;
        adapter.execute(&insert_person("Jane")).await.unwrap();
        adapter.execute(&insert_person("John")).await.unwrap();

        let mut view = QueryExpression::new("Person");
        view.and_where(Predicate::compare(
            QueryField::new("name"),
            crate::query::ComparisonOperator::StartsWith,
            json!("Ja"),
        ));
        adapter.create_view("JPeople", &view).await.unwrap();

        let rows = adapter
            .execute(&Statement::Count(QueryExpression::new("JPeople")))
            .await
            .unwrap();
        assert_eq!(rows[0]["total"], 1);
        assert!(adapter.table_columns("JPeople").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migrate_add_to_existing_table() {
        let adapter = MemoryAdapter::new();
        create_person_table(&adapter).await;
        adapter.execute(&insert_person("Jane")).await.unwrap();

        let mut diff = SchemaDiff::new("Person", "Person", "1.1");
        diff.add.push(ColumnDefinition::new("email", "Email"));
        adapter.migrate(&diff).await.unwrap();

        let rows = adapter.rows("Person").await.unwrap();
        assert_eq!(rows[0]["email"], Value::Null);
        assert_eq!(adapter.migrate_calls().await, 2);

        let result = adapter.migrate(&diff).await;
        assert!(matches!(result, Err(DatabaseError::SchemaConflict { .. })));
    }
}
