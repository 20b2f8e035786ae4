//! Schema Migration
//!
//! `DataModel::migrate` brings the storage of a model in line with its
//! definition. Migration is incremental and idempotent:
//!
//! - a model whose version is already recorded for this process returns
//!   immediately without touching the adapter
//! - applied versions are recorded in a ledger entity (`migrations` by
//!   default); a ledger row for the model table and version skips the schema
//!   step entirely
//! - otherwise the table columns are diffed against the adapter's
//!   introspection and only additions and changes are sent to the adapter
//!
//! Base models and associated models (including junction tables) are migrated
//! before the model itself. Seed objects are inserted when the table is empty
//! after its first migration.

use crate::association::ensure_junction_model;
use crate::db::{ColumnDefinition, SchemaDiff, Statement};
use crate::models::{
    field_types, AssociationMapping, AssociationRole, FieldDefinition, STATE_ATTRIBUTE,
};
use crate::query::{JoinDescriptor, JoinKind, Predicate, QueryExpression, QueryField};
use crate::services::{DataError, DataModel};
use crate::DataObject;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};

/// Columns of the migration ledger
fn ledger_columns() -> Vec<ColumnDefinition> {
    let mut id = ColumnDefinition::new("id", field_types::COUNTER);
    id.primary = true;
    id.nullable = false;
    id.auto_increment = true;
    let required = |name: &str| {
        let mut column = ColumnDefinition::new(name, field_types::TEXT);
        column.nullable = false;
        column
    };
    vec![
        id,
        required("appliesTo"),
        required("model"),
        required("version"),
        ColumnDefinition::new("description", field_types::TEXT),
        ColumnDefinition::new("appliedAt", field_types::DATE_TIME),
    ]
}

impl DataModel {
    /// Migrate the model, its base and its associated models
    pub async fn migrate(&self) -> Result<(), DataError> {
        let mut visited = HashSet::new();
        self.elevated().migrate_visiting(&mut visited).await
    }

    fn migrate_visiting<'a>(
        &'a self,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<(), DataError>> {
        async move {
            let definition = self.definition();
            let configuration = self.context().configuration();
            if definition.sealed {
                return Ok(());
            }
            if configuration.migrated_version(self.name()).as_deref()
                == Some(definition.version.as_str())
            {
                return Ok(());
            }
            if !visited.insert(self.name().to_string()) {
                return Ok(());
            }

            if let Some(base) = self.base()? {
                base.migrate_visiting(visited).await?;
            }
            self.migrate_associated(visited).await?;

            self.ensure_ledger().await?;
            if self.ledger_contains().await? {
                debug!(
                    "{} version {} already applied",
                    self.source_name(),
                    definition.version
                );
                configuration.set_migrated(self.name(), &definition.version);
                return Ok(());
            }

            self.apply_schema().await?;
            if definition.has_distinct_view() {
                self.create_view().await?;
            }
            configuration.set_migrated(self.name(), &definition.version);
            info!(
                "Migrated {} to version {}",
                self.name(),
                definition.version
            );

            self.seed().await
        }
        .boxed()
    }

    /// Migrate models referenced by the model's own association fields
    async fn migrate_associated(&self, visited: &mut HashSet<String>) -> Result<(), DataError> {
        let configuration = self.context().configuration();
        for attribute in &self.definition().fields {
            if attribute.is_primitive() && !attribute.many {
                continue;
            }
            let Some((mapping, role)) = self.mapping_role(&attribute.name)? else {
                continue;
            };
            let other = match (&role, &mapping) {
                (AssociationRole::HasOne, AssociationMapping::Association(fk)) => {
                    fk.parent_model.clone()
                }
                (AssociationRole::HasMany, AssociationMapping::Association(fk)) => {
                    fk.child_model.clone()
                }
                (AssociationRole::ParentJunction, AssociationMapping::Junction(j)) => {
                    ensure_junction_model(self, j).await?;
                    j.parent_model.clone()
                }
                (_, AssociationMapping::Junction(j)) => {
                    ensure_junction_model(self, j).await?;
                    j.child_model.clone()
                }
                _ => continue,
            };
            if other == self.name() || configuration.model_definition(&other).is_none() {
                continue;
            }
            self.related(&other)?.migrate_visiting(visited).await?;
        }
        Ok(())
    }

    /// Create the ledger entity once per configuration
    async fn ensure_ledger(&self) -> Result<(), DataError> {
        let configuration = self.context().configuration();
        if configuration.ledger_ready() {
            return Ok(());
        }
        let entity = &configuration.settings().migration_entity;
        let adapter = self.context().adapter();
        if adapter.table_columns(entity).await?.is_none() {
            let mut diff = SchemaDiff::new(entity, entity, "1.0");
            diff.add = ledger_columns();
            diff.description = Some("Migration ledger".to_string());
            adapter.migrate(&diff).await?;
            debug!("Created migration ledger {}", entity);
        }
        configuration.set_ledger_ready();
        Ok(())
    }

    async fn ledger_contains(&self) -> Result<bool, DataError> {
        let entity = &self.context().configuration().settings().migration_entity;
        let mut query = QueryExpression::new(entity);
        query.and_where(Predicate::equal(
            QueryField::new("appliesTo"),
            Value::from(self.source_name()),
        ));
        query.and_where(Predicate::equal(
            QueryField::new("version"),
            Value::from(self.definition().version.as_str()),
        ));
        let rows = self
            .context()
            .adapter()
            .execute(&Statement::Count(query))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
            > 0)
    }

    /// Physical column of a stored attribute
    fn column_definition(
        &self,
        attribute: &FieldDefinition,
    ) -> Result<ColumnDefinition, DataError> {
        let type_name = if attribute.is_primitive() {
            if attribute.primary && self.definition().inherits.is_some() {
                field_types::key_reference_type(&attribute.field_type).to_string()
            } else {
                attribute.field_type.clone()
            }
        } else {
            let parent = match self.mapping_role(&attribute.name)? {
                Some((AssociationMapping::Association(fk), _)) => fk.parent_model,
                _ => attribute.field_type.clone(),
            };
            let key = self
                .context()
                .configuration()
                .primary_key_of(&parent)?
                .ok_or_else(|| {
                    DataError::configuration(format!("Model {} has no primary key", parent))
                })?;
            field_types::key_reference_type(&key.field_type).to_string()
        };

        let mut column = ColumnDefinition::new(&attribute.name, type_name);
        column.nullable = attribute.nullable && !attribute.primary;
        column.primary = attribute.primary;
        column.auto_increment = attribute.primary
            && field_types::is_auto_increment(&attribute.field_type)
            && self.definition().inherits.is_none();
        Ok(column)
    }

    /// Diff the table against the adapter and apply additions and changes
    async fn apply_schema(&self) -> Result<(), DataError> {
        let definition = self.definition();
        let adapter = self.context().adapter();
        let source = self.source_name();

        let mut diff = SchemaDiff::new(source, self.name(), &definition.version);
        diff.description = definition.title.clone();
        let existing = adapter.table_columns(source).await?;
        for attribute in self.storage_attributes()? {
            let column = self.column_definition(&attribute)?;
            match existing
                .as_ref()
                .and_then(|columns| columns.iter().find(|c| c.name == column.name))
            {
                None => diff.add.push(column),
                Some(current) if current.differs_from(&column) => diff.change.push(column),
                Some(_) => {}
            }
        }

        if existing.is_none() || !diff.is_empty() {
            debug!(
                "Migrating {}: {} added, {} changed",
                source,
                diff.add.len(),
                diff.change.len()
            );
            adapter.migrate(&diff).await?;
        }

        let mut entry = DataObject::new();
        entry.insert("appliesTo".to_string(), json!(source));
        entry.insert("model".to_string(), json!(self.name()));
        entry.insert("version".to_string(), json!(definition.version));
        entry.insert(
            "description".to_string(),
            diff.description.map(Value::from).unwrap_or(Value::Null),
        );
        entry.insert("appliedAt".to_string(), json!(Utc::now().to_rfc3339()));
        adapter
            .execute(&Statement::Insert {
                entity: self.context().configuration().settings().migration_entity.clone(),
                values: entry,
            })
            .await?;
        Ok(())
    }

    /// View joining the own table with the base view on the primary key
    async fn create_view(&self) -> Result<(), DataError> {
        let source = self.source_name();
        let mut query = QueryExpression::new(source);
        let mut own = HashSet::new();
        for attribute in self.storage_attributes()? {
            own.insert(attribute.name.clone());
            query.select.push(QueryField::qualified(source, &attribute.name));
        }

        if let Some(base) = self.base()? {
            let base_view = base.view_name();
            let key = self.key_name()?;
            query.add_join(JoinDescriptor {
                entity: base_view.clone(),
                alias: base_view.clone(),
                kind: JoinKind::Inner,
                local: QueryField::qualified(source, &key),
                foreign: QueryField::qualified(&base_view, &key),
            });
            for attribute in base.column_attributes()? {
                if !own.contains(&attribute.name) {
                    query
                        .select
                        .push(QueryField::qualified(&base_view, &attribute.name));
                }
            }
        }

        let view = self.view_name();
        debug!("Creating view {} over {}", view, source);
        self.context().adapter().create_view(&view, &query).await?;
        Ok(())
    }

    /// Insert seed objects into an empty table
    async fn seed(&self) -> Result<(), DataError> {
        if self.definition().seed.is_empty() {
            return Ok(());
        }
        let rows = self
            .context()
            .adapter()
            .execute(&Statement::Count(QueryExpression::new(self.source_name())))
            .await?;
        let total = rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if total > 0 {
            return Ok(());
        }

        let mut objects: Vec<DataObject> = self
            .definition()
            .seed
            .iter()
            .cloned()
            .map(|mut object| {
                object.insert(STATE_ATTRIBUTE.to_string(), json!(1));
                object
            })
            .collect();
        info!("Seeding {} with {} objects", self.name(), objects.len());
        self.elevated().save_many(&mut objects).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_columns() {
        let columns = ledger_columns();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "appliesTo", "model", "version", "description", "appliedAt"]
        );
        assert!(columns[0].auto_increment);
        assert!(!columns[1].nullable);
        assert!(columns[4].nullable);
    }
}
