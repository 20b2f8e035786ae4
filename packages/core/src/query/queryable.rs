//! Fluent Query Builder
//!
//! `DataQueryable` builds one `QueryExpression` for a model. Builder methods
//! consume and return the queryable; terminal methods (`execute`, `get_items`,
//! `first`, `value`, `count`, `list`, `expression`) borrow it, so one builder
//! can be counted and executed.
//!
//! # Nested Attributes
//!
//! Paths such as `customer/home/city` are resolved through the many-to-one
//! and one-to-many mappings of each segment into left joins aliased by the
//! path prefix (`customer`, `customer_home`). Joins are deduplicated by
//! alias, so `customer/name` and `customer/home/city` share the `customer`
//! join. A junction segment cannot be joined and is reported as an error.
//!
//! # Deferred Errors
//!
//! Resolution errors raised while building (unknown attribute, unsupported
//! path, malformed parameters) are kept and returned by the first terminal
//! call.

use crate::association::expand::{expand_rows, local_key};
use crate::db::Statement;
use crate::events::{DataEventArgs, DataEventKind, EventSource};
use crate::models::{AssociationMapping, AssociationRole, FieldDefinition, ViewDefinition};
use crate::query::parser::{
    parse_filter, parse_order_item, split_top_level, ExpandOption, FilterExpression, QueryParams,
    SelectItem,
};
use crate::query::{
    ComparisonOperator, JoinDescriptor, JoinKind, OrderBy, Predicate, QueryExpression,
    QueryField, SortDirection,
};
use crate::services::{DataError, DataModel};
use crate::DataObject;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Page of records with the total number of matching records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResultSet {
    pub total: u64,
    pub skip: usize,
    pub records: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone)]
struct PendingField {
    field: QueryField,
    combinator: Combinator,
}

/// Fluent query builder bound to a model
#[derive(Debug, Clone)]
pub struct DataQueryable {
    model: DataModel,
    query: QueryExpression,
    expand: Vec<ExpandOption>,
    view: Option<ViewDefinition>,
    as_array: bool,
    pending: Option<PendingField>,
    error: Option<DataError>,
}

impl DataQueryable {
    pub fn new(model: DataModel) -> Self {
        let query = QueryExpression::new(model.view_name());
        Self {
            model,
            query,
            expand: Vec::new(),
            view: None,
            as_array: false,
            pending: None,
            error: None,
        }
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    fn fail(&mut self, error: DataError) {
        if self.error.is_none() {
            debug!("Deferred query error on {}: {}", self.model.name(), error);
            self.error = Some(error);
        }
    }

    //
    // PATH RESOLUTION
    //

    /// Walk association segments, adding one left join per segment
    ///
    /// Returns the model reached by the last segment and its join alias.
    fn walk(&mut self, segments: &[&str]) -> Result<(DataModel, String), DataError> {
        let mut model = self.model.clone();
        let mut alias = self.query.entity.clone();
        let mut prefix = String::new();

        for segment in segments {
            let attribute = model.attribute(segment)?.ok_or_else(|| {
                DataError::query(format!(
                    "Unknown attribute '{}' of {}",
                    segment,
                    model.name()
                ))
            })?;
            let (mapping, role) = model.mapping_role(&attribute.name)?.ok_or_else(|| {
                DataError::query(format!(
                    "{}.{} is not an association and cannot be navigated",
                    model.name(),
                    attribute.name
                ))
            })?;

            let (related, local, foreign) = match (role, &mapping) {
                (AssociationRole::HasOne, AssociationMapping::Association(fk)) => (
                    model.related(&fk.parent_model)?,
                    attribute.name.clone(),
                    fk.parent_field.clone(),
                ),
                (AssociationRole::HasMany, AssociationMapping::Association(fk)) => (
                    model.related(&fk.child_model)?,
                    fk.parent_field.clone(),
                    fk.child_field.clone(),
                ),
                _ => {
                    return Err(DataError::query(format!(
                        "Nested attribute {}.{} goes through a junction; only direct associations can be joined",
                        model.name(),
                        attribute.name
                    )))
                }
            };

            prefix = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{}_{}", prefix, segment)
            };
            self.query.add_join(JoinDescriptor {
                entity: related.view_name(),
                alias: prefix.clone(),
                kind: JoinKind::Left,
                local: QueryField::qualified(&alias, local),
                foreign: QueryField::qualified(&prefix, foreign),
            });
            alias = prefix.clone();
            model = related;
        }
        Ok((model, alias))
    }

    /// Resolve an attribute path to a field reference
    fn resolve_field(&mut self, path: &str) -> Result<QueryField, DataError> {
        let segments: Vec<&str> = path.split('/').map(str::trim).collect();
        let (last, associations) = segments
            .split_last()
            .ok_or_else(|| DataError::query("Empty attribute path"))?;
        let (model, alias) = self.walk(associations)?;
        let attribute = model.attribute(last)?.ok_or_else(|| {
            DataError::query(format!("Unknown attribute '{}' of {}", last, model.name()))
        })?;
        Ok(QueryField::qualified(alias, attribute.name))
    }

    fn column_field(&self, attribute: &FieldDefinition) -> QueryField {
        let field = QueryField::qualified(&self.query.entity, &attribute.name);
        match &attribute.property {
            Some(property) => field.with_alias(property),
            None => field,
        }
    }

    fn to_predicate(&mut self, expression: &FilterExpression) -> Result<Predicate, DataError> {
        Ok(match expression {
            FilterExpression::Compare {
                path,
                operator,
                value,
            } => Predicate::compare(self.resolve_field(path)?, *operator, value.clone()),
            FilterExpression::And(terms) => Predicate::And(
                terms
                    .iter()
                    .map(|t| self.to_predicate(t))
                    .collect::<Result<_, _>>()?,
            ),
            FilterExpression::Or(terms) => Predicate::Or(
                terms
                    .iter()
                    .map(|t| self.to_predicate(t))
                    .collect::<Result<_, _>>()?,
            ),
            FilterExpression::Not(inner) => Predicate::Not(Box::new(self.to_predicate(inner)?)),
        })
    }

    //
    // FILTERS
    //

    fn start(mut self, path: &str, combinator: Combinator) -> Self {
        match self.resolve_field(path) {
            Ok(field) => self.pending = Some(PendingField { field, combinator }),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Start a condition on `path`
    pub fn where_(self, path: &str) -> Self {
        self.start(path, Combinator::And)
    }

    /// Start a condition combined with `and`
    pub fn and(self, path: &str) -> Self {
        self.start(path, Combinator::And)
    }

    /// Start a condition combined with `or`
    pub fn or(self, path: &str) -> Self {
        self.start(path, Combinator::Or)
    }

    fn push_predicate(&mut self, predicate: Predicate, combinator: Combinator) {
        match combinator {
            Combinator::And => self.query.and_where(predicate),
            Combinator::Or => self.query.or_where(predicate),
        }
    }

    fn compare(mut self, operator: ComparisonOperator, value: Value) -> Self {
        match self.pending.take() {
            Some(PendingField { field, combinator }) => {
                self.push_predicate(Predicate::compare(field, operator, value), combinator)
            }
            None if self.error.is_some() => {}
            None => self.fail(DataError::query(format!(
                "{:?} comparison without a preceding where/and/or",
                operator
            ))),
        }
        self
    }

    pub fn equal(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::Equal, value.into())
    }

    pub fn not_equal(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::NotEqual, value.into())
    }

    pub fn greater_than(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::GreaterThan, value.into())
    }

    pub fn greater_or_equal(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::GreaterOrEqual, value.into())
    }

    pub fn lower_than(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::LowerThan, value.into())
    }

    pub fn lower_or_equal(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::LowerOrEqual, value.into())
    }

    pub fn contains(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::Contains, value.into())
    }

    pub fn starts_with(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::StartsWith, value.into())
    }

    pub fn ends_with(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOperator::EndsWith, value.into())
    }

    pub fn in_(self, values: Vec<Value>) -> Self {
        self.compare(ComparisonOperator::In, Value::Array(values))
    }

    pub fn not_in(self, values: Vec<Value>) -> Self {
        self.compare(ComparisonOperator::NotIn, Value::Array(values))
    }

    /// Inclusive range on the pending field
    pub fn between(mut self, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        match self.pending.take() {
            Some(PendingField { field, combinator }) => {
                let range = Predicate::compare(
                    field.clone(),
                    ComparisonOperator::GreaterOrEqual,
                    low.into(),
                )
                .and(Predicate::compare(
                    field,
                    ComparisonOperator::LowerOrEqual,
                    high.into(),
                ));
                self.push_predicate(range, combinator);
            }
            None if self.error.is_some() => {}
            None => self.fail(DataError::query("between without a preceding where/and/or")),
        }
        self
    }

    pub(crate) fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.query.and_where(predicate);
        self
    }

    pub(crate) fn with_join(mut self, join: JoinDescriptor) -> Self {
        self.query.add_join(join);
        self
    }

    //
    // PROJECTION / ORDER / PAGING
    //

    fn select_item(&mut self, item: &str) -> Result<(), DataError> {
        let item = SelectItem::parse(item)?;

        if item.aggregate.is_none() && item.alias.is_none() {
            if let Some(view) = self.model.definition().view_definition(&item.path).cloned() {
                for field in &view.fields {
                    self.select_item(field)?;
                }
                self.view = Some(view);
                return Ok(());
            }
        }

        if item.path == "*" && item.aggregate.is_some() {
            let mut field = QueryField::new("*");
            field.alias = item.alias;
            field.aggregate = item.aggregate;
            self.query.select.push(field);
            return Ok(());
        }

        if item.path.contains('/') {
            let alias = item.alias.unwrap_or_else(|| item.path.replace('/', "_"));
            let mut field = self.resolve_field(&item.path)?.with_alias(alias);
            field.aggregate = item.aggregate;
            self.query.select.push(field);
            return Ok(());
        }

        let attribute = self.model.attribute(&item.path)?.ok_or_else(|| {
            DataError::query(format!(
                "Unknown attribute '{}' of {}",
                item.path,
                self.model.name()
            ))
        })?;
        if item.aggregate.is_none() && !self.model.is_column(&attribute)? {
            if !self.expand.iter().any(|e| e.name == attribute.name) {
                self.expand.push(ExpandOption::new(&attribute.name));
            }
            return Ok(());
        }

        let mut field = self.column_field(&attribute);
        if let Some(alias) = item.alias {
            field = field.with_alias(alias);
        }
        field.aggregate = item.aggregate;
        self.query.select.push(field);
        Ok(())
    }

    /// Select attributes, nested paths, aggregates or a named view
    pub fn select<S: AsRef<str>>(mut self, items: &[S]) -> Self {
        for item in items {
            if let Err(e) = self.select_item(item.as_ref()) {
                self.fail(e);
            }
        }
        self
    }

    /// Add the attribute to a non-empty selection unless already selected
    ///
    /// Returns whether it was added.
    pub(crate) fn include_field(mut self, name: &str) -> (Self, bool) {
        if self.query.select.is_empty() || self.query.has_selected(name) {
            return (self, false);
        }
        match self.model.attribute(name) {
            Ok(Some(attribute)) => {
                let field = QueryField::qualified(&self.query.entity, &attribute.name)
                    .with_alias(name);
                self.query.select.push(field);
                (self, true)
            }
            Ok(None) => (self, false),
            Err(e) => {
                self.fail(e);
                (self, false)
            }
        }
    }

    fn push_order(mut self, path: &str, direction: SortDirection) -> Self {
        match self.resolve_field(path) {
            Ok(field) => self.query.order.push(OrderBy { field, direction }),
            Err(e) => self.fail(e),
        }
        self
    }

    pub fn order_by(self, path: &str) -> Self {
        self.push_order(path, SortDirection::Asc)
    }

    pub fn order_by_descending(self, path: &str) -> Self {
        self.push_order(path, SortDirection::Desc)
    }

    pub fn then_by(self, path: &str) -> Self {
        self.push_order(path, SortDirection::Asc)
    }

    pub fn then_by_descending(self, path: &str) -> Self {
        self.push_order(path, SortDirection::Desc)
    }

    pub fn group_by<S: AsRef<str>>(mut self, paths: &[S]) -> Self {
        for path in paths {
            match self.resolve_field(path.as_ref()) {
                Ok(field) => self.query.group.push(field),
                Err(e) => self.fail(e),
            }
        }
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.query.skip = skip;
        self
    }

    pub fn take(mut self, take: usize) -> Self {
        self.query.take = Some(take);
        self
    }

    /// Join the models along an association path without selecting from them
    pub fn join(mut self, path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').map(str::trim).collect();
        if let Err(e) = self.walk(&segments) {
            self.fail(e);
        }
        self
    }

    /// Expand associations after fetching (`orders($select=id;$top=5)`)
    pub fn expand<S: AsRef<str>>(mut self, items: &[S]) -> Self {
        for item in items {
            match ExpandOption::parse(item.as_ref()) {
                Ok(option) => {
                    self.expand.retain(|e| e.name != option.name);
                    self.expand.push(option);
                }
                Err(e) => self.fail(e),
            }
        }
        self
    }

    /// Unwrap single-field rows into plain values
    pub fn as_array(mut self) -> Self {
        self.as_array = true;
        self
    }

    /// Apply the query parameter surface
    pub fn with_params(mut self, params: &QueryParams) -> Self {
        if let Some(select) = &params.select {
            self = self.select(&split_top_level(select, ','));
        }
        if let Some(filter) = &params.filter {
            match parse_filter(filter).and_then(|e| self.to_predicate(&e)) {
                Ok(predicate) => self.query.and_where(predicate),
                Err(e) => self.fail(e),
            }
        }
        if let Some(order) = &params.order_by {
            for item in split_top_level(order, ',') {
                match parse_order_item(&item) {
                    Ok((path, direction)) => self = self.push_order(&path, direction),
                    Err(e) => self.fail(e),
                }
            }
        }
        if let Some(group) = &params.group_by {
            self = self.group_by(&split_top_level(group, ','));
        }
        if let Some(skip) = params.skip {
            self.query.skip = skip;
        }
        if let Some(top) = params.top {
            self.query.take = Some(top);
        }
        if let Some(expand) = &params.expand {
            self = self.expand(&split_top_level(expand, ','));
        }
        self
    }

    //
    // EXECUTION
    //

    /// Working copy with the default selection, view clauses and expandable
    /// fields resolved
    fn prepared(&self) -> Result<DataQueryable, DataError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let mut working = self.clone();

        if working.query.select.is_empty() && !working.query.is_aggregate() {
            for attribute in working.model.column_attributes()? {
                let field = working.column_field(&attribute);
                working.query.select.push(field);
            }
        }

        for attribute in working.model.column_attributes()? {
            if attribute.expandable
                && !attribute.is_primitive()
                && working.query.has_selected(attribute.property_name())
                && !working.expand.iter().any(|e| e.name == attribute.name)
            {
                working.expand.push(ExpandOption::new(&attribute.name));
            }
        }

        if let Some(view) = working.view.clone() {
            if let Some(filter) = &view.filter {
                let predicate = parse_filter(filter).and_then(|e| working.to_predicate(&e))?;
                working.query.and_where(predicate);
            }
            if let Some(order) = &view.order {
                for item in split_top_level(order, ',') {
                    let (path, direction) = parse_order_item(&item)?;
                    let field = working.resolve_field(&path)?;
                    working.query.order.push(OrderBy { field, direction });
                }
            }
            if let Some(group) = &view.group {
                for path in split_top_level(group, ',') {
                    let field = working.resolve_field(&path)?;
                    working.query.group.push(field);
                }
            }
        }

        if working.query.is_aggregate() {
            working.expand.clear();
        }
        Ok(working)
    }

    /// Query expression as it would be sent to the adapter
    pub fn expression(&self) -> Result<QueryExpression, DataError> {
        Ok(self.prepared()?.query)
    }

    /// Run the query and return its rows
    pub async fn execute(&self) -> Result<Vec<Value>, DataError> {
        let mut working = self.prepared()?;
        let model = working.model.clone();
        model.migrate().await?;

        let mut temporary = Vec::new();
        for option in working.expand.clone() {
            let (key, replaced) = local_key(&model, &option)?;
            let (next, added) = working.include_field(&key);
            if added && !replaced {
                temporary.push(key);
            }
            working = next;
        }

        let names = working.expand.iter().map(|e| e.name.clone()).collect();
        let mut args = DataEventArgs::for_query(
            model.clone(),
            EventSource::Execute,
            working.query.clone(),
            names,
        );
        model
            .events()
            .emit(DataEventKind::BeforeExecute, &mut args)
            .await?;

        let mut values: Vec<Value> = match args.result.take() {
            Some(Value::Array(values)) => values,
            Some(Value::Null) => Vec::new(),
            Some(other) => vec![other],
            None => {
                let query = args.query.clone().unwrap_or_else(|| working.query.clone());
                let statement = Statement::Select(query);
                debug!("{}: {}", model.name(), statement);
                let mut rows = model.context().adapter().execute(&statement).await?;
                expand_rows(&model, &mut rows, &working.expand).await?;
                for row in rows.iter_mut() {
                    for key in &temporary {
                        row.shift_remove(key);
                    }
                }
                rows.into_iter().map(Value::Object).collect()
            }
        };

        if model
            .events()
            .channel(DataEventKind::AfterExecute)
            .has_listeners()
        {
            args.result = Some(Value::Array(values));
            model
                .events()
                .emit(DataEventKind::AfterExecute, &mut args)
                .await?;
            values = match args.result.take() {
                Some(Value::Array(values)) => values,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![other],
            };
        }

        if working.as_array && working.query.select.len() == 1 {
            let name = working.query.select[0].output_name().to_string();
            values = values
                .into_iter()
                .map(|value| match value {
                    Value::Object(mut row) => row.shift_remove(&name).unwrap_or(Value::Null),
                    other => other,
                })
                .collect();
        }
        Ok(values)
    }

    /// Rows as data objects
    pub async fn get_items(&self) -> Result<Vec<DataObject>, DataError> {
        let mut query = self.clone();
        query.as_array = false;
        Ok(query
            .execute()
            .await?
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect())
    }

    /// First row
    pub async fn first(&self) -> Result<Option<DataObject>, DataError> {
        let query = self.clone().take(1);
        Ok(query.get_items().await?.into_iter().next())
    }

    /// First value of the first row
    pub async fn value(&self) -> Result<Option<Value>, DataError> {
        Ok(self
            .first()
            .await?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// Number of matching rows, ignoring paging
    pub async fn count(&self) -> Result<u64, DataError> {
        let working = self.prepared()?;
        let model = working.model.clone();
        model.migrate().await?;

        let query = working.query.without_paging();
        let mut args =
            DataEventArgs::for_query(model.clone(), EventSource::Count, query.clone(), Vec::new());
        model
            .events()
            .emit(DataEventKind::BeforeExecute, &mut args)
            .await?;

        let total = match args.result.take() {
            Some(result) => result.as_u64().unwrap_or(0),
            None => {
                let statement = Statement::Count(query);
                debug!("{}: {}", model.name(), statement);
                let rows = model.context().adapter().execute(&statement).await?;
                rows.first()
                    .and_then(|row| row.get("total"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
            }
        };

        if model
            .events()
            .channel(DataEventKind::AfterExecute)
            .has_listeners()
        {
            args.result = Some(Value::from(total));
            model
                .events()
                .emit(DataEventKind::AfterExecute, &mut args)
                .await?;
            return Ok(args
                .result
                .as_ref()
                .and_then(Value::as_u64)
                .unwrap_or(total));
        }
        Ok(total)
    }

    /// One page of records plus the total number of matching records
    pub async fn list(&self) -> Result<DataResultSet, DataError> {
        let total = self.count().await?;
        let records = self.execute().await?;
        Ok(DataResultSet {
            total,
            skip: self.query.skip,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryAdapter;
    use crate::services::{DataConfiguration, DataContext, DataSettings};
    use std::sync::Arc;

    fn context() -> DataContext {
        let configuration = DataConfiguration::new(DataSettings::default()).unwrap();
        configuration
            .register_models_json(
                r#"[
                  { "name": "Address", "fields": [
                      { "name": "id", "type": "Counter", "primary": true },
                      { "name": "city", "type": "Text" } ] },
                  { "name": "Person", "fields": [
                      { "name": "id", "type": "Counter", "primary": true },
                      { "name": "name", "type": "Text" },
                      { "name": "home", "type": "Address" },
                      { "name": "groups", "type": "Group", "many": true } ] },
                  { "name": "Group", "fields": [
                      { "name": "id", "type": "Counter", "primary": true },
                      { "name": "title", "type": "Text" } ] },
                  { "name": "Order", "fields": [
                      { "name": "id", "type": "Counter", "primary": true },
                      { "name": "total", "type": "Number" },
                      { "name": "customer", "type": "Person" } ],
                    "views": [ { "name": "summary",
                                 "fields": ["id", "customer/name as customerName"],
                                 "order": "total desc" } ] }
                ]"#,
            )
            .unwrap();
        DataContext::new(Arc::new(configuration), Arc::new(MemoryAdapter::new()))
    }

    #[test]
    fn test_nested_filter_adds_left_join() {
        let order = context().model("Order").unwrap();
        let query = order
            .where_("customer/name")
            .equal("Jane")
            .expression()
            .unwrap();

        assert_eq!(query.joins.len(), 1);
        assert_eq!(query.joins[0].alias, "customer");
        assert_eq!(query.joins[0].entity, "Person");
        assert_eq!(query.joins[0].kind, JoinKind::Left);
        assert_eq!(
            query.filter,
            Some(Predicate::equal(
                QueryField::qualified("customer", "name"),
                Value::from("Jane")
            ))
        );
    }

    #[test]
    fn test_common_prefix_joins_once() {
        let order = context().model("Order").unwrap();
        let query = order
            .select(&["customer/name", "customer/home/city"])
            .expression()
            .unwrap();

        let aliases: Vec<&str> = query.joins.iter().map(|j| j.alias.as_str()).collect();
        assert_eq!(aliases, vec!["customer", "customer_home"]);
        assert_eq!(query.select[1].output_name(), "customer_home_city");
        assert_eq!(query.joins[1].local, QueryField::qualified("customer", "home"));
    }

    #[test]
    fn test_junction_in_path_is_rejected() {
        let person = context().model("Person").unwrap();
        let err = person
            .where_("groups/title")
            .equal("admins")
            .expression()
            .unwrap_err();
        assert_eq!(err.code(), "EQUERY");
    }

    #[test]
    fn test_default_selection_skips_collections() {
        let person = context().model("Person").unwrap();
        let query = person.queryable().expression().unwrap();
        let names: Vec<&str> = query.select.iter().map(|f| f.output_name()).collect();
        assert_eq!(names, vec!["id", "name", "home"]);
    }

    #[test]
    fn test_selecting_collection_redirects_to_expand() {
        let person = context().model("Person").unwrap();
        let query = person.select(&["id", "groups"]);
        assert_eq!(query.expand.len(), 1);
        assert_eq!(query.expand[0].name, "groups");
        assert_eq!(query.expression().unwrap().select.len(), 1);
    }

    #[test]
    fn test_named_view_expands_fields_and_order() {
        let order = context().model("Order").unwrap();
        let query = order.select(&["summary"]).expression().unwrap();
        let names: Vec<&str> = query.select.iter().map(|f| f.output_name()).collect();
        assert_eq!(names, vec!["id", "customerName"]);
        assert_eq!(query.order.len(), 1);
        assert_eq!(query.order[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_params_surface() {
        let order = context().model("Order").unwrap();
        let params = QueryParams::new()
            .with_filter("total gt 10 and customer/name eq 'Jane'")
            .with_order_by("total desc")
            .with_top(5)
            .with_skip(10);
        let query = order.filter(&params).expression().unwrap();
        assert_eq!(query.take, Some(5));
        assert_eq!(query.skip, 10);
        assert_eq!(query.joins.len(), 1);
        assert!(matches!(query.filter, Some(Predicate::And(ref terms)) if terms.len() == 2));
    }

    #[test]
    fn test_builder_errors_are_deferred() {
        let order = context().model("Order").unwrap();
        let err = order
            .where_("missing")
            .equal(1)
            .order_by("total")
            .expression()
            .unwrap_err();
        assert_eq!(err.code(), "EQUERY");
    }
}
