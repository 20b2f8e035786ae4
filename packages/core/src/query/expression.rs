//! Query Expressions
//!
//! Abstract, adapter-independent representation of a single query: target
//! entity, predicate tree, projection, ordering, grouping, left joins and
//! paging. Expressions are built incrementally by `DataQueryable` and handed to
//! the adapter unchanged; cloning produces an independent copy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate applied to a selected field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

impl AggregateFunction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "sum" => Some(Self::Sum),
            "avg" | "average" => Some(Self::Avg),
            _ => None,
        }
    }
}

/// Reference to a column of the target entity or of a joined alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryField {
    /// Entity or join alias owning the column (`None` = query target)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateFunction>,
}

impl QueryField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            entity: None,
            name: name.into(),
            alias: None,
            aggregate: None,
        }
    }

    pub fn qualified(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            ..Self::new(name)
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateFunction) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    /// Key of this field in result rows
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Comparison operator of a predicate leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LowerThan,
    LowerOrEqual,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

/// Predicate tree of a `$where` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    Comparison {
        field: QueryField,
        operator: ComparisonOperator,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: QueryField, operator: ComparisonOperator, value: Value) -> Self {
        Self::Comparison {
            field,
            operator,
            value,
        }
    }

    pub fn equal(field: QueryField, value: Value) -> Self {
        Self::compare(field, ComparisonOperator::Equal, value)
    }

    pub fn in_list(field: QueryField, values: Vec<Value>) -> Self {
        Self::compare(field, ComparisonOperator::In, Value::Array(values))
    }

    /// Combine with `and`, flattening nested conjunctions
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Combine with `or`, flattening nested disjunctions
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), right) => {
                left.push(right);
                Predicate::Or(left)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }

    /// Visit every comparison leaf
    pub fn fields(&self) -> Vec<&QueryField> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a QueryField>) {
        match self {
            Predicate::Comparison { field, .. } => fields.push(field),
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.collect_fields(fields);
                }
            }
            Predicate::Not(inner) => inner.collect_fields(fields),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordering clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: QueryField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: QueryField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: QueryField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

/// Join kind; nested attributes always produce left joins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

/// Join of another entity under an alias
///
/// `local` belongs to the query target or a previously joined alias;
/// `foreign` belongs to `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDescriptor {
    pub entity: String,
    pub alias: String,
    #[serde(default)]
    pub kind: JoinKind,
    pub local: QueryField,
    pub foreign: QueryField,
}

/// Complete query expression
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryExpression {
    #[serde(rename = "$from")]
    pub entity: String,
    #[serde(rename = "$where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    #[serde(rename = "$select", default)]
    pub select: Vec<QueryField>,
    #[serde(rename = "$order", default)]
    pub order: Vec<OrderBy>,
    #[serde(rename = "$group", default)]
    pub group: Vec<QueryField>,
    #[serde(rename = "$expand", default)]
    pub joins: Vec<JoinDescriptor>,
    #[serde(rename = "$skip", default)]
    pub skip: usize,
    #[serde(rename = "$take", default, skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
}

impl QueryExpression {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Add a join unless one with the same alias already exists
    ///
    /// Returns `true` if the join was added.
    pub fn add_join(&mut self, join: JoinDescriptor) -> bool {
        if self.joins.iter().any(|j| j.alias == join.alias) {
            return false;
        }
        self.joins.push(join);
        true
    }

    /// Append a predicate with `and`
    pub fn and_where(&mut self, predicate: Predicate) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }

    /// Append a predicate with `or`
    pub fn or_where(&mut self, predicate: Predicate) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.or(predicate),
            None => predicate,
        });
    }

    /// Copy used for counting: paging and ordering removed
    pub fn without_paging(&self) -> Self {
        let mut copy = self.clone();
        copy.skip = 0;
        copy.take = None;
        copy.order.clear();
        copy
    }

    /// Whether the projection contains aggregates or a grouping
    pub fn is_aggregate(&self) -> bool {
        !self.group.is_empty() || self.select.iter().any(|f| f.aggregate.is_some())
    }

    pub fn has_selected(&self, output_name: &str) -> bool {
        self.select.iter().any(|f| f.output_name() == output_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn join(alias: &str) -> JoinDescriptor {
        JoinDescriptor {
            entity: "Person".to_string(),
            alias: alias.to_string(),
            kind: JoinKind::Left,
            local: QueryField::new("customer"),
            foreign: QueryField::qualified(alias, "id"),
        }
    }

    #[test]
    fn test_add_join_deduplicates_by_alias() {
        let mut query = QueryExpression::new("Order");
        assert!(query.add_join(join("customer")));
        assert!(!query.add_join(join("customer")));
        assert!(query.add_join(join("customer_address")));
        assert_eq!(query.joins.len(), 2);
    }

    #[test]
    fn test_and_where_flattens() {
        let mut query = QueryExpression::new("Order");
        query.and_where(Predicate::equal(QueryField::new("a"), json!(1)));
        query.and_where(Predicate::equal(QueryField::new("b"), json!(2)));
        query.and_where(Predicate::equal(QueryField::new("c"), json!(3)));

        match query.filter.unwrap() {
            Predicate::And(items) => assert_eq!(items.len(), 3),
            other => panic!("Expected And predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_without_paging_is_independent_copy() {
        let mut query = QueryExpression::new("Order");
        query.skip = 10;
        query.take = Some(5);
        query.order.push(OrderBy::desc(QueryField::new("id")));

        let count = query.without_paging();
        assert_eq!(count.skip, 0);
        assert!(count.take.is_none());
        assert!(count.order.is_empty());
        assert_eq!(query.skip, 10);
        assert_eq!(query.take, Some(5));
    }

    #[test]
    fn test_serialization_uses_dollar_keys() {
        let mut query = QueryExpression::new("Order");
        query.take = Some(25);
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["$from"], "Order");
        assert_eq!(value["$take"], 25);
        assert!(value.get("$where").is_none());
    }
}
