//! Query Expression Evaluator
//!
//! Evaluates a `QueryExpression` against in-memory rows: left/inner joins, predicate
//! filtering, grouping with aggregates, ordering, paging and projection. Used
//! by `MemoryAdapter`; entity rows are provided through [`RowSource`] so views
//! can be evaluated recursively.
//!
//! Comparison semantics follow common SQL behaviour:
//!
//! - `eq null` / `ne null` test for (non-)null values
//! - ordering comparisons against null are false
//! - numbers compare numerically regardless of integer/float representation
//! - `contains` / `startswith` / `endswith` are case-sensitive

use crate::db::DatabaseError;
use crate::query::{
    AggregateFunction, ComparisonOperator, JoinKind, Predicate, QueryExpression, QueryField,
    SortDirection,
};
use crate::DataObject;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Provider of entity rows (tables and views)
pub(crate) trait RowSource {
    fn rows(&self, entity: &str) -> Result<Vec<DataObject>, DatabaseError>;
}

/// Row under evaluation: the target row plus one optional row per join alias
#[derive(Debug, Clone)]
struct RowContext {
    base: DataObject,
    joined: HashMap<String, DataObject>,
}

impl RowContext {
    fn value(&self, target: &str, field: &QueryField) -> Value {
        let row = match field.entity.as_deref() {
            None => Some(&self.base),
            Some(entity) if entity == target => Some(&self.base),
            Some(alias) => self.joined.get(alias),
        };
        row.and_then(|r| r.get(&field.name))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Evaluate a select expression
pub(crate) fn evaluate_query(
    query: &QueryExpression,
    source: &dyn RowSource,
) -> Result<Vec<DataObject>, DatabaseError> {
    let mut contexts: Vec<RowContext> = source
        .rows(&query.entity)?
        .into_iter()
        .map(|base| RowContext {
            base,
            joined: HashMap::new(),
        })
        .collect();

    for join in &query.joins {
        let foreign_rows = source.rows(&join.entity)?;
        let mut joined_contexts = Vec::with_capacity(contexts.len());
        for context in contexts {
            let local = context.value(&query.entity, &join.local);
            let matches: Vec<&DataObject> = if local.is_null() {
                Vec::new()
            } else {
                foreign_rows
                    .iter()
                    .filter(|row| {
                        row.get(&join.foreign.name)
                            .map(|v| values_equal(v, &local))
                            .unwrap_or(false)
                    })
                    .collect()
            };

            if matches.is_empty() {
                if join.kind == JoinKind::Left {
                    joined_contexts.push(context);
                }
                continue;
            }
            for row in matches {
                let mut next = context.clone();
                next.joined.insert(join.alias.clone(), row.clone());
                joined_contexts.push(next);
            }
        }
        contexts = joined_contexts;
    }

    if let Some(filter) = &query.filter {
        contexts.retain(|context| predicate_matches(filter, context, &query.entity));
    }

    let rows = if query.is_aggregate() {
        let mut rows = aggregate(query, &contexts);
        sort_rows(&mut rows, query);
        rows
    } else {
        sort_contexts(&mut contexts, query);
        contexts
            .iter()
            .map(|context| project(query, context))
            .collect()
    };

    Ok(page(rows, query.skip, query.take))
}

/// Number of rows a select expression yields without paging
pub(crate) fn evaluate_count(
    query: &QueryExpression,
    source: &dyn RowSource,
) -> Result<usize, DatabaseError> {
    Ok(evaluate_query(&query.without_paging(), source)?.len())
}

/// Evaluate a predicate against a single stored row
pub(crate) fn row_matches(predicate: &Predicate, row: &DataObject, entity: &str) -> bool {
    let context = RowContext {
        base: row.clone(),
        joined: HashMap::new(),
    };
    predicate_matches(predicate, &context, entity)
}

fn predicate_matches(predicate: &Predicate, context: &RowContext, target: &str) -> bool {
    match predicate {
        Predicate::Comparison {
            field,
            operator,
            value,
        } => compare(&context.value(target, field), *operator, value),
        Predicate::And(items) => items
            .iter()
            .all(|item| predicate_matches(item, context, target)),
        Predicate::Or(items) => items
            .iter()
            .any(|item| predicate_matches(item, context, target)),
        Predicate::Not(inner) => !predicate_matches(inner, context, target),
    }
}

fn compare(actual: &Value, operator: ComparisonOperator, expected: &Value) -> bool {
    match operator {
        ComparisonOperator::Equal => {
            if expected.is_null() {
                actual.is_null()
            } else {
                values_equal(actual, expected)
            }
        }
        ComparisonOperator::NotEqual => {
            if expected.is_null() {
                !actual.is_null()
            } else {
                !actual.is_null() && !values_equal(actual, expected)
            }
        }
        ComparisonOperator::GreaterThan => ordered(actual, expected, |o| o == Ordering::Greater),
        ComparisonOperator::GreaterOrEqual => ordered(actual, expected, |o| o != Ordering::Less),
        ComparisonOperator::LowerThan => ordered(actual, expected, |o| o == Ordering::Less),
        ComparisonOperator::LowerOrEqual => ordered(actual, expected, |o| o != Ordering::Greater),
        ComparisonOperator::Contains => text_test(actual, expected, |a, b| a.contains(b)),
        ComparisonOperator::StartsWith => text_test(actual, expected, |a, b| a.starts_with(b)),
        ComparisonOperator::EndsWith => text_test(actual, expected, |a, b| a.ends_with(b)),
        ComparisonOperator::In => match expected {
            Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
            single => values_equal(actual, single),
        },
        ComparisonOperator::NotIn => {
            if actual.is_null() {
                return false;
            }
            match expected {
                Value::Array(items) => !items.iter().any(|item| values_equal(actual, item)),
                single => !values_equal(actual, single),
            }
        }
    }
}

fn ordered(actual: &Value, expected: &Value, test: impl Fn(Ordering) -> bool) -> bool {
    if actual.is_null() || expected.is_null() {
        return false;
    }
    test(compare_json_values(Some(actual), Some(expected)))
}

fn text_test(actual: &Value, expected: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => test(a, b),
        _ => false,
    }
}

/// Equality with numeric normalization (`1 == 1.0`)
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => match (na.as_f64(), nb.as_f64()) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => na == nb,
        },
        _ => a == b,
    }
}

/// Compare two JSON values for sorting
pub(crate) fn compare_json_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) | (Some(Value::Null), Some(Value::Null)) => Ordering::Equal,
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        (Some(va), Some(vb)) => match (va, vb) {
            (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
            (Value::Number(na), Value::Number(nb)) => {
                let fa = na.as_f64().unwrap_or(0.0);
                let fb = nb.as_f64().unwrap_or(0.0);
                fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
            }
            (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
            // Mixed types, arrays and objects compare by their text form
            _ => va.to_string().cmp(&vb.to_string()),
        },
    }
}

fn sort_contexts(contexts: &mut [RowContext], query: &QueryExpression) {
    if query.order.is_empty() {
        return;
    }
    contexts.sort_by(|a, b| {
        for order in &query.order {
            let ordering = compare_json_values(
                Some(&a.value(&query.entity, &order.field)),
                Some(&b.value(&query.entity, &order.field)),
            );
            let ordering = match order.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn sort_rows(rows: &mut [DataObject], query: &QueryExpression) {
    if query.order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for order in &query.order {
            let key = order.field.output_name();
            let ordering = compare_json_values(
                a.get(key).or_else(|| a.get(&order.field.name)),
                b.get(key).or_else(|| b.get(&order.field.name)),
            );
            let ordering = match order.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(query: &QueryExpression, context: &RowContext) -> DataObject {
    if query.select.is_empty() {
        return context.base.clone();
    }
    query
        .select
        .iter()
        .map(|field| {
            (
                field.output_name().to_string(),
                context.value(&query.entity, field),
            )
        })
        .collect()
}

fn aggregate(query: &QueryExpression, contexts: &[RowContext]) -> Vec<DataObject> {
    let mut groups: Vec<Vec<&RowContext>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    if query.group.is_empty() {
        groups.push(contexts.iter().collect());
    } else {
        for context in contexts {
            let key = Value::Array(
                query
                    .group
                    .iter()
                    .map(|field| context.value(&query.entity, field))
                    .collect(),
            )
            .to_string();
            match index.get(&key) {
                Some(position) => groups[*position].push(context),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![context]);
                }
            }
        }
    }

    let projection: Vec<&QueryField> = if query.select.is_empty() {
        query.group.iter().collect()
    } else {
        query.select.iter().collect()
    };

    groups
        .iter()
        .map(|members| {
            let mut row = Map::new();
            for field in &projection {
                let value = match field.aggregate {
                    Some(function) => {
                        let values: Vec<Value> = members
                            .iter()
                            .map(|context| context.value(&query.entity, field))
                            .collect();
                        aggregate_values(function, &field.name, members.len(), &values)
                    }
                    None => members
                        .first()
                        .map(|context| context.value(&query.entity, field))
                        .unwrap_or(Value::Null),
                };
                row.insert(field.output_name().to_string(), value);
            }
            row
        })
        .collect()
}

fn aggregate_values(
    function: AggregateFunction,
    field_name: &str,
    member_count: usize,
    values: &[Value],
) -> Value {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    match function {
        AggregateFunction::Count => {
            if field_name == "*" {
                Value::from(member_count)
            } else {
                Value::from(present.len())
            }
        }
        AggregateFunction::Min => present
            .iter()
            .copied()
            .min_by(|a, b| compare_json_values(Some(*a), Some(*b)))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFunction::Max => present
            .iter()
            .copied()
            .max_by(|a, b| compare_json_values(Some(*a), Some(*b)))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFunction::Sum => {
            let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum())
            }
        }
        AggregateFunction::Avg => {
            let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
    }
}

/// Integral results stay integers so they compare equal to stored keys
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn page(rows: Vec<DataObject>, skip: usize, take: Option<usize>) -> Vec<DataObject> {
    let rows = rows.into_iter().skip(skip);
    match take {
        Some(take) => rows.take(take).collect(),
        None => rows.collect(),
    }
}
