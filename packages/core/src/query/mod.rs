//! Queries
//!
//! - `expression` - adapter-independent query expressions
//! - `parser` - `$filter`/`$select`/`$orderby`/`$expand` parameter surface
//! - `queryable` - the fluent `DataQueryable` builder

mod expression;
mod parser;
mod queryable;

pub use expression::{
    AggregateFunction, ComparisonOperator, JoinDescriptor, JoinKind, OrderBy, Predicate,
    QueryExpression, QueryField, SortDirection,
};
pub use parser::{
    parse_filter, parse_order_item, split_top_level, ExpandOption, FilterExpression, QueryParams,
    SelectItem,
};
pub use queryable::{DataQueryable, DataResultSet};
