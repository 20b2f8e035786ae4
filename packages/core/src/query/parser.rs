//! Query Parameter Surface
//!
//! Parses the string-based query parameters accepted by `DataQueryable::with_params`:
//!
//! | key                    | example                                         |
//! |------------------------|-------------------------------------------------|
//! | `$filter`              | `customer/name eq 'Jane' and total gt 10`       |
//! | `$select`              | `id, customer/name as customerName, count(id) as n` |
//! | `$orderby` / `$order`  | `orderDate desc, id`                            |
//! | `$groupby` / `$group`  | `customer`                                      |
//! | `$top` / `$take`       | `25`                                            |
//! | `$skip`                | `50`                                            |
//! | `$expand`              | `orders($select=id,total;$orderby=total desc;$top=5)` |
//!
//! Field references are attribute paths; `/` separates nested attributes.

use crate::query::{AggregateFunction, ComparisonOperator, SortDirection};
use crate::services::DataError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// Recognized query parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "$filter", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(rename = "$select", default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(
        rename = "$skip",
        default,
        deserialize_with = "deserialize_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub skip: Option<usize>,
    #[serde(
        rename = "$top",
        alias = "$take",
        default,
        deserialize_with = "deserialize_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub top: Option<usize>,
    #[serde(
        rename = "$orderby",
        alias = "$order",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub order_by: Option<String>,
    #[serde(
        rename = "$groupby",
        alias = "$group",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub group_by: Option<String>,
    #[serde(rename = "$expand", default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(usize),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(n)) => Ok(Some(n)),
        Some(Count::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Count::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid count '{}'", text))),
    }
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read parameters from a JSON object; unknown keys are ignored
    pub fn from_value(value: Value) -> Result<Self, DataError> {
        serde_json::from_value(value)
            .map_err(|e| DataError::query(format!("Invalid query parameters: {}", e)))
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn with_group_by(mut self, group: impl Into<String>) -> Self {
        self.group_by = Some(group.into());
        self
    }

    pub fn with_expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = Some(expand.into());
        self
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Split on `separator` outside parentheses and quoted strings
pub fn split_top_level(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            c if c == separator && !quoted && depth == 0 => {
                let part = current.trim();
                if !part.is_empty() {
                    parts.push(part.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    let part = current.trim();
    if !part.is_empty() {
        parts.push(part.to_string());
    }
    parts
}

//
// FILTER
//

/// Parsed `$filter` expression over attribute paths
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Compare {
        path: String,
        operator: ComparisonOperator,
        value: Value,
    },
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
    Not(Box<FilterExpression>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Text(String),
    Number(Number),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, DataError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(DataError::query(format!(
                                "Unterminated string in filter '{}'",
                                input
                            )))
                        }
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = if literal.contains('.') {
                    literal
                        .parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                } else {
                    literal.parse::<i64>().ok().map(Number::from)
                };
                let number = number.ok_or_else(|| {
                    DataError::query(format!("Invalid number '{}' in filter", literal))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '/' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(DataError::query(format!(
                    "Unexpected character '{}' in filter '{}'",
                    other, input
                )))
            }
        }
    }
    Ok(tokens)
}

struct FilterParser {
    tokens: Vec<Token>,
    position: usize,
}

impl FilterParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, expected: Token) -> Result<(), DataError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(DataError::query(format!(
                "Expected {:?} in filter, found {:?}",
                expected, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpression, DataError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek_keyword("or") {
            self.position += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpression::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpression, DataError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek_keyword("and") {
            self.position += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpression::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<FilterExpression, DataError> {
        if self.peek_keyword("not") {
            self.position += 1;
            return Ok(FilterExpression::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<FilterExpression, DataError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => {
                if let Some(operator) = text_function(&word) {
                    if self.peek() == Some(&Token::LParen) {
                        return self.parse_text_function(operator);
                    }
                }
                self.parse_comparison(word)
            }
            other => Err(DataError::query(format!(
                "Expected a comparison in filter, found {:?}",
                other
            ))),
        }
    }

    /// `contains(path, 'x')`, optionally followed by `eq true` / `eq false`
    fn parse_text_function(
        &mut self,
        operator: ComparisonOperator,
    ) -> Result<FilterExpression, DataError> {
        self.expect(Token::LParen)?;
        let path = match self.next() {
            Some(Token::Ident(path)) => path,
            other => {
                return Err(DataError::query(format!(
                    "Expected an attribute in {:?}, found {:?}",
                    operator, other
                )))
            }
        };
        self.expect(Token::Comma)?;
        let value = self.parse_literal()?;
        self.expect(Token::RParen)?;

        let expression = FilterExpression::Compare {
            path,
            operator,
            value,
        };
        if self.peek_keyword("eq") {
            self.position += 1;
            return match self.parse_literal()? {
                Value::Bool(true) => Ok(expression),
                Value::Bool(false) => Ok(FilterExpression::Not(Box::new(expression))),
                other => Err(DataError::query(format!(
                    "Text functions compare to true or false, not {}",
                    other
                ))),
            };
        }
        Ok(expression)
    }

    fn parse_comparison(&mut self, path: String) -> Result<FilterExpression, DataError> {
        let operator_word = match self.next() {
            Some(Token::Ident(word)) => word.to_ascii_lowercase(),
            other => {
                return Err(DataError::query(format!(
                    "Expected an operator after '{}', found {:?}",
                    path, other
                )))
            }
        };

        let operator = match operator_word.as_str() {
            "eq" => ComparisonOperator::Equal,
            "ne" => ComparisonOperator::NotEqual,
            "gt" => ComparisonOperator::GreaterThan,
            "ge" => ComparisonOperator::GreaterOrEqual,
            "lt" => ComparisonOperator::LowerThan,
            "le" => ComparisonOperator::LowerOrEqual,
            "in" => ComparisonOperator::In,
            "not" if self.peek_keyword("in") => {
                self.position += 1;
                ComparisonOperator::NotIn
            }
            other => {
                return Err(DataError::query(format!(
                    "Unknown filter operator '{}'",
                    other
                )))
            }
        };

        let value = if matches!(operator, ComparisonOperator::In | ComparisonOperator::NotIn) {
            self.parse_list()?
        } else {
            self.parse_literal()?
        };
        Ok(FilterExpression::Compare {
            path,
            operator,
            value,
        })
    }

    fn parse_list(&mut self) -> Result<Value, DataError> {
        self.expect(Token::LParen)?;
        let mut values = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.position += 1;
            return Ok(Value::Array(values));
        }
        loop {
            values.push(self.parse_literal()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(DataError::query(format!(
                        "Expected ',' or ')' in list, found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(Value::Array(values))
    }

    fn parse_literal(&mut self) -> Result<Value, DataError> {
        match self.next() {
            Some(Token::Text(text)) => Ok(Value::String(text)),
            Some(Token::Number(number)) => Ok(Value::Number(number)),
            Some(Token::Ident(word)) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(DataError::query(format!(
                    "Expected a literal in filter, found '{}'",
                    word
                ))),
            },
            other => Err(DataError::query(format!(
                "Expected a literal in filter, found {:?}",
                other
            ))),
        }
    }
}

fn text_function(word: &str) -> Option<ComparisonOperator> {
    match word.to_ascii_lowercase().as_str() {
        "contains" | "substringof" => Some(ComparisonOperator::Contains),
        "startswith" => Some(ComparisonOperator::StartsWith),
        "endswith" => Some(ComparisonOperator::EndsWith),
        _ => None,
    }
}

/// Parse a `$filter` expression
pub fn parse_filter(input: &str) -> Result<FilterExpression, DataError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(DataError::query("Empty filter expression"));
    }
    let mut parser = FilterParser {
        tokens,
        position: 0,
    };
    let expression = parser.parse_or()?;
    if parser.position < parser.tokens.len() {
        return Err(DataError::query(format!(
            "Unexpected trailing input in filter '{}'",
            input
        )));
    }
    Ok(expression)
}

//
// SELECT / ORDER / EXPAND
//

/// One `$select` item: `path`, `path as alias` or `aggregate(path) as alias`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub path: String,
    pub aggregate: Option<AggregateFunction>,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn parse(input: &str) -> Result<Self, DataError> {
        let input = input.trim();
        let words: Vec<&str> = input.split_whitespace().collect();
        let (expression, alias) = match words.as_slice() {
            [expression] => (*expression, None),
            [expression, keyword, alias] if keyword.eq_ignore_ascii_case("as") => {
                (*expression, Some(alias.to_string()))
            }
            _ => {
                return Err(DataError::query(format!(
                    "Invalid select expression '{}'",
                    input
                )))
            }
        };

        if let Some(open) = expression.find('(') {
            let name = &expression[..open];
            let inner = expression[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| DataError::query(format!("Unbalanced '{}'", expression)))?;
            let aggregate = AggregateFunction::parse(name).ok_or_else(|| {
                DataError::query(format!("Unknown aggregate function '{}'", name))
            })?;
            return Ok(Self {
                path: inner.trim().to_string(),
                aggregate: Some(aggregate),
                alias,
            });
        }

        Ok(Self {
            path: expression.to_string(),
            aggregate: None,
            alias,
        })
    }
}

/// Parse one `$orderby` item: `path [asc|desc]`
pub fn parse_order_item(input: &str) -> Result<(String, SortDirection), DataError> {
    let words: Vec<&str> = input.split_whitespace().collect();
    match words.as_slice() {
        [path] => Ok((path.to_string(), SortDirection::Asc)),
        [path, direction] if direction.eq_ignore_ascii_case("asc") => {
            Ok((path.to_string(), SortDirection::Asc))
        }
        [path, direction] if direction.eq_ignore_ascii_case("desc") => {
            Ok((path.to_string(), SortDirection::Desc))
        }
        _ => Err(DataError::query(format!("Invalid order expression '{}'", input))),
    }
}

/// An expanded field with the options applied to its batch query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandOption {
    pub name: String,
    pub params: QueryParams,
}

impl ExpandOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: QueryParams::default(),
        }
    }

    /// Parse `name` or `name($select=..;$orderby=..;$top=..;$filter=..;$expand=..)`
    pub fn parse(input: &str) -> Result<Self, DataError> {
        let input = input.trim();
        let Some(open) = input.find('(') else {
            return Ok(Self::new(input));
        };
        let name = input[..open].trim();
        let inner = input[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| DataError::query(format!("Unbalanced expand option '{}'", input)))?;

        let mut params = QueryParams::default();
        for option in split_top_level(inner, ';') {
            let (key, value) = option.split_once('=').ok_or_else(|| {
                DataError::query(format!("Invalid expand option '{}'", option))
            })?;
            let value = value.trim().to_string();
            let count = || {
                value
                    .parse::<usize>()
                    .map_err(|_| DataError::query(format!("Invalid count '{}'", value)))
            };
            match key.trim() {
                "$filter" => params.filter = Some(value.clone()),
                "$select" => params.select = Some(value.clone()),
                "$orderby" | "$order" => params.order_by = Some(value.clone()),
                "$groupby" | "$group" => params.group_by = Some(value.clone()),
                "$expand" => params.expand = Some(value.clone()),
                "$top" | "$take" => params.top = Some(count()?),
                "$skip" => params.skip = Some(count()?),
                other => {
                    return Err(DataError::query(format!(
                        "Unknown expand option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// Parse a comma-separated `$expand` list
    pub fn parse_list(input: &str) -> Result<Vec<Self>, DataError> {
        split_top_level(input, ',')
            .iter()
            .map(|item| Self::parse(item))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_accept_aliases_and_string_counts() {
        let params = QueryParams::from_value(json!({
            "$filter": "name eq 'x'",
            "$take": "10",
            "$skip": 5,
            "$order": "name desc",
            "$group": "name"
        }))
        .unwrap();
        assert_eq!(params.top, Some(10));
        assert_eq!(params.skip, Some(5));
        assert_eq!(params.order_by.as_deref(), Some("name desc"));
        assert_eq!(params.group_by.as_deref(), Some("name"));
    }

    #[test]
    fn test_split_top_level_respects_parentheses_and_quotes() {
        assert_eq!(
            split_top_level("id, orders($select=id,total), name", ','),
            vec!["id", "orders($select=id,total)", "name"]
        );
        assert_eq!(split_top_level("'a,b', c", ','), vec!["'a,b'", "c"]);
    }

    #[test]
    fn test_parse_filter_precedence() {
        let expression =
            parse_filter("customer/name eq 'Jane' and total gt 10 or status eq null").unwrap();
        match expression {
            FilterExpression::Or(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(&terms[0], FilterExpression::And(inner) if inner.len() == 2));
                assert_eq!(
                    terms[1],
                    FilterExpression::Compare {
                        path: "status".to_string(),
                        operator: ComparisonOperator::Equal,
                        value: Value::Null,
                    }
                );
            }
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_parse_filter_functions_and_lists() {
        assert_eq!(
            parse_filter("startswith(name,'O''Brien')").unwrap(),
            FilterExpression::Compare {
                path: "name".to_string(),
                operator: ComparisonOperator::StartsWith,
                value: json!("O'Brien"),
            }
        );
        assert_eq!(
            parse_filter("id not in (1, 2)").unwrap(),
            FilterExpression::Compare {
                path: "id".to_string(),
                operator: ComparisonOperator::NotIn,
                value: json!([1, 2]),
            }
        );
        assert!(matches!(
            parse_filter("not (price le -1.5)").unwrap(),
            FilterExpression::Not(_)
        ));
    }

    #[test]
    fn test_parse_filter_errors() {
        assert!(parse_filter("name eq").is_err());
        assert!(parse_filter("name like 'x'").is_err());
        assert!(parse_filter("name eq 'x").is_err());
        assert!(parse_filter("(name eq 'x'").is_err());
    }

    #[test]
    fn test_select_items() {
        assert_eq!(
            SelectItem::parse("customer/name as customerName").unwrap(),
            SelectItem {
                path: "customer/name".to_string(),
                aggregate: None,
                alias: Some("customerName".to_string()),
            }
        );
        let item = SelectItem::parse("count(id) as total").unwrap();
        assert_eq!(item.aggregate, Some(AggregateFunction::Count));
        assert_eq!(item.path, "id");
        assert!(SelectItem::parse("median(id)").is_err());
    }

    #[test]
    fn test_expand_options() {
        let options = ExpandOption::parse_list(
            "customer, orders($select=id,total;$orderby=total desc;$top=5)",
        )
        .unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0], ExpandOption::new("customer"));
        assert_eq!(options[1].name, "orders");
        assert_eq!(options[1].params.select.as_deref(), Some("id,total"));
        assert_eq!(options[1].params.order_by.as_deref(), Some("total desc"));
        assert_eq!(options[1].params.top, Some(5));
    }
}
