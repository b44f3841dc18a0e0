//! Parser from loosely-typed JSON filter mappings into filter ASTs.
//!
//! # Metadata filters
//!
//! - `{"field": value}`: equality
//! - `{"field": {"$gte": 1, "$lt": 5}}`: several operators on one field (implicit AND)
//! - `{"a": 1, "b": 2}`: several fields (implicit AND)
//! - `{"$and": [..]}`, `{"$or": [..]}`, `{"$not": {..}}`
//!
//! # Document filters
//!
//! - `{"$contains": "text"}`, `{"$regex": "pattern"}`
//! - `{"$and": [..]}`, `{"$or": [..]}`, `{"$not": {..}}`
//!
//! # Limits
//!
//! - Maximum nesting depth: 32 levels by default

use serde_json::{Map, Value};

use super::{
    ComparisonOperator, DocumentFilterNode, FieldCondition, FilterNode, FilterValue, Scalar,
};
use crate::error::{SearchError, SearchResult};

/// Maximum allowed nesting depth of `$and` / `$or` / `$not` operators.
pub const MAX_FILTER_DEPTH: usize = 32;

/// Parse a metadata filter with the default depth limit.
///
/// Returns `Ok(None)` for `null` or an empty mapping: no predicate at all.
///
/// # Errors
///
/// Returns [`SearchError::InvalidFilter`] naming the offending key when the
/// filter uses an unknown operator, has a malformed shape, or nests deeper than
/// [`MAX_FILTER_DEPTH`].
pub fn parse_filter(value: &Value) -> SearchResult<Option<FilterNode>> {
    FilterParser::default().parse(value)
}

/// Parse a document filter with the default depth limit.
pub fn parse_document_filter(value: &Value) -> SearchResult<Option<DocumentFilterNode>> {
    FilterParser::default().parse_document(value)
}

/// Filter parser with a configurable nesting limit.
#[derive(Debug, Clone, Copy)]
pub struct FilterParser {
    max_depth: usize,
}

impl Default for FilterParser {
    fn default() -> Self {
        Self {
            max_depth: MAX_FILTER_DEPTH,
        }
    }
}

impl FilterParser {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn parse(&self, value: &Value) -> SearchResult<Option<FilterNode>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            Value::Object(map) => self.parse_mapping(map, 0).map(Some),
            _ => Err(SearchError::invalid_filter("$", "filter must be a mapping")),
        }
    }

    pub fn parse_document(&self, value: &Value) -> SearchResult<Option<DocumentFilterNode>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            Value::Object(map) => self.parse_document_mapping(map, 0).map(Some),
            _ => Err(SearchError::invalid_filter(
                "$",
                "document filter must be a mapping",
            )),
        }
    }

    fn enter_scope(&self, key: &str, depth: usize) -> SearchResult<usize> {
        let depth = depth + 1;
        if depth > self.max_depth {
            return Err(SearchError::invalid_filter(
                key,
                format!("filter exceeds maximum nesting depth ({})", self.max_depth),
            ));
        }
        Ok(depth)
    }

    fn parse_mapping(&self, map: &Map<String, Value>, depth: usize) -> SearchResult<FilterNode> {
        let mut nodes = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" => {
                    let children = self.parse_children(key, value, depth)?;
                    nodes.push(FilterNode::And(children));
                }
                "$or" => {
                    let children = self.parse_children(key, value, depth)?;
                    nodes.push(FilterNode::Or(children));
                }
                "$not" => {
                    let depth = self.enter_scope(key, depth)?;
                    let child = self.parse_nested(key, value, depth)?;
                    nodes.push(FilterNode::not(child));
                }
                op if op.starts_with('$') => {
                    return Err(SearchError::invalid_filter(
                        op,
                        "unsupported logical operator",
                    ));
                }
                field => nodes.extend(parse_field(field, value)?),
            }
        }
        Ok(collapse(nodes))
    }

    fn parse_children(
        &self,
        key: &str,
        value: &Value,
        depth: usize,
    ) -> SearchResult<Vec<FilterNode>> {
        let depth = self.enter_scope(key, depth)?;
        let items = expect_list(key, value)?;
        items
            .iter()
            .map(|item| self.parse_nested(key, item, depth))
            .collect()
    }

    fn parse_nested(&self, key: &str, value: &Value, depth: usize) -> SearchResult<FilterNode> {
        match value {
            Value::Object(map) if !map.is_empty() => self.parse_mapping(map, depth),
            Value::Object(_) => Err(SearchError::invalid_filter(key, "empty filter mapping")),
            _ => Err(SearchError::invalid_filter(key, "expected a filter mapping")),
        }
    }

    fn parse_document_mapping(
        &self,
        map: &Map<String, Value>,
        depth: usize,
    ) -> SearchResult<DocumentFilterNode> {
        let mut nodes = Vec::with_capacity(map.len());
        for (key, value) in map {
            let node = match key.as_str() {
                "$contains" => DocumentFilterNode::Contains(expect_text(key, value)?),
                "$regex" => DocumentFilterNode::Regex(expect_text(key, value)?),
                "$and" | "$or" => {
                    let depth = self.enter_scope(key, depth)?;
                    let children = expect_list(key, value)?
                        .iter()
                        .map(|item| self.parse_document_nested(key, item, depth))
                        .collect::<SearchResult<Vec<_>>>()?;
                    if key == "$and" {
                        DocumentFilterNode::And(children)
                    } else {
                        DocumentFilterNode::Or(children)
                    }
                }
                "$not" => {
                    let depth = self.enter_scope(key, depth)?;
                    let child = self.parse_document_nested(key, value, depth)?;
                    DocumentFilterNode::Not(Box::new(child))
                }
                other => {
                    return Err(SearchError::invalid_filter(
                        other,
                        "unsupported document operator",
                    ));
                }
            };
            nodes.push(node);
        }
        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            DocumentFilterNode::And(nodes)
        })
    }

    fn parse_document_nested(
        &self,
        key: &str,
        value: &Value,
        depth: usize,
    ) -> SearchResult<DocumentFilterNode> {
        match value {
            Value::Object(map) if !map.is_empty() => self.parse_document_mapping(map, depth),
            Value::Object(_) => Err(SearchError::invalid_filter(key, "empty filter mapping")),
            _ => Err(SearchError::invalid_filter(key, "expected a filter mapping")),
        }
    }
}

/// Parse the value side of `field: value`, producing one condition per operator.
fn parse_field(field: &str, value: &Value) -> SearchResult<Vec<FilterNode>> {
    let ops = match value {
        Value::Object(ops) => ops,
        scalar => {
            let cond =
                FieldCondition::new(field, ComparisonOperator::Eq, expect_scalar(field, scalar)?);
            cond.validate()?;
            return Ok(vec![FilterNode::Condition(cond)]);
        }
    };
    if ops.is_empty() {
        return Err(SearchError::invalid_filter(field, "operator mapping is empty"));
    }

    let mut nodes = Vec::with_capacity(ops.len());
    for (token, operand) in ops {
        let operator = ComparisonOperator::from_token(token).ok_or_else(|| {
            SearchError::invalid_filter(token, "unsupported comparison operator")
        })?;
        let value = if operator.takes_list() {
            let items = expect_list(token, operand)?
                .iter()
                .map(|item| expect_scalar(token, item))
                .collect::<SearchResult<Vec<_>>>()?;
            FilterValue::List(items)
        } else {
            FilterValue::Scalar(expect_scalar(token, operand)?)
        };
        let cond = FieldCondition {
            field: field.to_string(),
            operator,
            value,
        };
        cond.validate()?;
        nodes.push(FilterNode::Condition(cond));
    }
    Ok(nodes)
}

fn collapse(mut nodes: Vec<FilterNode>) -> FilterNode {
    if nodes.len() == 1 {
        nodes.remove(0)
    } else {
        FilterNode::And(nodes)
    }
}

fn expect_list<'a>(key: &str, value: &'a Value) -> SearchResult<&'a Vec<Value>> {
    match value {
        Value::Array(items) if items.is_empty() => {
            Err(SearchError::invalid_filter(key, "requires a non-empty list"))
        }
        Value::Array(items) => Ok(items),
        _ => Err(SearchError::invalid_filter(key, "requires a list")),
    }
}

fn expect_scalar(key: &str, value: &Value) -> SearchResult<Scalar> {
    Scalar::from_json(value).ok_or_else(|| {
        let kind = match value {
            Value::Null => "null is not a comparable value",
            _ => "value must be a string, number or boolean",
        };
        SearchError::invalid_filter(key, kind)
    })
}

fn expect_text(key: &str, value: &Value) -> SearchResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(SearchError::invalid_filter(key, "requires a string")),
    }
}
