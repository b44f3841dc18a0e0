//! Filter types for metadata and document predicates.
//!
//! Filters are written by callers as JSON mappings and parsed once, at the
//! boundary, into the closed ASTs defined here. Both compilers
//! ([`SqlCompiler`](crate::compile::SqlCompiler) and
//! [`DescriptorCompiler`](crate::compile::DescriptorCompiler)) walk the same
//! tree.
//!
//! # Filter Types
//!
//! - [`FilterNode`]: predicate over JSON metadata attributes
//! - [`DocumentFilterNode`]: predicate over the document text
//!
//! # Example
//!
//! ```json
//! {
//!   "$and": [
//!     { "category": "AI" },
//!     { "score": { "$gte": 90, "$lte": 100 } },
//!     { "tag": { "$in": ["ml", "python"] } }
//!   ]
//! }
//! ```

mod parse;

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use parse::{FilterParser, MAX_FILTER_DEPTH, parse_document_filter, parse_filter};

use crate::error::{SearchError, SearchResult};

/// Field names must be safe to embed in a JSON path: dot-separated segments of
/// letters, digits, `_` and `-`.
static FIELD_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{N}_-]+(?:\.[\p{L}\p{N}_-]+)*$").unwrap()
});

/// Segments that can appear unquoted in a JSON path.
static PATH_IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}_][\p{L}\p{N}_]*$").unwrap());

/// JSON path for a validated field name. Segments that are not identifiers
/// (`user-id`, `2024_score`) are double-quoted: `$.profile."user-id"`.
pub(crate) fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        if PATH_IDENTIFIER_REGEX.is_match(segment) {
            path.push('.');
            path.push_str(segment);
        } else {
            path.push_str(&format!(".\"{}\"", segment));
        }
    }
    path
}

/// Comparison operators for field conditions.
///
/// | Operator | Token  | Value  |
/// |----------|--------|--------|
/// | `Eq`     | `$eq`  | scalar |
/// | `Ne`     | `$ne`  | scalar |
/// | `Gt`     | `$gt`  | scalar |
/// | `Gte`    | `$gte` | scalar |
/// | `Lt`     | `$lt`  | scalar |
/// | `Lte`    | `$lte` | scalar |
/// | `In`     | `$in`  | list   |
/// | `Nin`    | `$nin` | list   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl ComparisonOperator {
    /// The `$`-prefixed token used in filter mappings.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::In => "$in",
            Self::Nin => "$nin",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$in" => Some(Self::In),
            "$nin" => Some(Self::Nin),
            _ => None,
        }
    }

    /// `$in` and `$nin` take a list; everything else takes a scalar.
    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::Nin)
    }

    /// Bound operators that can be folded into a single range expression.
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A single comparable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    /// Convert a JSON value, returning `None` for null, arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// Right-hand side of a field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Scalar(Scalar),
    /// Values for `$in` / `$nin`.
    List(Vec<Scalar>),
}

impl FilterValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(s) => s.to_json(),
            Self::List(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
        }
    }
}

/// Compares one metadata field against a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: FilterValue,
}

impl FieldCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Check the field name and that the value shape matches the operator.
    ///
    /// Conditions built through the parser are already valid; the compilers call
    /// this again so hand-built ASTs get the same guarantees.
    pub fn validate(&self) -> SearchResult<()> {
        if self.field.is_empty() {
            return Err(SearchError::invalid_filter(
                "",
                "field name must not be empty",
            ));
        }
        if !FIELD_NAME_REGEX.is_match(&self.field) {
            return Err(SearchError::invalid_filter(
                &self.field,
                "field name must be dot-separated segments of letters, digits, '_' or '-'",
            ));
        }
        match (&self.value, self.operator.takes_list()) {
            (FilterValue::List(items), true) if items.is_empty() => Err(
                SearchError::invalid_filter(
                    &self.field,
                    format!("{} requires a non-empty list", self.operator),
                ),
            ),
            (FilterValue::List(_), true) | (FilterValue::Scalar(_), false) => Ok(()),
            (FilterValue::Scalar(_), true) => Err(SearchError::invalid_filter(
                &self.field,
                format!("{} requires a list value", self.operator),
            )),
            (FilterValue::List(_), false) => Err(SearchError::invalid_filter(
                &self.field,
                format!("{} requires a scalar value", self.operator),
            )),
        }
    }
}

/// A metadata filter expression.
///
/// # Example
///
/// ```ignore
/// let filter = FilterNode::and(vec![
///     FilterNode::eq("category", "AI"),
///     FilterNode::gte("score", 90),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Condition(FieldCondition),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    fn condition(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self::Condition(FieldCondition::new(field, operator, value))
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::condition(field, ComparisonOperator::Eq, value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::condition(field, ComparisonOperator::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::condition(field, ComparisonOperator::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::condition(field, ComparisonOperator::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::condition(field, ComparisonOperator::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::condition(field, ComparisonOperator::Lte, value.into())
    }

    pub fn is_in<T: Into<Scalar>>(field: impl Into<String>, values: Vec<T>) -> Self {
        Self::condition(field, ComparisonOperator::In, FilterValue::from(values))
    }

    pub fn not_in<T: Into<Scalar>>(field: impl Into<String>, values: Vec<T>) -> Self {
        Self::condition(field, ComparisonOperator::Nin, FilterValue::from(values))
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::And(children)
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterNode) -> Self {
        Self::Not(Box::new(child))
    }

    /// Serialize back into the mapping form accepted by [`parse_filter`].
    ///
    /// Equality is always written with an explicit `$eq`, so parsing the result
    /// yields an equal tree.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Condition(c) => json!({
                (c.field.as_str()): { (c.operator.token()): c.value.to_json() }
            }),
            Self::And(children) => logical_value("$and", children.iter().map(Self::to_value)),
            Self::Or(children) => logical_value("$or", children.iter().map(Self::to_value)),
            Self::Not(child) => json!({ "$not": child.to_value() }),
        }
    }
}

/// A predicate over the document text.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFilterNode {
    /// Substring / full-text match.
    Contains(String),
    /// Regular-expression match. Not available in hybrid search.
    Regex(String),
    And(Vec<DocumentFilterNode>),
    Or(Vec<DocumentFilterNode>),
    Not(Box<DocumentFilterNode>),
}

impl DocumentFilterNode {
    pub fn contains(text: impl Into<String>) -> Self {
        Self::Contains(text.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex(pattern.into())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Contains(s) => json!({ "$contains": s }),
            Self::Regex(s) => json!({ "$regex": s }),
            Self::And(children) => logical_value("$and", children.iter().map(Self::to_value)),
            Self::Or(children) => logical_value("$or", children.iter().map(Self::to_value)),
            Self::Not(child) => json!({ "$not": child.to_value() }),
        }
    }
}

fn logical_value(key: &str, children: impl Iterator<Item = Value>) -> Value {
    json!({ key: children.collect::<Vec<_>>() })
}

// Convenience conversions
impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Scalar> for FilterValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for FilterValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_operator_tokens_round_trip() {
        for op in [
            ComparisonOperator::Eq,
            ComparisonOperator::Ne,
            ComparisonOperator::Gt,
            ComparisonOperator::Gte,
            ComparisonOperator::Lt,
            ComparisonOperator::Lte,
            ComparisonOperator::In,
            ComparisonOperator::Nin,
        ] {
            assert_eq!(ComparisonOperator::from_token(op.token()), Some(op));
        }
        assert_eq!(ComparisonOperator::from_token("$regex"), None);
        assert_eq!(ComparisonOperator::from_token("eq"), None);
    }

    #[test]
    fn test_scalar_from_json_keeps_integers() {
        assert_eq!(Scalar::from_json(&json!(90)), Some(Scalar::Int(90)));
        assert_eq!(Scalar::from_json(&json!(0.5)), Some(Scalar::Float(0.5)));
        assert_eq!(Scalar::from_json(&json!(true)), Some(Scalar::Bool(true)));
        assert_eq!(
            Scalar::from_json(&json!("AI")),
            Some(Scalar::String("AI".to_string()))
        );
        assert_eq!(Scalar::from_json(&json!(null)), None);
        assert_eq!(Scalar::from_json(&json!([1])), None);
        assert_eq!(Scalar::to_json(&Scalar::Int(90)), json!(90));
    }

    #[test]
    fn test_validate_rejects_empty_field() {
        let cond = FieldCondition::new("", ComparisonOperator::Eq, Scalar::from("x"));
        assert!(matches!(
            cond.validate(),
            Err(SearchError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_quote_in_field() {
        let cond = FieldCondition::new("a') OR 1=1 --", ComparisonOperator::Eq, Scalar::from(1));
        assert!(cond.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_nested_path() {
        let cond = FieldCondition::new("author.name", ComparisonOperator::Eq, Scalar::from("x"));
        assert!(cond.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_hyphen_and_leading_digit() {
        for field in ["user-id", "2024_score", "profile.user-id"] {
            let cond = FieldCondition::new(field, ComparisonOperator::Eq, Scalar::from(1));
            assert!(cond.validate().is_ok(), "{field} should be accepted");
        }
        for field in ["a b", "a..b", ".a", "a\"b", "a$b"] {
            let cond = FieldCondition::new(field, ComparisonOperator::Eq, Scalar::from(1));
            assert!(cond.validate().is_err(), "{field} should be rejected");
        }
    }

    #[test]
    fn test_json_path_quotes_non_identifier_segments() {
        assert_eq!(json_path("category"), "$.category");
        assert_eq!(json_path("author.name"), "$.author.name");
        assert_eq!(json_path("user-id"), r#"$."user-id""#);
        assert_eq!(json_path("stats.2024_score"), r#"$.stats."2024_score""#);
    }

    #[test]
    fn test_validate_list_arity() {
        let empty = FilterNode::is_in::<&str>("tag", vec![]);
        let scalar_in = FieldCondition::new("tag", ComparisonOperator::In, Scalar::from("ml"));
        let list_eq = FieldCondition::new("tag", ComparisonOperator::Eq, vec!["ml"]);

        match empty {
            FilterNode::Condition(c) => assert!(c.validate().is_err()),
            _ => panic!("Expected Condition variant"),
        }
        assert!(scalar_in.validate().is_err());
        assert!(list_eq.validate().is_err());
    }

    #[test]
    fn test_to_value_writes_explicit_eq() {
        let filter = FilterNode::and(vec![
            FilterNode::eq("category", "AI"),
            FilterNode::not(FilterNode::is_in("tag", vec!["ml", "nlp"])),
        ]);
        assert_eq!(
            filter.to_value(),
            json!({
                "$and": [
                    {"category": {"$eq": "AI"}},
                    {"$not": {"tag": {"$in": ["ml", "nlp"]}}}
                ]
            })
        );
    }

    #[test]
    fn test_document_to_value() {
        let filter = DocumentFilterNode::Or(vec![
            DocumentFilterNode::contains("python"),
            DocumentFilterNode::regex("^intro"),
        ]);
        assert_eq!(
            filter.to_value(),
            json!({"$or": [{"$contains": "python"}, {"$regex": "^intro"}]})
        );
    }
}
