//! Filter AST to hybrid-search descriptor translation.
//!
//! The server-side hybrid-search procedure takes a JSON `search_parm` whose
//! filters use a term/range/bool grammar:
//!
//! ```json
//! {"term": {"category": "AI"}}
//! {"range": {"score": {"gte": 90, "lte": 100}}}
//! {"bool": {"must": [..], "should": [..], "must_not": [..], "filter": [..]}}
//! {"query_string": {"fields": ["document"], "query": "machine learning"}}
//! ```
//!
//! Unlike SQL, the descriptor grammar needs same-field bounds folded into one
//! `range` object, so folding happens here per conjunctive group.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    error::{SearchError, SearchResult},
    filter::{
        ComparisonOperator, DocumentFilterNode, FieldCondition, FilterNode, FilterValue, Scalar,
        json_path,
    },
};

/// A single descriptor node (`term`, `range`, `bool` or `query_string`).
pub type SearchClause = Value;

/// How metadata fields are named in descriptor clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStyle {
    /// `{"term": {"category": "AI"}}`
    #[default]
    Plain,
    /// `{"term": {"(JSON_EXTRACT(metadata, '$.category'))": "AI"}}`
    JsonExtract,
}

/// Compiles filter ASTs into `search_parm` clauses.
#[derive(Debug, Clone)]
pub struct DescriptorCompiler {
    field_style: FieldStyle,
    metadata_column: String,
    document_field: String,
}

impl Default for DescriptorCompiler {
    fn default() -> Self {
        Self {
            field_style: FieldStyle::Plain,
            metadata_column: "metadata".to_string(),
            document_field: "document".to_string(),
        }
    }
}

impl DescriptorCompiler {
    pub fn new(
        field_style: FieldStyle,
        metadata_column: impl Into<String>,
        document_field: impl Into<String>,
    ) -> Self {
        Self {
            field_style,
            metadata_column: metadata_column.into(),
            document_field: document_field.into(),
        }
    }

    pub fn with_field_style(mut self, field_style: FieldStyle) -> Self {
        self.field_style = field_style;
        self
    }

    /// Compile a metadata filter into a flat list of clauses that all must
    /// hold. A root `$and` is spread into the list.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let filter = parse_filter(&json!({"$or": [{"score": {"$gte": 90}}, {"tag": "ml"}]}))?;
    /// let clauses = DescriptorCompiler::default().compile(filter.as_ref())?;
    /// // [{"bool": {"should": [{"range": {"score": {"gte": 90}}}, {"term": {"tag": "ml"}}]}}]
    /// ```
    pub fn compile(&self, filter: Option<&FilterNode>) -> SearchResult<Vec<SearchClause>> {
        let clauses = match filter {
            None => Vec::new(),
            Some(FilterNode::And(children)) => self.compile_group(children)?,
            Some(node) => self.compile_node(node)?.into_iter().collect(),
        };
        debug!(
            stage = "descriptor_compile",
            clauses = clauses.len(),
            "Compiled metadata filter"
        );
        Ok(clauses)
    }

    /// Compile a document filter into one full-text clause.
    ///
    /// # Errors
    ///
    /// `$regex` has no full-text equivalent and fails with
    /// [`SearchError::UnsupportedInTarget`] wherever it appears.
    pub fn compile_document(
        &self,
        filter: Option<&DocumentFilterNode>,
    ) -> SearchResult<Option<SearchClause>> {
        match filter {
            None => Ok(None),
            Some(node) => self.compile_document_node(node),
        }
    }

    /// Compile the children of a conjunctive group, folding same-field bounds.
    ///
    /// Nested `$and` children are spread into the group first, so bounds on
    /// one field fold together however the conjunction was written.
    fn compile_group(&self, children: &[FilterNode]) -> SearchResult<Vec<SearchClause>> {
        let mut members = Vec::with_capacity(children.len());
        flatten_conjunction(children, &mut members);

        let mut out: Vec<SearchClause> = Vec::with_capacity(members.len());
        // field -> index of the range clause still accepting bounds
        let mut open_ranges: HashMap<&str, usize> = HashMap::new();

        for child in members {
            let FilterNode::Condition(cond) = child else {
                out.extend(self.compile_node(child)?);
                continue;
            };
            if !cond.operator.is_range() {
                out.extend(self.compile_node(child)?);
                continue;
            }

            cond.validate()?;
            let bound = bound_key(cond.operator);
            let value = scalar_value(cond)?;
            let key = self.field_key(&cond.field);

            let existing = open_ranges
                .get(cond.field.as_str())
                .and_then(|&idx| out.get_mut(idx))
                .and_then(|clause| clause.pointer_mut(&range_pointer(&key)))
                .and_then(Value::as_object_mut);
            match existing {
                Some(bounds) if !bounds.contains_key(bound) => {
                    bounds.insert(bound.to_string(), value);
                }
                _ => {
                    open_ranges.insert(cond.field.as_str(), out.len());
                    out.push(range_clause(key, bound, value));
                }
            }
        }
        Ok(out)
    }

    fn compile_node(&self, node: &FilterNode) -> SearchResult<Option<SearchClause>> {
        match node {
            FilterNode::Condition(cond) => self.compile_condition(cond).map(Some),
            FilterNode::And(children) => {
                let mut clauses = self.compile_group(children)?;
                Ok(match clauses.len() {
                    0 => None,
                    1 => clauses.pop(),
                    _ => Some(bool_clause("must", clauses)),
                })
            }
            FilterNode::Or(children) => {
                let mut clauses = Vec::with_capacity(children.len());
                for child in children {
                    clauses.extend(self.compile_node(child)?);
                }
                Ok((!clauses.is_empty()).then(|| bool_clause("should", clauses)))
            }
            FilterNode::Not(child) => Ok(self
                .compile_node(child)?
                .map(|clause| bool_clause("must_not", vec![clause]))),
        }
    }

    fn compile_condition(&self, cond: &FieldCondition) -> SearchResult<SearchClause> {
        cond.validate()?;
        let key = self.field_key(&cond.field);

        Ok(match (cond.operator, &cond.value) {
            (ComparisonOperator::In, FilterValue::List(items)) => {
                bool_clause("should", terms(&key, items))
            }
            (ComparisonOperator::Nin, FilterValue::List(items)) => {
                bool_clause("must_not", terms(&key, items))
            }
            (ComparisonOperator::Eq, FilterValue::Scalar(v)) => term_clause(&key, v),
            (ComparisonOperator::Ne, FilterValue::Scalar(v)) => {
                bool_clause("must_not", vec![term_clause(&key, v)])
            }
            (op, _) if op.is_range() => range_clause(key, bound_key(op), scalar_value(cond)?),
            (op, _) => {
                return Err(SearchError::invalid_filter(
                    op.token(),
                    "value shape does not match operator",
                ));
            }
        })
    }

    fn compile_document_node(
        &self,
        node: &DocumentFilterNode,
    ) -> SearchResult<Option<SearchClause>> {
        match node {
            DocumentFilterNode::Contains(text) => Ok(Some(self.query_string(text.clone()))),
            DocumentFilterNode::Regex(_) => Err(SearchError::UnsupportedInTarget {
                operator: "$regex",
                target: "hybrid search",
            }),
            DocumentFilterNode::And(children) => {
                self.compile_document_group(children, " ", "must")
            }
            DocumentFilterNode::Or(children) => {
                self.compile_document_group(children, " OR ", "should")
            }
            DocumentFilterNode::Not(child) => Ok(self
                .compile_document_node(child)?
                .map(|clause| bool_clause("must_not", vec![clause]))),
        }
    }

    /// Merge the `$contains` children of a group into one query string and wrap
    /// whatever else is left in a bool clause next to it.
    fn compile_document_group(
        &self,
        children: &[DocumentFilterNode],
        joiner: &str,
        occur: &str,
    ) -> SearchResult<Option<SearchClause>> {
        let mut texts = Vec::new();
        let mut others = Vec::new();
        for child in children {
            match child {
                DocumentFilterNode::Contains(text) => texts.push(text.as_str()),
                other => others.extend(self.compile_document_node(other)?),
            }
        }

        let merged = (!texts.is_empty()).then(|| self.query_string(texts.join(joiner)));
        Ok(match (merged, others.is_empty()) {
            (merged, true) => merged,
            (Some(merged), false) => {
                others.insert(0, merged);
                Some(bool_clause(occur, others))
            }
            (None, false) => Some(bool_clause(occur, others)),
        })
    }

    fn query_string(&self, query: String) -> SearchClause {
        json!({
            "query_string": {
                "fields": [self.document_field],
                "query": query
            }
        })
    }

    fn field_key(&self, field: &str) -> String {
        match self.field_style {
            FieldStyle::Plain => field.to_string(),
            FieldStyle::JsonExtract => {
                format!("(JSON_EXTRACT({}, '{}'))", self.metadata_column, json_path(field))
            }
        }
    }
}

fn flatten_conjunction<'a>(children: &'a [FilterNode], out: &mut Vec<&'a FilterNode>) {
    for child in children {
        match child {
            FilterNode::And(nested) => flatten_conjunction(nested, out),
            other => out.push(other),
        }
    }
}

fn bound_key(op: ComparisonOperator) -> &'static str {
    match op {
        ComparisonOperator::Gt => "gt",
        ComparisonOperator::Gte => "gte",
        ComparisonOperator::Lt => "lt",
        _ => "lte",
    }
}

fn scalar_value(cond: &FieldCondition) -> SearchResult<Value> {
    match &cond.value {
        FilterValue::Scalar(v) => Ok(v.to_json()),
        FilterValue::List(_) => Err(SearchError::invalid_filter(
            cond.operator.token(),
            "requires a scalar value",
        )),
    }
}

/// JSON pointer to the bounds object of `{"range": {key: {..}}}`.
fn range_pointer(key: &str) -> String {
    // RFC 6901 escaping
    format!("/range/{}", key.replace('~', "~0").replace('/', "~1"))
}

fn term_clause(key: &str, value: &Scalar) -> SearchClause {
    json!({ "term": { key: value.to_json() } })
}

fn terms(key: &str, items: &[Scalar]) -> Vec<SearchClause> {
    items.iter().map(|v| term_clause(key, v)).collect()
}

fn range_clause(key: String, bound: &str, value: Value) -> SearchClause {
    json!({ "range": { key: { bound: value } } })
}

fn bool_clause(occur: &str, clauses: Vec<SearchClause>) -> SearchClause {
    json!({ "bool": { occur: clauses } })
}
