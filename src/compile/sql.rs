//! Filter AST to SQL WHERE-clause translation.
//!
//! Metadata fields live in a JSON column and are addressed with
//! `JSON_EXTRACT(metadata,'$.<field>')`. Document predicates address the
//! document column directly.
//!
//! | Filter                | SQL                                          |
//! |-----------------------|----------------------------------------------|
//! | `{"f": v}`            | `(JSON_EXTRACT(metadata,'$.f')) = ?`         |
//! | `{"f": {"$in": [..]}}`| `(JSON_EXTRACT(metadata,'$.f')) IN (?, ?)`   |
//! | `{"$and": [a, b]}`    | `(a AND b)`                                  |
//! | `{"$not": a}`         | `NOT (a)`                                    |
//! | `{"$contains": "x"}`  | `document LIKE ?` bound to `%x%`             |
//! | `{"$regex": "x"}`     | `document REGEXP ?`                          |
//!
//! Only validated field names are written into the SQL text; every value is a
//! bind parameter.

use serde::Serialize;
use tracing::debug;

use crate::{
    error::{SearchError, SearchResult},
    filter::{
        ComparisonOperator, DocumentFilterNode, FieldCondition, FilterNode, FilterValue, Scalar,
        json_path,
    },
};

/// SQL WHERE-clause fragment and its bind values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPredicate {
    /// Fragment without the `WHERE` keyword, e.g. `(JSON_EXTRACT(metadata,'$.a')) = ?`
    pub clause: String,
    /// Bind values in placeholder order
    pub args: Vec<SqlValue>,
}

impl CompiledPredicate {
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }

    /// The clause prefixed with `WHERE `, or an empty string when there is no
    /// predicate.
    pub fn where_clause(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clause)
        }
    }
}

/// SQL bind value types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&Scalar> for SqlValue {
    fn from(s: &Scalar) -> Self {
        match s {
            Scalar::String(s) => Self::String(s.clone()),
            Scalar::Int(i) => Self::Int(*i),
            Scalar::Float(f) => Self::Float(*f),
            Scalar::Bool(b) => Self::Bool(*b),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// Compiles filter ASTs into parameterized SQL predicates.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    metadata_column: String,
    document_column: String,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new("metadata", "document")
    }
}

impl SqlCompiler {
    pub fn new(metadata_column: impl Into<String>, document_column: impl Into<String>) -> Self {
        Self {
            metadata_column: metadata_column.into(),
            document_column: document_column.into(),
        }
    }

    /// Compile a metadata filter. `None` compiles to an empty predicate.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let filter = parse_filter(&json!({"category": "AI"}))?;
    /// let predicate = SqlCompiler::default().compile(filter.as_ref())?;
    /// assert_eq!(predicate.clause, "(JSON_EXTRACT(metadata,'$.category')) = ?");
    /// ```
    pub fn compile(&self, filter: Option<&FilterNode>) -> SearchResult<CompiledPredicate> {
        let Some(filter) = filter else {
            return Ok(CompiledPredicate::default());
        };
        let mut ctx = TranslationContext::new(self);
        let clause = ctx.translate_filter(filter)?;
        debug!(
            stage = "sql_compile",
            placeholders = ctx.args.len(),
            "Compiled metadata filter"
        );
        Ok(CompiledPredicate {
            clause,
            args: ctx.args,
        })
    }

    /// Compile a document filter. `None` compiles to an empty predicate.
    pub fn compile_document(
        &self,
        filter: Option<&DocumentFilterNode>,
    ) -> SearchResult<CompiledPredicate> {
        let Some(filter) = filter else {
            return Ok(CompiledPredicate::default());
        };
        let mut ctx = TranslationContext::new(self);
        let clause = ctx.translate_document(filter);
        debug!(
            stage = "sql_compile",
            placeholders = ctx.args.len(),
            "Compiled document filter"
        );
        Ok(CompiledPredicate {
            clause,
            args: ctx.args,
        })
    }

    fn field_expr(&self, field: &str) -> String {
        format!("(JSON_EXTRACT({},'{}'))", self.metadata_column, json_path(field))
    }
}

/// Join predicates with `AND`, skipping empty ones. Args are concatenated in
/// the same order so placeholders stay aligned.
pub fn combine_predicates<I>(predicates: I) -> CompiledPredicate
where
    I: IntoIterator<Item = CompiledPredicate>,
{
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    for predicate in predicates {
        if predicate.is_empty() {
            continue;
        }
        clauses.push(predicate.clause);
        args.extend(predicate.args);
    }
    CompiledPredicate {
        clause: clauses.join(" AND "),
        args,
    }
}

/// Escape `%`, `_` and `\` so the text matches literally inside a LIKE pattern.
pub fn escape_like_pattern(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }
    result
}

struct TranslationContext<'a> {
    compiler: &'a SqlCompiler,
    args: Vec<SqlValue>,
}

impl<'a> TranslationContext<'a> {
    fn new(compiler: &'a SqlCompiler) -> Self {
        Self {
            compiler,
            args: Vec::new(),
        }
    }

    /// Add a binding and return the placeholder.
    fn add_binding(&mut self, value: SqlValue) -> &'static str {
        self.args.push(value);
        "?"
    }

    fn translate_filter(&mut self, filter: &FilterNode) -> SearchResult<String> {
        match filter {
            FilterNode::Condition(cond) => self.translate_condition(cond),
            FilterNode::And(children) => self.translate_group(children, " AND "),
            FilterNode::Or(children) => self.translate_group(children, " OR "),
            FilterNode::Not(inner) => {
                let inner_sql = self.translate_filter(inner)?;
                if inner_sql.is_empty() {
                    return Ok(String::new());
                }
                Ok(format!("NOT ({})", inner_sql))
            }
        }
    }

    fn translate_group(&mut self, children: &[FilterNode], joiner: &str) -> SearchResult<String> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            let sql = self.translate_filter(child)?;
            if !sql.is_empty() {
                parts.push(sql);
            }
        }
        Ok(match parts.len() {
            0 => String::new(),
            1 => parts.remove(0),
            _ => format!("({})", parts.join(joiner)),
        })
    }

    fn translate_condition(&mut self, cond: &FieldCondition) -> SearchResult<String> {
        cond.validate()?;
        let col = self.compiler.field_expr(&cond.field);

        match (&cond.value, cond.operator) {
            (FilterValue::List(items), ComparisonOperator::In | ComparisonOperator::Nin) => {
                let placeholders = items
                    .iter()
                    .map(|item| self.add_binding(item.into()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let keyword = if cond.operator == ComparisonOperator::In {
                    "IN"
                } else {
                    "NOT IN"
                };
                Ok(format!("{} {} ({})", col, keyword, placeholders))
            }
            (FilterValue::Scalar(value), op) => {
                let sql_op = match op {
                    ComparisonOperator::Eq => "=",
                    ComparisonOperator::Ne => "!=",
                    ComparisonOperator::Gt => ">",
                    ComparisonOperator::Gte => ">=",
                    ComparisonOperator::Lt => "<",
                    ComparisonOperator::Lte => "<=",
                    // validate() rejects scalar $in/$nin
                    ComparisonOperator::In | ComparisonOperator::Nin => {
                        return Err(SearchError::invalid_filter(
                            op.token(),
                            "requires a list value",
                        ));
                    }
                };
                let placeholder = self.add_binding(value.into());
                Ok(format!("{} {} {}", col, sql_op, placeholder))
            }
            (FilterValue::List(_), op) => Err(SearchError::invalid_filter(
                op.token(),
                "requires a scalar value",
            )),
        }
    }

    fn translate_document(&mut self, filter: &DocumentFilterNode) -> String {
        let compiler = self.compiler;
        let col = &compiler.document_column;
        match filter {
            DocumentFilterNode::Contains(text) => {
                let escaped = escape_like_pattern(text);
                let placeholder = self.add_binding(SqlValue::String(format!("%{}%", escaped)));
                format!("{} LIKE {}", col, placeholder)
            }
            DocumentFilterNode::Regex(pattern) => {
                let placeholder = self.add_binding(SqlValue::String(pattern.clone()));
                format!("{} REGEXP {}", col, placeholder)
            }
            DocumentFilterNode::And(children) => self.translate_document_group(children, " AND "),
            DocumentFilterNode::Or(children) => self.translate_document_group(children, " OR "),
            DocumentFilterNode::Not(inner) => {
                let inner_sql = self.translate_document(inner);
                if inner_sql.is_empty() {
                    return inner_sql;
                }
                format!("NOT ({})", inner_sql)
            }
        }
    }

    fn translate_document_group(
        &mut self,
        children: &[DocumentFilterNode],
        joiner: &str,
    ) -> String {
        let mut parts: Vec<String> = children
            .iter()
            .map(|child| self.translate_document(child))
            .filter(|sql| !sql.is_empty())
            .collect();
        match parts.len() {
            0 => String::new(),
            1 => parts.remove(0),
            _ => format!("({})", parts.join(joiner)),
        }
    }
}
