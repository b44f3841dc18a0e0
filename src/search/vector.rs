//! Statement builders for the direct query/get paths.
//!
//! ANN statements inline the query vector as a literal (`'[0.1,0.2]'`) because
//! the distance functions don't accept a bound vector. The literal is built
//! from `f32` values only. Everything else, filter values and limits included,
//! stays a bind parameter.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    compile::{CompiledPredicate, SqlValue, combine_predicates},
    error::{SearchError, SearchResult},
};

/// Prefix of the table backing each collection.
pub const TABLE_NAME_PREFIX: &str = "c$v1$";

/// Limit used by [`GetQuery`] when the caller passes 0.
pub const DEFAULT_GET_LIMIT: usize = 1000;

/// Name of the table backing `collection`.
pub fn table_name(collection: &str) -> String {
    format!("{}{}", TABLE_NAME_PREFIX, collection)
}

pub fn count_statement(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", table)
}

/// Distance metric for vector similarity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean distance.
    L2,
    /// Cosine distance (default).
    #[default]
    Cosine,
    /// Inner product.
    InnerProduct,
}

impl DistanceMetric {
    /// SQL distance function for this metric.
    pub fn sql_function(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2_distance",
            DistanceMetric::Cosine => "cosine_distance",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }
}

/// Column names of a collection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnNames {
    #[serde(default = "default_id_column")]
    pub id: String,
    #[serde(default = "default_document_column")]
    pub document: String,
    #[serde(default = "default_metadata_column")]
    pub metadata: String,
    #[serde(default = "default_embedding_column")]
    pub embedding: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            id: default_id_column(),
            document: default_document_column(),
            metadata: default_metadata_column(),
            embedding: default_embedding_column(),
        }
    }
}

fn default_id_column() -> String {
    "_id".to_string()
}

fn default_document_column() -> String {
    "document".to_string()
}

fn default_metadata_column() -> String {
    "metadata".to_string()
}

fn default_embedding_column() -> String {
    "embedding".to_string()
}

impl ColumnNames {
    fn select_list(&self) -> String {
        format!(
            "{}, {}, {}, {}",
            self.id, self.document, self.metadata, self.embedding
        )
    }
}

/// SQL text plus bind values, ready for a [`SqlExecutor`](crate::collection::SqlExecutor).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

/// Format a vector as the literal accepted by the distance functions.
///
/// Uses Rust's shortest round-trip float formatting: `[0.1,2,-3.5]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let values: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

/// Builds approximate-nearest-neighbor statements for one table.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    table: String,
    columns: ColumnNames,
}

impl VectorQuery {
    pub fn new(table: impl Into<String>, columns: ColumnNames) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// Build an ANN statement ordered by `distance` to `vector`.
    ///
    /// `filter` args are bound before the trailing `LIMIT ?`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidParameter`] for an empty vector, a
    /// non-finite component or a zero limit.
    pub fn build(
        &self,
        distance: DistanceMetric,
        vector: &[f32],
        filter: Option<&CompiledPredicate>,
        limit: usize,
    ) -> SearchResult<Statement> {
        if vector.is_empty() {
            return Err(SearchError::InvalidParameter(
                "query vector must not be empty".into(),
            ));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::InvalidParameter(
                "query vector contains a non-finite value".into(),
            ));
        }
        if limit == 0 {
            return Err(SearchError::InvalidParameter(
                "limit must be greater than 0".into(),
            ));
        }

        let distance_expr = format!(
            "{}({}, '{}')",
            distance.sql_function(),
            self.columns.embedding,
            vector_literal(vector)
        );
        let mut sql = format!(
            "SELECT {}, {} AS distance FROM {}",
            self.columns.select_list(),
            distance_expr,
            self.table
        );
        let mut args = Vec::new();
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            sql.push(' ');
            sql.push_str(&filter.where_clause());
            args.extend(filter.args.iter().cloned());
        }
        sql.push_str(&format!(" ORDER BY {} APPROXIMATE LIMIT ?", distance_expr));
        args.push(bind_count("limit", limit)?);

        debug!(
            stage = "vector_query_built",
            table = %self.table,
            dimension = vector.len(),
            args = args.len(),
            "Built ANN statement"
        );
        Ok(Statement { sql, args })
    }
}

/// Builds `get`/`peek` statements for one table.
#[derive(Debug, Clone)]
pub struct GetQuery {
    table: String,
    columns: ColumnNames,
    default_limit: usize,
}

impl GetQuery {
    pub fn new(table: impl Into<String>, columns: ColumnNames) -> Self {
        Self {
            table: table.into(),
            columns,
            default_limit: DEFAULT_GET_LIMIT,
        }
    }

    pub fn with_default_limit(mut self, default_limit: usize) -> Self {
        self.default_limit = default_limit;
        self
    }

    /// Build a statement selecting rows by id and/or filter.
    ///
    /// A `limit` of 0 uses the default limit. `LIMIT ? OFFSET ?` are always the
    /// last two bind values.
    ///
    /// Fails with [`SearchError::InvalidParameter`] when `limit` or `offset`
    /// does not fit a signed 64-bit bind value.
    pub fn build(
        &self,
        ids: &[String],
        filter: Option<&CompiledPredicate>,
        limit: usize,
        offset: usize,
    ) -> SearchResult<Statement> {
        let id_predicate = if ids.is_empty() {
            CompiledPredicate::default()
        } else {
            CompiledPredicate {
                clause: format!(
                    "{} IN ({})",
                    self.columns.id,
                    vec!["?"; ids.len()].join(", ")
                ),
                args: ids.iter().map(|id| SqlValue::String(id.clone())).collect(),
            }
        };
        let predicate = combine_predicates([id_predicate, filter.cloned().unwrap_or_default()]);

        let mut sql = format!(
            "SELECT {} FROM {}",
            self.columns.select_list(),
            self.table
        );
        if !predicate.is_empty() {
            sql.push(' ');
            sql.push_str(&predicate.where_clause());
        }
        sql.push_str(" LIMIT ? OFFSET ?");

        let limit = if limit == 0 { self.default_limit } else { limit };
        let mut args = predicate.args;
        args.push(bind_count("limit", limit)?);
        args.push(bind_count("offset", offset)?);

        Ok(Statement { sql, args })
    }
}

fn bind_count(name: &str, value: usize) -> SearchResult<SqlValue> {
    i64::try_from(value)
        .map(SqlValue::Int)
        .map_err(|_| SearchError::InvalidParameter(format!("{name} {value} is out of range")))
}
