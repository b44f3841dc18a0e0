//! Result types and row reduction.
//!
//! Rows from the hybrid-search procedure don't have a fixed schema: column
//! names depend on which sub-search surfaced a row. Columns are therefore
//! looked up case-insensitively through a list of aliases, and a missing
//! column yields the default value instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::collection::RowSet;

/// Arbitrary JSON metadata attached to a document.
pub type Metadata = Map<String, Value>;

const ID_ALIASES: &[&str] = &["id", "_id"];
const DISTANCE_ALIASES: &[&str] = &["_distance", "distance", "_score", "score"];
const DOCUMENT_ALIASES: &[&str] = &["document"];
const METADATA_ALIASES: &[&str] = &["metadata"];
const EMBEDDING_ALIASES: &[&str] = &["embedding"];

static NULL: Value = Value::Null;

/// Results of a vector query: one inner list per query vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub ids: Vec<Vec<String>>,
    pub distances: Vec<Vec<f64>>,
    pub documents: Vec<Vec<String>>,
    pub metadatas: Vec<Vec<Metadata>>,
    pub embeddings: Vec<Vec<Vec<f32>>>,
}

impl QueryResult {
    /// Append the hits for one more query vector.
    pub fn push(&mut self, hits: HybridSearchResult) {
        self.ids.push(hits.ids);
        self.distances.push(hits.distances);
        self.documents.push(hits.documents);
        self.metadatas.push(hits.metadatas);
        self.embeddings.push(hits.embeddings);
    }
}

/// Results of a `get` or `peek`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub embeddings: Vec<Vec<f32>>,
}

impl From<HybridSearchResult> for GetResult {
    fn from(hits: HybridSearchResult) -> Self {
        Self {
            ids: hits.ids,
            documents: hits.documents,
            metadatas: hits.metadatas,
            embeddings: hits.embeddings,
        }
    }
}

/// Results of a hybrid search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchResult {
    pub ids: Vec<String>,
    pub distances: Vec<f64>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub embeddings: Vec<Vec<f32>>,
}

impl HybridSearchResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl RowSet {
    /// Reduce every row into parallel result lists.
    pub fn reduce(&self) -> HybridSearchResult {
        let id = self.column_index(ID_ALIASES);
        let distance = self.column_index(DISTANCE_ALIASES);
        let document = self.column_index(DOCUMENT_ALIASES);
        let metadata = self.column_index(METADATA_ALIASES);
        let embedding = self.column_index(EMBEDDING_ALIASES);

        let mut result = HybridSearchResult::default();
        for row in &self.rows {
            let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or(&NULL);
            result.ids.push(cell_string(cell(id)));
            result.distances.push(cell_f64(cell(distance)));
            result.documents.push(cell_string(cell(document)));
            result.metadatas.push(cell_metadata(cell(metadata)));
            result.embeddings.push(cell_embedding(cell(embedding)));
        }
        result
    }
}

pub(crate) fn cell_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn cell_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

/// Metadata arrives either as JSON text or as an already-decoded object.
fn cell_metadata(value: &Value) -> Metadata {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(s) if !s.is_empty() => serde_json::from_str(s).unwrap_or_default(),
        _ => Metadata::new(),
    }
}

/// Embeddings arrive either as JSON text (`"[0.1,0.2]"`) or as an array.
fn cell_embedding(value: &Value) -> Vec<f32> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect(),
        Value::String(s) if !s.is_empty() => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> RowSet {
        RowSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_reduce_direct_columns() {
        let set = rows(
            &["_id", "document", "metadata", "embedding", "distance"],
            vec![vec![
                json!("doc-1"),
                json!("hello"),
                json!(r#"{"category":"AI"}"#),
                json!("[0.5,1]"),
                json!(0.25),
            ]],
        );
        let result = set.reduce();
        assert_eq!(result.ids, vec!["doc-1"]);
        assert_eq!(result.distances, vec![0.25]);
        assert_eq!(result.documents, vec!["hello"]);
        assert_eq!(result.metadatas[0]["category"], json!("AI"));
        assert_eq!(result.embeddings, vec![vec![0.5, 1.0]]);
    }

    #[test]
    fn test_reduce_aliases_are_case_insensitive() {
        let set = rows(
            &["ID", "_SCORE", "Metadata"],
            vec![vec![json!(42), json!("0.75"), json!({"tag": "ml"})]],
        );
        let result = set.reduce();
        assert_eq!(result.ids, vec!["42"]);
        assert_eq!(result.distances, vec![0.75]);
        assert_eq!(result.metadatas[0]["tag"], json!("ml"));
        // Missing columns fall back to defaults
        assert_eq!(result.documents, vec![""]);
        assert!(result.embeddings[0].is_empty());
    }

    #[test]
    fn test_distance_alias_priority() {
        let set = rows(&["score", "_distance"], vec![vec![json!(9.0), json!(0.1)]]);
        assert_eq!(set.reduce().distances, vec![0.1]);
    }

    #[test]
    fn test_malformed_cells_use_defaults() {
        let set = rows(
            &["_id", "metadata", "embedding"],
            vec![vec![Value::Null, json!("not json"), json!("[oops")]],
        );
        let result = set.reduce();
        assert_eq!(result.ids, vec![""]);
        assert!(result.metadatas[0].is_empty());
        assert!(result.embeddings[0].is_empty());
    }

    #[test]
    fn test_query_result_push_and_get_conversion() {
        let set = rows(&["_id"], vec![vec![json!("a")], vec![json!("b")]]);
        let mut query = QueryResult::default();
        query.push(set.reduce());
        query.push(HybridSearchResult::default());
        assert_eq!(query.ids, vec![vec!["a".to_string(), "b".to_string()], vec![]]);

        let get = GetResult::from(set.reduce());
        assert_eq!(get.ids.len(), 2);
    }
}
