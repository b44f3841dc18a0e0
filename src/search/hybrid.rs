//! Hybrid search request building.
//!
//! A hybrid search combines a full-text/scalar `query` section and a vector
//! `knn` section, each with its own filters, and fuses the two ranked lists
//! with reciprocal rank fusion:
//!
//! ```json
//! {
//!   "query": {"bool": {"must": [{"query_string": {..}}], "filter": [..]}},
//!   "knn": {"field": "embedding", "k": 10, "query_vector": [..], "filter": [..]},
//!   "rank": {"rrf": {"rank_constant": 60}},
//!   "size": 5
//! }
//! ```
//!
//! The request is serialized into the `@search_parm` session variable and
//! handed to `DBMS_HYBRID_SEARCH.GET_SQL`, which returns the SQL to run.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    compile::{DescriptorCompiler, SearchClause},
    embedding::{EmbeddingError, EmbeddingFunction, embed_checked},
    error::{SearchError, SearchResult},
    filter::{DocumentFilterNode, FilterNode, parse_document_filter, parse_filter},
};

/// `k` used for the knn section when the caller doesn't set one.
pub const DEFAULT_KNN_K: usize = 10;

/// Vector field searched by the knn section.
pub const DEFAULT_KNN_FIELD: &str = "embedding";

/// Full-text and scalar part of a hybrid search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridSearchQuery {
    pub filter: Option<FilterNode>,
    pub document_filter: Option<DocumentFilterNode>,
}

impl HybridSearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `where` and `where_document` mappings.
    pub fn from_json(filter: &Value, document_filter: &Value) -> SearchResult<Self> {
        Ok(Self {
            filter: parse_filter(filter)?,
            document_filter: parse_document_filter(document_filter)?,
        })
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_document_filter(mut self, filter: DocumentFilterNode) -> Self {
        self.document_filter = Some(filter);
        self
    }
}

/// Vector part of a hybrid search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridSearchKnn {
    /// Precomputed query vector. Takes precedence over `query_texts`.
    pub query_vector: Option<Vec<f32>>,
    /// Texts to embed when no vector is given. Only the first embedding is used.
    pub query_texts: Vec<String>,
    pub filter: Option<FilterNode>,
    /// Number of neighbours; 0 means the default.
    pub k: usize,
}

impl HybridSearchKnn {
    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self {
            query_vector: Some(vector),
            ..Self::default()
        }
    }

    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query_texts: texts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// Reciprocal rank fusion settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrfConfig {
    /// Constant in `1 / (k + rank)`. 0 leaves the engine default.
    pub k: u32,
}

/// Ranking part of a hybrid search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HybridSearchRank {
    pub rrf: Option<RrfConfig>,
}

impl HybridSearchRank {
    pub fn rrf(k: u32) -> Self {
        Self {
            rrf: Some(RrfConfig { k }),
        }
    }
}

/// The `search_parm` document sent to the hybrid-search procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridSearchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<SearchClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knn: Option<KnnClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<RankClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnnClause {
    pub field: String,
    pub k: usize,
    pub query_vector: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<SearchClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankClause {
    pub rrf: RrfClause,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RrfClause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_constant: Option<u32>,
}

impl HybridSearchRequest {
    /// Serialize to the JSON stored in `@search_parm`.
    pub fn to_search_parm(&self) -> SearchResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The two statements that turn a `search_parm` into executable SQL.
///
/// Both must run on the same session because `@search_parm` is a session
/// variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParmStatements {
    /// `SET @search_parm = '...'`
    pub set_sql: String,
    /// `SELECT DBMS_HYBRID_SEARCH.GET_SQL(...) as query_sql FROM dual`
    pub get_sql: String,
}

/// Build the statements for `table` and a serialized request.
pub fn search_parm_statements(table: &str, search_parm: &str) -> SearchParmStatements {
    SearchParmStatements {
        set_sql: format!("SET @search_parm = {}", quote_literal(search_parm)),
        get_sql: format!(
            "SELECT DBMS_HYBRID_SEARCH.GET_SQL({}, @search_parm) as query_sql FROM dual",
            quote_literal(table)
        ),
    }
}

/// Single-quoted string literal for a server that processes backslash
/// escapes. Backslashes are doubled before quotes.
fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\\', "\\\\").replace('\'', "''"))
}

/// Clean up the SQL returned by `GET_SQL`.
///
/// Returns `None` when the procedure produced nothing to run.
pub fn normalize_generated_sql(raw: &str) -> Option<String> {
    let sql = raw.trim().trim_matches(&['\'', '"'][..]);
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Assembles [`HybridSearchRequest`]s.
#[derive(Clone)]
pub struct HybridSearchBuilder {
    compiler: DescriptorCompiler,
    embedding: Option<Arc<dyn EmbeddingFunction>>,
    embedding_timeout: Option<Duration>,
    default_k: usize,
    knn_field: String,
}

impl Default for HybridSearchBuilder {
    fn default() -> Self {
        Self::new(DescriptorCompiler::default())
    }
}

impl std::fmt::Debug for HybridSearchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearchBuilder")
            .field("compiler", &self.compiler)
            .field("has_embedding", &self.embedding.is_some())
            .field("embedding_timeout", &self.embedding_timeout)
            .field("default_k", &self.default_k)
            .field("knn_field", &self.knn_field)
            .finish()
    }
}

impl HybridSearchBuilder {
    pub fn new(compiler: DescriptorCompiler) -> Self {
        Self {
            compiler,
            embedding: None,
            embedding_timeout: None,
            default_k: DEFAULT_KNN_K,
            knn_field: DEFAULT_KNN_FIELD.to_string(),
        }
    }

    pub fn with_embedding_function(mut self, embedding: Arc<dyn EmbeddingFunction>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = Some(timeout);
        self
    }

    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    pub fn with_knn_field(mut self, field: impl Into<String>) -> Self {
        self.knn_field = field.into();
        self
    }

    /// Build a hybrid search request.
    ///
    /// The query and knn sections compile their filters independently.
    /// Embedding, when needed, happens once per call and is abandoned as soon
    /// as `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`SearchError::EmbeddingFunctionRequired`] if knn texts need embedding
    ///   and no embedding function is configured
    /// - [`SearchError::InvalidParameter`] if neither section is present, or the
    ///   knn section has neither a vector nor texts
    /// - [`SearchError::Cancelled`] / [`SearchError::EmbeddingTimeout`] if
    ///   embedding is interrupted
    pub async fn build(
        &self,
        query: Option<&HybridSearchQuery>,
        knn: Option<&HybridSearchKnn>,
        rank: Option<&HybridSearchRank>,
        n_results: usize,
        cancel: &CancellationToken,
    ) -> SearchResult<HybridSearchRequest> {
        let query = match query {
            Some(query) => self.build_query(query)?,
            None => None,
        };
        let knn = match knn {
            Some(knn) => Some(self.build_knn(knn, cancel).await?),
            None => None,
        };
        if query.is_none() && knn.is_none() {
            return Err(SearchError::InvalidParameter(
                "hybrid search requires a query or a knn section".into(),
            ));
        }

        let rank = rank.and_then(|r| r.rrf).map(|rrf| RankClause {
            rrf: RrfClause {
                rank_constant: (rrf.k > 0).then_some(rrf.k),
            },
        });

        debug!(
            stage = "hybrid_request_built",
            has_query = query.is_some(),
            has_knn = knn.is_some(),
            has_rank = rank.is_some(),
            size = n_results,
            "Built hybrid search request"
        );
        Ok(HybridSearchRequest {
            query,
            knn,
            rank,
            size: (n_results > 0).then_some(n_results),
        })
    }

    fn build_query(&self, query: &HybridSearchQuery) -> SearchResult<Option<SearchClause>> {
        let mut filters = self.compiler.compile(query.filter.as_ref())?;
        let text = self
            .compiler
            .compile_document(query.document_filter.as_ref())?;

        Ok(match (text, filters.len()) {
            (None, 0) => None,
            (None, 1) if is_leaf(&filters[0]) => filters.pop(),
            (None, _) => Some(bool_section(None, filters)),
            (Some(text), 0) => Some(text),
            (Some(text), _) => Some(bool_section(Some(text), filters)),
        })
    }

    async fn build_knn(
        &self,
        knn: &HybridSearchKnn,
        cancel: &CancellationToken,
    ) -> SearchResult<KnnClause> {
        let query_vector = match &knn.query_vector {
            Some(vector) if !vector.is_empty() => vector.clone(),
            _ if !knn.query_texts.is_empty() => {
                let vectors = resolve_embeddings(
                    self.embedding.as_deref(),
                    &knn.query_texts,
                    self.embedding_timeout,
                    cancel,
                )
                .await?;
                vectors
                    .into_iter()
                    .next()
                    .ok_or(SearchError::Embedding(EmbeddingError::EmptyResponse))?
            }
            _ => {
                return Err(SearchError::InvalidParameter(
                    "knn requires either a query vector or query texts".into(),
                ));
            }
        };

        if query_vector.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::InvalidParameter(
                "query vector contains a non-finite value".into(),
            ));
        }

        Ok(KnnClause {
            field: self.knn_field.clone(),
            k: if knn.k > 0 { knn.k } else { self.default_k },
            query_vector,
            filter: self.compiler.compile(knn.filter.as_ref())?,
        })
    }
}

/// Embed `texts` in one batch, honouring cancellation and an optional timeout.
pub(crate) async fn resolve_embeddings(
    embedding: Option<&dyn EmbeddingFunction>,
    texts: &[String],
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> SearchResult<Vec<Vec<f32>>> {
    let embedding = embedding.ok_or(SearchError::EmbeddingFunctionRequired)?;
    let start = Instant::now();

    let embed = async {
        match timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, embed_checked(embedding, texts)).await {
                    Ok(result) => result.map_err(SearchError::from),
                    Err(_) => Err(SearchError::EmbeddingTimeout(limit)),
                }
            }
            None => embed_checked(embedding, texts)
                .await
                .map_err(SearchError::from),
        }
    };
    let vectors = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SearchError::Cancelled),
        result = embed => result?,
    };

    debug!(
        stage = "embedding_resolved",
        texts = texts.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Resolved query embeddings"
    );
    Ok(vectors)
}

/// A lone `term` or `range` can stand as the whole query section.
fn is_leaf(clause: &SearchClause) -> bool {
    clause.get("term").is_some() || clause.get("range").is_some()
}

fn bool_section(text: Option<SearchClause>, filters: Vec<SearchClause>) -> SearchClause {
    match text {
        Some(text) => json!({ "bool": { "must": [text], "filter": filters } }),
        None => json!({ "bool": { "filter": filters } }),
    }
}
