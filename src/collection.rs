//! Collection facade over the execution collaborators.
//!
//! A [`Collection`] owns the compilers and statement builders for one table and
//! hands finished statements to a [`SqlExecutor`] (query/get/peek/count) or a
//! [`HybridSearchTransport`] (hybrid search). Rows coming back are reduced into
//! the result types in [`crate::search::results`].

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{
    compile::{CompiledPredicate, SqlCompiler, SqlValue, combine_predicates},
    config::{SearchConfig, SearchDefaults},
    embedding::EmbeddingFunction,
    error::{BoxError, SearchError, SearchResult},
    filter::{DocumentFilterNode, FilterNode, FilterParser},
    search::{
        ColumnNames, DistanceMetric, GetQuery, GetResult, HybridSearchBuilder, HybridSearchKnn,
        HybridSearchQuery, HybridSearchRank, HybridSearchResult, QueryResult, Statement,
        VectorQuery, count_statement, normalize_generated_sql, resolve_embeddings,
        results::cell_string, search_parm_statements,
    },
};

/// Rows returned by a collaborator: column names plus JSON cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Index of the first alias present among the columns, compared
    /// case-insensitively. Earlier aliases win.
    pub fn column_index(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            self.columns
                .iter()
                .position(|column| column.eq_ignore_ascii_case(alias))
        })
    }

    /// First cell of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Runs parameterized SQL.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute `sql` with `args` bound to its `?` placeholders in order.
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<RowSet, BoxError>;
}

/// Runs a serialized hybrid search request against a table.
#[async_trait]
pub trait HybridSearchTransport: Send + Sync {
    async fn hybrid_search(&self, table: &str, search_parm: &str) -> Result<RowSet, BoxError>;
}

/// [`HybridSearchTransport`] that drives `DBMS_HYBRID_SEARCH.GET_SQL` through
/// a [`SqlExecutor`].
///
/// `@search_parm` is a session variable, so the executor must run the three
/// statements of one call on the same session (a transaction or a pinned
/// connection).
pub struct ProcedureTransport {
    executor: Arc<dyn SqlExecutor>,
}

impl ProcedureTransport {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl HybridSearchTransport for ProcedureTransport {
    async fn hybrid_search(&self, table: &str, search_parm: &str) -> Result<RowSet, BoxError> {
        let statements = search_parm_statements(table, search_parm);
        self.executor.query(&statements.set_sql, &[]).await?;

        let generated = self.executor.query(&statements.get_sql, &[]).await?;
        let raw = generated.scalar().map(cell_string).unwrap_or_default();
        match normalize_generated_sql(&raw) {
            Some(sql) => self.executor.query(&sql, &[]).await,
            None => {
                debug!(
                    stage = "hybrid_sql_empty",
                    table = %table,
                    "GET_SQL returned no statement"
                );
                Ok(RowSet::default())
            }
        }
    }
}

/// Parameters of [`Collection::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Precomputed query vectors. Take precedence over `query_texts`.
    pub query_embeddings: Vec<Vec<f32>>,
    pub query_texts: Vec<String>,
    pub filter: Option<FilterNode>,
    pub document_filter: Option<DocumentFilterNode>,
    /// Results per query vector. 0 uses the configured default.
    pub n_results: usize,
}

impl QueryRequest {
    pub fn with_embeddings(embeddings: Vec<Vec<f32>>) -> Self {
        Self {
            query_embeddings: embeddings,
            ..Default::default()
        }
    }

    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query_texts: texts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn document_filter(mut self, filter: DocumentFilterNode) -> Self {
        self.document_filter = Some(filter);
        self
    }

    pub fn n_results(mut self, n_results: usize) -> Self {
        self.n_results = n_results;
        self
    }
}

/// Parameters of [`Collection::get`].
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub ids: Vec<String>,
    pub filter: Option<FilterNode>,
    pub document_filter: Option<DocumentFilterNode>,
    /// 0 uses the configured default.
    pub limit: usize,
    pub offset: usize,
}

impl GetRequest {
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn document_filter(mut self, filter: DocumentFilterNode) -> Self {
        self.document_filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// A named collection bound to its collaborators.
pub struct Collection {
    name: String,
    table: String,
    distance: DistanceMetric,
    columns: ColumnNames,
    executor: Arc<dyn SqlExecutor>,
    transport: Arc<dyn HybridSearchTransport>,
    embedding: Option<Arc<dyn EmbeddingFunction>>,
    parser: FilterParser,
    sql: SqlCompiler,
    hybrid: HybridSearchBuilder,
    defaults: SearchDefaults,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("distance", &self.distance)
            .field("has_embedding", &self.embedding.is_some())
            .finish()
    }
}

impl Collection {
    /// Bind collection `name` to `executor`.
    ///
    /// Hybrid search goes through a [`ProcedureTransport`] over the same
    /// executor until [`with_transport`](Self::with_transport) replaces it.
    pub fn new(
        name: impl Into<String>,
        config: &SearchConfig,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        let name = name.into();
        let mut hybrid = HybridSearchBuilder::new(config.descriptor_compiler())
            .with_default_k(config.search.default_knn_k)
            .with_knn_field(config.collection.columns.embedding.clone());
        if let Some(timeout) = config.search.embedding_timeout() {
            hybrid = hybrid.with_embedding_timeout(timeout);
        }

        Self {
            table: config.table_name(&name),
            name,
            distance: config.collection.distance,
            columns: config.collection.columns.clone(),
            transport: Arc::new(ProcedureTransport::new(executor.clone())),
            executor,
            embedding: None,
            parser: config.filter_parser(),
            sql: config.sql_compiler(),
            hybrid,
            defaults: config.search.clone(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HybridSearchTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_embedding_function(mut self, embedding: Arc<dyn EmbeddingFunction>) -> Self {
        self.hybrid = self.hybrid.with_embedding_function(embedding.clone());
        self.embedding = Some(embedding);
        self
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn distance(&self) -> DistanceMetric {
        self.distance
    }

    /// Parse a metadata filter with this collection's depth limit.
    pub fn parse_where(&self, value: &Value) -> SearchResult<Option<FilterNode>> {
        self.parser.parse(value)
    }

    /// Parse a document filter with this collection's depth limit.
    pub fn parse_where_document(&self, value: &Value) -> SearchResult<Option<DocumentFilterNode>> {
        self.parser.parse_document(value)
    }

    /// Nearest-neighbor query, one statement per query vector.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidParameter`] if the request has neither vectors nor texts
    /// - [`SearchError::EmbeddingFunctionRequired`] if texts need embedding and
    ///   no embedding function is set
    /// - [`SearchError::Execution`] if the executor fails
    #[instrument(
        skip(self, request, cancel),
        fields(
            collection = %self.name,
            vectors = request.query_embeddings.len(),
            texts = request.query_texts.len()
        )
    )]
    pub async fn query(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> SearchResult<QueryResult> {
        let vectors = if !request.query_embeddings.is_empty() {
            request.query_embeddings.clone()
        } else if !request.query_texts.is_empty() {
            resolve_embeddings(
                self.embedding.as_deref(),
                &request.query_texts,
                self.defaults.embedding_timeout(),
                cancel,
            )
            .await?
        } else {
            return Err(SearchError::InvalidParameter(
                "query requires query embeddings or query texts".into(),
            ));
        };

        let predicate = self.compile_filters(
            request.filter.as_ref(),
            request.document_filter.as_ref(),
        )?;
        let limit = if request.n_results > 0 {
            request.n_results
        } else {
            self.defaults.default_knn_k
        };
        let builder = VectorQuery::new(self.table.clone(), self.columns.clone());

        let mut result = QueryResult::default();
        for vector in &vectors {
            if cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            let statement = builder.build(self.distance, vector, Some(&predicate), limit)?;
            let rows = self.execute("query", &statement).await?;
            result.push(rows.reduce());
        }
        Ok(result)
    }

    /// Fetch rows by id and/or filter.
    #[instrument(skip(self, request), fields(collection = %self.name, ids = request.ids.len()))]
    pub async fn get(&self, request: &GetRequest) -> SearchResult<GetResult> {
        let predicate = self.compile_filters(
            request.filter.as_ref(),
            request.document_filter.as_ref(),
        )?;
        let statement = GetQuery::new(self.table.clone(), self.columns.clone())
            .with_default_limit(self.defaults.default_get_limit)
            .build(&request.ids, Some(&predicate), request.limit, request.offset)?;
        let rows = self.execute("get", &statement).await?;
        Ok(rows.reduce().into())
    }

    /// First `limit` rows of the collection. 0 uses the configured peek limit.
    #[instrument(skip(self), fields(collection = %self.name))]
    pub async fn peek(&self, limit: usize) -> SearchResult<GetResult> {
        let limit = if limit > 0 {
            limit
        } else {
            self.defaults.peek_limit
        };
        self.get(&GetRequest::default().limit(limit)).await
    }

    /// Number of rows in the collection.
    #[instrument(skip(self), fields(collection = %self.name))]
    pub async fn count(&self) -> SearchResult<u64> {
        let statement = Statement {
            sql: count_statement(&self.table),
            args: Vec::new(),
        };
        let rows = self.execute("count", &statement).await?;
        let count = match rows.scalar() {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        count.ok_or_else(|| {
            SearchError::Execution("count query returned no numeric value".into())
        })
    }

    /// Hybrid full-text and vector search through the transport.
    ///
    /// # Errors
    ///
    /// Everything [`HybridSearchBuilder::build`] returns, plus
    /// [`SearchError::Execution`] if the transport fails.
    #[instrument(
        skip(self, query, knn, rank, cancel),
        fields(collection = %self.name, has_query = query.is_some(), has_knn = knn.is_some())
    )]
    pub async fn hybrid_search(
        &self,
        query: Option<&HybridSearchQuery>,
        knn: Option<&HybridSearchKnn>,
        rank: Option<&HybridSearchRank>,
        n_results: usize,
        cancel: &CancellationToken,
    ) -> SearchResult<HybridSearchResult> {
        let request = self
            .hybrid
            .build(query, knn, rank, n_results, cancel)
            .await?;
        let search_parm = request.to_search_parm()?;

        let start = Instant::now();
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            rows = self.transport.hybrid_search(&self.table, &search_parm) => rows,
        };
        let rows = rows.map_err(|e| {
            warn!(
                stage = "collection_operation_failed",
                operation = "hybrid_search",
                table = %self.table,
                error = %e,
                "Hybrid search transport failed"
            );
            SearchError::Execution(e)
        })?;

        debug!(
            stage = "collection_operation_completed",
            operation = "hybrid_search",
            table = %self.table,
            rows = rows.rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Hybrid search completed"
        );
        Ok(rows.reduce())
    }

    fn compile_filters(
        &self,
        filter: Option<&FilterNode>,
        document_filter: Option<&DocumentFilterNode>,
    ) -> SearchResult<CompiledPredicate> {
        Ok(combine_predicates([
            self.sql.compile(filter)?,
            self.sql.compile_document(document_filter)?,
        ]))
    }

    async fn execute(
        &self,
        operation: &'static str,
        statement: &Statement,
    ) -> SearchResult<RowSet> {
        let start = Instant::now();
        match self.executor.query(&statement.sql, &statement.args).await {
            Ok(rows) => {
                debug!(
                    stage = "collection_operation_completed",
                    operation,
                    table = %self.table,
                    rows = rows.rows.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Statement executed"
                );
                Ok(rows)
            }
            Err(e) => {
                warn!(
                    stage = "collection_operation_failed",
                    operation,
                    table = %self.table,
                    error = %e,
                    "Statement execution failed"
                );
                Err(SearchError::Execution(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::embedding::tests::FakeEmbedding;

    /// Records every statement and answers from a queue of canned row sets.
    #[derive(Default)]
    struct RecordingExecutor {
        statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
        responses: Mutex<Vec<Result<RowSet, String>>>,
    }

    impl RecordingExecutor {
        fn with_responses(responses: Vec<Result<RowSet, String>>) -> Arc<Self> {
            Arc::new(Self {
                statements: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            })
        }

        fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlExecutor for RecordingExecutor {
        async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<RowSet, BoxError> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), args.to_vec()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(RowSet::default());
            }
            responses.remove(0).map_err(BoxError::from)
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(String, Value)>>,
        rows: RowSet,
    }

    #[async_trait]
    impl HybridSearchTransport for RecordingTransport {
        async fn hybrid_search(&self, table: &str, search_parm: &str) -> Result<RowSet, BoxError> {
            let parsed: Value = serde_json::from_str(search_parm)?;
            self.calls.lock().unwrap().push((table.to_string(), parsed));
            Ok(self.rows.clone())
        }
    }

    fn doc_rows(ids: &[&str]) -> RowSet {
        RowSet::new(
            ["_id", "document", "metadata", "embedding", "distance"]
                .map(String::from)
                .to_vec(),
            ids.iter()
                .map(|id| {
                    vec![
                        json!(id),
                        json!(format!("doc {}", id)),
                        json!(r#"{"category":"AI"}"#),
                        json!("[1,2]"),
                        json!(0.5),
                    ]
                })
                .collect(),
        )
    }

    fn collection(executor: Arc<RecordingExecutor>) -> Collection {
        Collection::new("docs", &SearchConfig::default(), executor)
    }

    #[test]
    fn test_column_index_alias_order() {
        let rows = RowSet::new(vec!["Score".into(), "_DISTANCE".into()], vec![]);
        assert_eq!(rows.column_index(&["_distance", "score"]), Some(1));
        assert_eq!(rows.column_index(&["score"]), Some(0));
        assert_eq!(rows.column_index(&["id"]), None);
    }

    #[tokio::test]
    async fn test_query_with_embeddings_and_filter() {
        let executor = RecordingExecutor::with_responses(vec![Ok(doc_rows(&["a", "b"]))]);
        let collection = collection(executor.clone()).with_distance(DistanceMetric::L2);
        let request = QueryRequest::with_embeddings(vec![vec![0.5, 1.0]])
            .filter(FilterNode::eq("category", "AI"))
            .n_results(2);

        let result = collection
            .query(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.ids, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(result.distances, vec![vec![0.5, 0.5]]);
        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        let (sql, args) = &statements[0];
        assert!(sql.starts_with(
            "SELECT _id, document, metadata, embedding, l2_distance(embedding, '[0.5,1]')"
        ));
        assert!(sql.contains("FROM c$v1$docs WHERE (JSON_EXTRACT(metadata,'$.category')) = ?"));
        assert_eq!(args, &vec![SqlValue::String("AI".into()), SqlValue::Int(2)]);
    }

    #[tokio::test]
    async fn test_query_embeds_texts_once_and_runs_per_vector() {
        let executor = RecordingExecutor::with_responses(vec![]);
        let embedding = Arc::new(FakeEmbedding::new(3));
        let collection = collection(executor.clone()).with_embedding_function(embedding.clone());

        let result = collection
            .query(&QueryRequest::with_texts(["abc", "xy"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(embedding.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(result.ids.len(), 2);
        let statements = executor.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].0.contains("'[3,97,1]'"));
        assert!(statements[1].0.contains("'[2,120,1]'"));
        // Default n_results
        assert_eq!(statements[0].1, vec![SqlValue::Int(10)]);
    }

    #[tokio::test]
    async fn test_query_errors() {
        let executor = RecordingExecutor::with_responses(vec![]);
        let collection = collection(executor.clone());
        let cancel = CancellationToken::new();

        let err = collection.query(&QueryRequest::default(), &cancel).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidParameter(_)));

        let err = collection
            .query(&QueryRequest::with_texts(["x"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::EmbeddingFunctionRequired));
        assert!(executor.statements().is_empty());
    }

    #[tokio::test]
    async fn test_executor_error_is_passed_through() {
        let executor = RecordingExecutor::with_responses(vec![Err("table not found".into())]);
        let err = collection(executor)
            .query(&QueryRequest::with_embeddings(vec![vec![1.0]]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Execution(_)));
        assert_eq!(err.to_string(), "table not found");
    }

    #[tokio::test]
    async fn test_get_with_ids_and_document_filter() {
        let executor = RecordingExecutor::with_responses(vec![Ok(doc_rows(&["a"]))]);
        let request = GetRequest::with_ids(["a"])
            .document_filter(DocumentFilterNode::contains("50%"))
            .offset(5);

        let result = collection(executor.clone()).get(&request).await.unwrap();

        assert_eq!(result.ids, vec!["a"]);
        assert_eq!(result.documents, vec!["doc a"]);
        assert_eq!(result.metadatas[0]["category"], json!("AI"));
        let (sql, args) = &executor.statements()[0];
        assert_eq!(
            sql,
            "SELECT _id, document, metadata, embedding FROM c$v1$docs \
             WHERE _id IN (?) AND document LIKE ? LIMIT ? OFFSET ?"
        );
        assert_eq!(
            args,
            &vec![
                SqlValue::String("a".into()),
                SqlValue::String("%50\\%%".into()),
                SqlValue::Int(1000),
                SqlValue::Int(5),
            ]
        );
    }

    #[tokio::test]
    async fn test_peek_uses_peek_limit() {
        let executor = RecordingExecutor::with_responses(vec![]);
        let collection = collection(executor.clone());
        collection.peek(0).await.unwrap();
        collection.peek(3).await.unwrap();
        let statements = executor.statements();
        assert_eq!(statements[0].1, vec![SqlValue::Int(10), SqlValue::Int(0)]);
        assert_eq!(statements[1].1, vec![SqlValue::Int(3), SqlValue::Int(0)]);
    }

    #[tokio::test]
    async fn test_count() {
        let executor = RecordingExecutor::with_responses(vec![
            Ok(RowSet::new(vec!["COUNT(*)".into()], vec![vec![json!(42)]])),
            Ok(RowSet::new(vec!["COUNT(*)".into()], vec![vec![json!("7")]])),
            Ok(RowSet::default()),
        ]);
        let collection = collection(executor.clone());
        assert_eq!(collection.count().await.unwrap(), 42);
        assert_eq!(collection.count().await.unwrap(), 7);
        assert!(matches!(collection.count().await, Err(SearchError::Execution(_))));
        assert_eq!(executor.statements()[0].0, "SELECT COUNT(*) FROM c$v1$docs");
    }

    #[tokio::test]
    async fn test_hybrid_search_through_transport() {
        let transport = Arc::new(RecordingTransport {
            calls: Mutex::new(Vec::new()),
            rows: RowSet::new(
                vec!["id".into(), "_score".into(), "document".into()],
                vec![vec![json!("a"), json!(0.9), json!("hello")]],
            ),
        });
        let executor = RecordingExecutor::with_responses(vec![]);
        let collection = collection(executor.clone()).with_transport(transport.clone());
        let query = HybridSearchQuery::new().with_filter(FilterNode::eq("category", "AI"));
        let knn = HybridSearchKnn::with_vector(vec![1.0, 2.0]).k(5);

        let result = collection
            .hybrid_search(
                Some(&query),
                Some(&knn),
                Some(&HybridSearchRank::rrf(60)),
                3,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.ids, vec!["a"]);
        assert_eq!(result.distances, vec![0.9]);
        assert!(executor.statements().is_empty());

        let calls = transport.calls.lock().unwrap();
        let (table, parm) = &calls[0];
        assert_eq!(table, "c$v1$docs");
        assert_eq!(
            parm,
            &json!({
                "query": {"term": {"category": "AI"}},
                "knn": {"field": "embedding", "k": 5, "query_vector": [1.0, 2.0]},
                "rank": {"rrf": {"rank_constant": 60}},
                "size": 3
            })
        );
    }

    #[tokio::test]
    async fn test_hybrid_search_through_procedure() {
        let executor = RecordingExecutor::with_responses(vec![
            Ok(RowSet::default()),
            Ok(RowSet::new(
                vec!["query_sql".into()],
                vec![vec![json!("  'SELECT id, _score FROM generated'  ")]],
            )),
            Ok(RowSet::new(
                vec!["id".into(), "_score".into()],
                vec![vec![json!("a"), json!(1.5)]],
            )),
        ]);
        let query = HybridSearchQuery::new()
            .with_document_filter(DocumentFilterNode::contains("it's"));

        let result = collection(executor.clone())
            .hybrid_search(Some(&query), None, None, 0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.ids, vec!["a"]);
        let statements = executor.statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0].0,
            r#"SET @search_parm = '{"query":{"query_string":{"fields":["document"],"query":"it''s"}}}'"#
        );
        assert_eq!(
            statements[1].0,
            "SELECT DBMS_HYBRID_SEARCH.GET_SQL('c$v1$docs', @search_parm) as query_sql FROM dual"
        );
        assert_eq!(statements[2].0, "SELECT id, _score FROM generated");
    }

    #[tokio::test]
    async fn test_hybrid_search_empty_generated_sql() {
        let executor = RecordingExecutor::with_responses(vec![
            Ok(RowSet::default()),
            Ok(RowSet::new(vec!["query_sql".into()], vec![vec![Value::Null]])),
        ]);
        let knn = HybridSearchKnn::with_vector(vec![1.0]);

        let result = collection(executor.clone())
            .hybrid_search(None, Some(&knn), None, 0, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(executor.statements().len(), 2);
    }

    #[tokio::test]
    async fn test_hybrid_search_regex_rejected_before_transport() {
        let executor = RecordingExecutor::with_responses(vec![]);
        let collection = collection(executor.clone());
        let document = collection
            .parse_where_document(&json!({"$regex": "^a"}))
            .unwrap()
            .unwrap();
        let query = HybridSearchQuery::new().with_document_filter(document);

        let err = collection
            .hybrid_search(Some(&query), None, None, 0, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::UnsupportedInTarget { .. }));
        assert!(executor.statements().is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_search_cancelled() {
        let executor = RecordingExecutor::with_responses(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let knn = HybridSearchKnn::with_vector(vec![1.0]);

        let err = collection(executor.clone())
            .hybrid_search(None, Some(&knn), None, 0, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::Cancelled));
        assert!(executor.statements().is_empty());
    }

    #[test]
    fn test_parse_where_uses_configured_depth() {
        let mut config = SearchConfig::default();
        config.filter.max_depth = 1;
        let collection = Collection::new(
            "docs",
            &config,
            RecordingExecutor::with_responses(vec![]),
        );
        assert_eq!(collection.table(), "c$v1$docs");
        assert!(collection.parse_where(&json!({"$and": [{"a": 1}]})).is_ok());
        assert!(
            collection
                .parse_where(&json!({"$and": [{"$or": [{"a": 1}]}]}))
                .is_err()
        );
    }
}
