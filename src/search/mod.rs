//! Search request and statement building.
//!
//! - [`hybrid`]: `search_parm` requests for server-side hybrid search
//! - [`vector`]: ANN, get and count statements for the direct SQL paths
//! - [`results`]: result types and row reduction

pub mod hybrid;
pub mod results;
pub mod vector;

pub(crate) use hybrid::resolve_embeddings;
pub use hybrid::{
    DEFAULT_KNN_K, HybridSearchBuilder, HybridSearchKnn, HybridSearchQuery, HybridSearchRank,
    HybridSearchRequest, KnnClause, RankClause, RrfClause, RrfConfig, SearchParmStatements,
    normalize_generated_sql, search_parm_statements,
};
pub use results::{GetResult, HybridSearchResult, Metadata, QueryResult};
pub use vector::{
    ColumnNames, DEFAULT_GET_LIMIT, DistanceMetric, GetQuery, Statement, TABLE_NAME_PREFIX,
    VectorQuery, count_statement, table_name, vector_literal,
};
