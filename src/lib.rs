//! Filter compilation and hybrid-search request building for SeekDB collections.
//!
//! Applications describe what they want to find with loosely-typed filter
//! mappings (`{"category": "AI", "score": {"$gte": 90}}`), full-text predicates
//! (`{"$contains": "machine learning"}`), query vectors or query texts, and an
//! optional rank-fusion config. This crate turns that intent into:
//!
//! - parameterized SQL predicates for the direct query/get paths
//!   ([`compile::SqlCompiler`], [`search::VectorQuery`], [`search::GetQuery`])
//! - a `search_parm` descriptor for the server-side hybrid-search procedure
//!   ([`compile::DescriptorCompiler`], [`search::HybridSearchBuilder`])
//!
//! Statement execution and embedding inference stay outside the crate, behind the
//! [`collection::SqlExecutor`], [`collection::HybridSearchTransport`] and
//! [`embedding::EmbeddingFunction`] traits.
//!
//! # Example
//!
//! ```ignore
//! use seekdb_search::{compile::SqlCompiler, filter::parse_filter};
//! use serde_json::json;
//!
//! let filter = parse_filter(&json!({"category": "AI"}))?;
//! let predicate = SqlCompiler::default().compile(filter.as_ref())?;
//! assert_eq!(predicate.clause, "(JSON_EXTRACT(metadata,'$.category')) = ?");
//! ```

pub mod collection;
pub mod compile;
pub mod config;
pub mod embedding;
pub mod error;
pub mod filter;
#[cfg(feature = "logging")]
pub mod observability;
pub mod search;

pub use collection::{
    Collection, GetRequest, HybridSearchTransport, ProcedureTransport, QueryRequest, RowSet,
    SqlExecutor,
};
pub use compile::{CompiledPredicate, DescriptorCompiler, SqlCompiler, SqlValue};
pub use config::{ConfigError, SearchConfig};
pub use embedding::{CachedEmbeddingFunction, EmbeddingError, EmbeddingFunction};
pub use error::{BoxError, SearchError, SearchResult};
pub use filter::{
    ComparisonOperator, DocumentFilterNode, FieldCondition, FilterNode, FilterValue, Scalar,
    parse_document_filter, parse_filter,
};
pub use search::{
    DistanceMetric, GetResult, HybridSearchBuilder, HybridSearchKnn, HybridSearchQuery,
    HybridSearchRank, HybridSearchRequest, HybridSearchResult, Metadata, QueryResult, RrfConfig,
};
