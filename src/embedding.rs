//! Embedding capability used to turn query texts into query vectors.
//!
//! The model runtime lives outside this crate. Anything that can map a batch of
//! texts to fixed-dimension vectors implements [`EmbeddingFunction`].
//! [`CachedEmbeddingFunction`] wraps another implementation and only forwards
//! texts it hasn't seen before, in a single batch.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("No embeddings returned from provider")]
    EmptyResponse,

    #[error("Expected {expected} embeddings, provider returned {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Converts texts to embedding vectors.
///
/// Implementations must return one vector per input text, in input order, and
/// every vector must have [`dimension`](EmbeddingFunction::dimension) elements.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Dimension of the vectors produced by this function.
    fn dimension(&self) -> usize;
}

/// Embed `texts` and check the provider kept its contract.
pub async fn embed_checked(
    func: &dyn EmbeddingFunction,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let vectors = func.embed(texts).await?;
    if vectors.is_empty() && !texts.is_empty() {
        return Err(EmbeddingError::EmptyResponse);
    }
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        });
    }
    let expected = func.dimension();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

/// Memoizing wrapper around another [`EmbeddingFunction`].
///
/// Cached vectors are shared between concurrent callers. Once `max_entries`
/// vectors are cached, new results are returned but not stored.
pub struct CachedEmbeddingFunction {
    inner: Arc<dyn EmbeddingFunction>,
    cache: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl CachedEmbeddingFunction {
    pub fn new(inner: Arc<dyn EmbeddingFunction>, max_entries: usize) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            max_entries,
        }
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl EmbeddingFunction for CachedEmbeddingFunction {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut misses: Vec<String> = Vec::new();
        for text in texts {
            if !self.cache.contains_key(text) && !misses.contains(text) {
                misses.push(text.clone());
            }
        }

        let mut fresh = Vec::new();
        if !misses.is_empty() {
            debug!(
                stage = "embedding_cache_lookup",
                requested = texts.len(),
                misses = misses.len(),
                "Embedding cache miss, calling provider"
            );
            let vectors = embed_checked(self.inner.as_ref(), &misses).await?;
            fresh = misses.into_iter().zip(vectors).collect::<Vec<_>>();
            for (text, vector) in &fresh {
                if self.cache.len() < self.max_entries {
                    self.cache.insert(text.clone(), vector.clone());
                }
            }
        }

        texts
            .iter()
            .map(|text| {
                if let Some(hit) = self.cache.get(text) {
                    return Ok(hit.value().clone());
                }
                fresh
                    .iter()
                    .find(|(t, _)| t == text)
                    .map(|(_, v)| v.clone())
                    .ok_or(EmbeddingError::EmptyResponse)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Deterministic embedding function for tests.
    ///
    /// Each text maps to `[len, first_byte, 1.0, ...]` padded to `dimension`.
    pub(crate) struct FakeEmbedding {
        pub dimension: usize,
        pub calls: AtomicUsize,
        pub texts_seen: AtomicUsize,
    }

    impl FakeEmbedding {
        pub(crate) fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                texts_seen: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingFunction for FakeEmbedding {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![1.0_f32; self.dimension];
                    if self.dimension > 0 {
                        v[0] = t.len() as f32;
                    }
                    if self.dimension > 1 {
                        v[1] = t.bytes().next().unwrap_or(0) as f32;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    struct WrongDimension;

    #[async_trait]
    impl EmbeddingFunction for WrongDimension {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5; 2]).collect())
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_checked_rejects_dimension_mismatch() {
        let err = embed_checked(&WrongDimension, &texts(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_cache_batches_only_misses() {
        let inner = Arc::new(FakeEmbedding::new(3));
        let cached = CachedEmbeddingFunction::new(inner.clone(), 100);

        let first = cached.embed(&texts(&["alpha", "beta"])).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len(), 2);

        let second = cached
            .embed(&texts(&["beta", "gamma", "alpha"]))
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        // Only "gamma" went to the provider the second time
        assert_eq!(inner.texts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(second[0], first[1]);
        assert_eq!(second[2], first[0]);
    }

    #[tokio::test]
    async fn test_cache_all_hits_skip_provider() {
        let inner = Arc::new(FakeEmbedding::new(2));
        let cached = CachedEmbeddingFunction::new(inner.clone(), 100);

        cached.embed(&texts(&["x"])).await.unwrap();
        cached.embed(&texts(&["x", "x"])).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_respects_max_entries() {
        let inner = Arc::new(FakeEmbedding::new(2));
        let cached = CachedEmbeddingFunction::new(inner.clone(), 1);

        let out = cached.embed(&texts(&["a", "bb", "ccc"])).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2][0], 3.0);
        assert_eq!(cached.len(), 1);
    }
}
