//! Text-similarity oracle used for convergence detection.
//!
//! The engine never chooses an embedding model. It is handed a [`SimilarityOracle`]
//! that can turn text into vectors and score two vectors, and asks it whether the
//! agents' latest opinions have become too alike.
//!
//! [`CachingOracle`] wraps any oracle with an in-memory LRU so repeated opinions (the
//! same `last_opinion` is re-scored every round until its author speaks again) are only
//! embedded once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result alias shared by oracle calls.
pub type OracleResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Default capacity of [`CachingOracle`].
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Cosine similarity with a small epsilon guarding zero-length vectors.
///
/// For vectors of different lengths the dot product covers their common prefix.
///
/// ```rust
/// use agora::similarity::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
/// assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-12;
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let score = dot / (norm(a) * norm(b));
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Embeds text and scores similarity in `[-1, 1]`.
#[async_trait]
pub trait SimilarityOracle: Send + Sync {
    async fn embed(&self, text: &str) -> OracleResult<Vec<f32>>;

    /// Embed several texts. The default calls [`embed`](SimilarityOracle::embed) in order.
    async fn embed_batch(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    async fn text_similarity(&self, a: &str, b: &str) -> OracleResult<f32> {
        let left = self.embed(a).await?;
        let right = self.embed(b).await?;
        Ok(self.similarity(&left, &right))
    }
}

/// Hit/miss counters for [`CachingOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, (Arc<Vec<f32>>, u64)>,
    recency: BTreeMap<u64, String>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl LruState {
    fn get(&mut self, key: &str) -> Option<Arc<Vec<f32>>> {
        self.tick += 1;
        let tick = self.tick;
        match self.entries.get_mut(key) {
            Some((vector, last_used)) => {
                self.recency.remove(&*last_used);
                *last_used = tick;
                self.recency.insert(tick, key.to_string());
                self.hits += 1;
                Some(Arc::clone(vector))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: String, vector: Arc<Vec<f32>>, capacity: usize) {
        self.tick += 1;
        if let Some((_, old_tick)) = self.entries.insert(key.clone(), (vector, self.tick)) {
            self.recency.remove(&old_tick);
        }
        self.recency.insert(self.tick, key);

        while self.entries.len() > capacity {
            let oldest = match self.recency.keys().next().copied() {
                Some(t) => t,
                None => break,
            };
            if let Some(evicted) = self.recency.remove(&oldest) {
                self.entries.remove(&evicted);
            }
        }
    }
}

/// LRU-caching decorator around another oracle.
///
/// ```rust,no_run
/// use agora::similarity::{CachingOracle, SimilarityOracle};
/// use std::sync::Arc;
///
/// fn wrap(inner: Arc<dyn SimilarityOracle>) -> Arc<dyn SimilarityOracle> {
///     Arc::new(CachingOracle::new(inner).with_capacity(512))
/// }
/// ```
pub struct CachingOracle {
    inner: Arc<dyn SimilarityOracle>,
    capacity: usize,
    state: Mutex<LruState>,
}

impl CachingOracle {
    pub fn new(inner: Arc<dyn SimilarityOracle>) -> Self {
        CachingOracle {
            inner,
            capacity: DEFAULT_CACHE_CAPACITY,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            capacity: self.capacity,
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.recency.clear();
    }
}

#[async_trait]
impl SimilarityOracle for CachingOracle {
    async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
        if let Some(hit) = self.state.lock().await.get(text) {
            return Ok(hit.as_ref().clone());
        }
        // lock is released across the inner call
        let vector = Arc::new(self.inner.embed(text).await?);
        self.state
            .lock()
            .await
            .insert(text.to_string(), Arc::clone(&vector), self.capacity);
        Ok(vector.as_ref().clone())
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        self.inner.similarity(a, b)
    }
}
