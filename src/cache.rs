//! Similarity cache of past retrievals.
//!
//! A lookup returns the single stored query whose embedding is closest to the
//! new one, provided the cosine similarity reaches the configured threshold.
//! Only retrieval results are reused; answers are always generated fresh.
//!
//! The cache is bounded: once `capacity` entries are stored, the oldest entry
//! is evicted on insert. Nearest-neighbour search goes through the
//! [`NeighborIndex`] trait so the linear scan can be swapped for an ANN index.

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::models::RankedDocument;
use crate::search::vector::cosine_similarity;

/// A resolved question and its reranked retrieval results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedQuery {
    pub id: String,
    pub question: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub retrieval_results: Vec<RankedDocument>,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: Arc<CachedQuery>,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    /// 0 means unbounded
    pub capacity: usize,
    pub threshold: f32,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

/// Nearest-neighbour lookup over cached embeddings.
pub trait NeighborIndex: Send + Sync {
    fn insert(&mut self, id: &str, embedding: &[f32]);
    fn remove(&mut self, id: &str);
    /// Best match with similarity `>= threshold`.
    fn nearest(&self, embedding: &[f32], threshold: f32) -> Option<(String, f32)>;
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exact search comparing against every stored embedding.
#[derive(Debug, Default)]
pub struct LinearScanIndex {
    entries: Vec<(String, Vec<f32>)>,
}

impl NeighborIndex for LinearScanIndex {
    fn insert(&mut self, id: &str, embedding: &[f32]) {
        self.entries.push((id.to_string(), embedding.to_vec()));
    }

    fn remove(&mut self, id: &str) {
        self.entries.retain(|(entry_id, _)| entry_id != id);
    }

    fn nearest(&self, embedding: &[f32], threshold: f32) -> Option<(String, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (id, stored) in &self.entries {
            let similarity = cosine_similarity(embedding, stored);
            // Also rejects NaN
            if !(similarity >= threshold) {
                continue;
            }
            // Strictly greater: the oldest entry wins ties
            let better = match best {
                Some((_, s)) => similarity > s,
                None => true,
            };
            if better {
                best = Some((id, similarity));
            }
        }
        best.map(|(id, s)| (id.to_string(), s))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct CacheInner {
    index: Box<dyn NeighborIndex>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
    entries: HashMap<String, Arc<CachedQuery>>,
    dimension: Option<usize>,
}

pub struct SimilarityCache {
    inner: RwLock<CacheInner>,
    threshold: f32,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SimilarityCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_index(config, Box::new(LinearScanIndex::default()))
    }

    pub fn with_index(config: &CacheConfig, index: Box<dyn NeighborIndex>) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                index,
                order: VecDeque::new(),
                entries: HashMap::new(),
                dimension: None,
            }),
            threshold: config.similarity_threshold,
            capacity: config.capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Find the most similar cached query above the threshold.
    pub fn check(&self, embedding: &[f32]) -> Option<CacheHit> {
        let inner = self.inner.read();
        let hit = inner
            .index
            .nearest(embedding, self.threshold)
            .and_then(|(id, similarity)| {
                inner.entries.get(&id).map(|entry| CacheHit {
                    entry: Arc::clone(entry),
                    similarity,
                })
            });

        match &hit {
            Some(h) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Cache hit ({:.3}) for cached question {:?}",
                    h.similarity,
                    h.entry.question
                );
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        hit
    }

    /// Store a resolved query. Near-duplicates are not merged.
    pub fn add(
        &self,
        question: &str,
        embedding: Vec<f32>,
        retrieval_results: Vec<RankedDocument>,
    ) -> Result<()> {
        if embedding.is_empty() {
            anyhow::bail!("Cannot cache an empty embedding");
        }

        let mut inner = self.inner.write();
        if let Some(dim) = inner.dimension {
            if dim != embedding.len() {
                anyhow::bail!(
                    "Embedding dimension mismatch: cache holds {dim}, got {}",
                    embedding.len()
                );
            }
        }

        if self.capacity > 0 {
            while inner.order.len() >= self.capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.index.remove(&oldest);
                inner.entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let timestamp = Utc::now().timestamp_millis();
        let id = format!("{timestamp}-{}", &Uuid::new_v4().simple().to_string()[..8]);

        inner.dimension = Some(embedding.len());
        inner.index.insert(&id, &embedding);
        inner.order.push_back(id.clone());
        inner.entries.insert(
            id.clone(),
            Arc::new(CachedQuery {
                id,
                question: question.to_string(),
                embedding,
                retrieval_results,
                timestamp,
            }),
        );
        Ok(())
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let removed = inner.entries.len();
        inner.index.clear();
        inner.order.clear();
        inner.entries.clear();
        inner.dimension = None;
        tracing::info!("Cache cleared ({removed} entries)");
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        let timestamp_of = |id: Option<&String>| {
            id.and_then(|id| inner.entries.get(id)).map(|e| e.timestamp)
        };
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity,
            threshold: self.threshold,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            oldest_timestamp: timestamp_of(inner.order.front()),
            newest_timestamp: timestamp_of(inner.order.back()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, RetrievedDocument};

    fn cache(capacity: usize) -> SimilarityCache {
        SimilarityCache::new(&CacheConfig {
            similarity_threshold: 0.95,
            capacity,
            warm_delay_ms: 0,
        })
    }

    fn ranked(file: &str) -> RankedDocument {
        RankedDocument {
            document: RetrievedDocument {
                id: file.to_string(),
                score: 0.9,
                metadata: DocumentMetadata {
                    file_name: file.to_string(),
                    ..DocumentMetadata::default()
                },
            },
            original_rank: 1,
            semantic_score: 0.9,
            keyword_score: 0.0,
            hybrid_score: 0.54,
            final_score: 0.54,
        }
    }

    #[test]
    fn test_round_trip() {
        let c = cache(10);
        let emb = vec![0.2, 0.4, 0.1];
        c.add("prix fibre", emb.clone(), vec![ranked("tarifs.pdf")]).unwrap();

        let hit = c.check(&emb).unwrap();
        assert!((hit.similarity - 1.0).abs() < 1e-6);
        assert_eq!(hit.entry.question, "prix fibre");
        assert_eq!(hit.entry.retrieval_results[0].file_name(), "tarifs.pdf");
    }

    #[test]
    fn test_dissimilar_query_misses() {
        let c = cache(10);
        c.add("a", vec![1.0, 0.0], vec![]).unwrap();
        // cos(60°) = 0.5
        let query = [0.5, 3f32.sqrt() / 2.0];
        assert!(c.check(&query).is_none());
        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_best_match_wins() {
        let c = cache(10);
        c.add("far", vec![1.0, 0.3], vec![]).unwrap();
        c.add("near", vec![1.0, 0.01], vec![]).unwrap();
        let hit = c.check(&[1.0, 0.0]).unwrap();
        assert_eq!(hit.entry.question, "near");
    }

    #[test]
    fn test_empty_cache_misses() {
        let c = cache(10);
        assert!(c.check(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_fifo_eviction() {
        let c = cache(2);
        c.add("first", vec![1.0, 0.0, 0.0], vec![]).unwrap();
        c.add("second", vec![0.0, 1.0, 0.0], vec![]).unwrap();
        c.add("third", vec![0.0, 0.0, 1.0], vec![]).unwrap();

        assert_eq!(c.len(), 2);
        assert!(c.check(&[1.0, 0.0, 0.0]).is_none());
        assert!(c.check(&[0.0, 0.0, 1.0]).is_some());
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let c = cache(0);
        for i in 0..50 {
            c.add(&format!("q{i}"), vec![1.0, i as f32], vec![]).unwrap();
        }
        assert_eq!(c.len(), 50);
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn test_rejects_empty_and_mismatched_embeddings() {
        let c = cache(10);
        assert!(c.add("empty", vec![], vec![]).is_err());
        c.add("ok", vec![1.0, 0.0], vec![]).unwrap();
        let err = c.add("bad", vec![1.0, 0.0, 0.0], vec![]).unwrap_err();
        assert!(err.to_string().contains("dimension"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_orthogonal_large_embeddings_miss() {
        let c = cache(10);
        c.add("stored", vec![1e20, 1e20], vec![]).unwrap();
        assert!(c.check(&[1e20, -1e20]).is_none());
        assert!(c.check(&[3e20, 3e20]).is_some());
    }

    #[test]
    fn test_nan_embedding_never_hits() {
        let c = cache(10);
        c.add("stored", vec![1.0, 0.5], vec![]).unwrap();
        assert!(c.check(&[f32::NAN, 0.5]).is_none());
    }

    #[test]
    fn test_linear_scan_nan_comparison_is_a_miss() {
        let mut index = LinearScanIndex::default();
        index.insert("a", &[1.0, 1.0]);
        assert!(index.nearest(&[1.0, 1.0], f32::NAN).is_none());
    }

    #[test]
    fn test_mismatched_lengths_do_not_panic() {
        let c = cache(10);
        c.add("ok", vec![1.0, 0.0], vec![]).unwrap();
        assert!(c.check(&[1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_clear_resets_entries_and_dimension() {
        let c = cache(10);
        c.add("a", vec![1.0, 0.0], vec![]).unwrap();
        c.clear();
        assert!(c.is_empty());
        assert!(c.check(&[1.0, 0.0]).is_none());
        c.add("b", vec![1.0, 0.0, 0.0], vec![]).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_duplicates_accumulate() {
        let c = cache(10);
        c.add("same", vec![1.0, 1.0], vec![]).unwrap();
        c.add("same", vec![1.0, 1.0], vec![]).unwrap();
        assert_eq!(c.len(), 2);
        let stats = c.stats();
        assert!(stats.oldest_timestamp.unwrap() <= stats.newest_timestamp.unwrap());
    }

    #[test]
    fn test_linear_scan_index() {
        let mut index = LinearScanIndex::default();
        index.insert("a", &[1.0, 0.0]);
        index.insert("b", &[0.0, 1.0]);
        assert_eq!(index.len(), 2);
        let (id, sim) = index.nearest(&[0.0, 2.0], 0.95).unwrap();
        assert_eq!(id, "b");
        assert!((sim - 1.0).abs() < 1e-6);
        index.remove("b");
        assert!(index.nearest(&[0.0, 2.0], 0.95).is_none());
        index.clear();
        assert!(index.is_empty());
    }
}
