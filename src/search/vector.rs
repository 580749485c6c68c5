use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::VectorIndexConfig;
use crate::models::{DocumentMetadata, RetrievedDocument};

/// A raw match from the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Approximate nearest-neighbour index queried by embedding.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>>;
}

/// Over-fetching retriever that turns raw matches into [`RetrievedDocument`]s.
#[derive(Clone)]
pub struct VectorRetriever {
    index: Arc<dyn VectorIndex>,
    initial_count: usize,
}

impl VectorRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, initial_count: usize) -> Self {
        Self {
            index,
            initial_count: initial_count.max(1),
        }
    }

    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    /// Fetch the initial candidate set, ordered by vector similarity.
    pub async fn retrieve(&self, embedding: &[f32]) -> Result<Vec<RetrievedDocument>> {
        let matches = self
            .index
            .query(embedding, self.initial_count, true)
            .await
            .context("Vector search failed")?;
        Ok(matches.into_iter().map(to_retrieved_document).collect())
    }
}

/// Missing or malformed metadata fields fall back to defaults.
pub fn to_retrieved_document(m: VectorMatch) -> RetrievedDocument {
    let metadata = match m.metadata {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Malformed metadata for match {}: {e}", m.id);
            DocumentMetadata::default()
        }),
        None => DocumentMetadata::default(),
    };
    RetrievedDocument {
        id: m.id,
        score: m.score,
        metadata,
    }
}

// ─── Remote index (Pinecone-style HTTP API) ──────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    namespace: Option<String>,
}

impl HttpVectorIndex {
    pub fn new(client: reqwest::Client, base_url: &str, config: &VectorIndexConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            namespace: config.namespace.clone(),
        }
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>> {
        let url = format!("{}/query", self.base_url);

        let req = QueryRequest {
            vector,
            top_k,
            include_metadata,
            namespace: self.namespace.as_deref(),
        };

        let mut builder = self.client.post(&url).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.header("Api-Key", key);
        }

        let resp = builder
            .send()
            .await
            .context("Failed to reach vector index")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Vector index returned {status}: {body}");
        }

        let body: QueryResponse = resp
            .json()
            .await
            .context("Failed to parse vector index response")?;
        Ok(body.matches)
    }
}

// ─── In-memory index ─────────────────────────────────────

#[derive(Debug, Clone)]
struct VectorEntry {
    id: String,
    embedding: Vec<f32>,
    metadata: DocumentMetadata,
}

/// In-memory vector index with exact cosine search, used when no external
/// index is configured.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the vector stored under `id`.
    pub fn upsert(&self, id: &str, embedding: Vec<f32>, metadata: DocumentMetadata) {
        let mut entries = self.entries.write();
        let entry = VectorEntry {
            id: id.to_string(),
            embedding,
            metadata,
        };
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn delete(&self, id: &str) {
        self.entries.write().retain(|e| e.id != id);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Search by cosine similarity against a query embedding.
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<(f32, String, DocumentMetadata)> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &VectorEntry)> = entries
            .iter()
            .map(|e| (cosine_similarity(query_embedding, &e.embedding), e))
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(score, e)| (score, e.id.clone(), e.metadata.clone()))
            .collect()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>> {
        self.search(vector, top_k)
            .into_iter()
            .map(|(score, id, metadata)| {
                let metadata = if include_metadata {
                    Some(serde_json::to_value(metadata)?)
                } else {
                    None
                };
                Ok(VectorMatch {
                    id,
                    score,
                    metadata,
                })
            })
            .collect()
    }
}

/// Cosine similarity. Zero vectors, mismatched lengths and non-finite
/// components yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // Accumulate in f64 so large components cannot overflow the norms
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let similarity = dot / denom;
    if denom == 0.0 || !similarity.is_finite() {
        0.0
    } else {
        similarity as f32
    }
}
