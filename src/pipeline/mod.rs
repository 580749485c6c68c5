//! Question answering orchestration.
//!
//! ```text
//! question ─▶ [refine if ambiguous] ─▶ embed ─┬─▶ cache check ──┐
//!                                             └─▶ vector search ┴─▶ hit?  reuse ranked docs
//!                                                                   miss? rerank + cache add
//!                                          ─▶ sources + context ─▶ LLM ─▶ answer
//! ```

pub mod assemble;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::SimilarityCache;
use crate::config::{Config, PipelineConfig};
use crate::llm::embeddings::EmbeddingClient;
use crate::llm::refine::{is_query_likely_ambiguous, QueryRefiner, RefinedQuery};
use crate::llm::ChatModel;
use crate::models::{AnswerResponse, RankedDocument, RetrievedDocument, Source};
use crate::query_log::{steps, QueryLog, QueryLogStore, QueryLogSummary};
use crate::search::keyword_score::KeywordScorer;
use crate::search::rerank::HybridReranker;
use crate::search::vector::VectorRetriever;

use assemble::{build_context_block, build_messages, build_sources, prepare_question};

/// Seed questions used when warming the cache without an explicit list.
pub const DEFAULT_WARM_QUESTIONS: &[&str] = &[
    "Quelles sont les offres internet disponibles ?",
    "Quel est le prix de la fibre optique ?",
    "Comment payer ma facture en ligne ?",
    "Quelles sont les promotions en cours ?",
    "Combien coûte le pack gamer ?",
    "Comment souscrire à un abonnement ?",
    "Quels documents faut-il pour l'installation ?",
    "Que faire en cas de panne internet ?",
    "What internet speeds are available?",
    "How do I recharge my account?",
];

/// Event pushed to streaming callers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnswerEvent {
    Delta {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        sources: Vec<Source>,
        query_log: QueryLogSummary,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmFailure {
    pub question: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    /// Questions retrieved and stored
    pub processed: usize,
    /// Questions already resolvable from the cache
    pub skipped: usize,
    pub errors: Vec<WarmFailure>,
}

/// Search query and embedding for a question, after optional refinement.
struct ResolvedQuery {
    search_query: String,
    refined: Option<RefinedQuery>,
    embedding: Vec<f32>,
}

/// Ranked documents for a question and where they came from.
struct Retrieval {
    documents: Vec<RankedDocument>,
    cache_hit: bool,
}

pub struct RagPipeline {
    embedder: EmbeddingClient,
    retriever: VectorRetriever,
    chat: Arc<dyn ChatModel>,
    refiner: QueryRefiner,
    reranker: HybridReranker,
    cache: SimilarityCache,
    logs: QueryLogStore,
    settings: PipelineConfig,
    answer_temperature: f32,
    warm_delay: Duration,
}

impl RagPipeline {
    pub fn new(
        embedder: EmbeddingClient,
        retriever: VectorRetriever,
        chat: Arc<dyn ChatModel>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            retriever,
            refiner: QueryRefiner::new(Arc::clone(&chat)),
            chat,
            reranker: HybridReranker::new(KeywordScorer::default(), config.reranker.clone()),
            cache: SimilarityCache::new(&config.cache),
            logs: QueryLogStore::new(config.query_log_capacity),
            settings: config.pipeline.clone(),
            answer_temperature: config.llm.answer_temperature,
            warm_delay: Duration::from_millis(config.cache.warm_delay_ms),
        }
    }

    pub fn cache(&self) -> &SimilarityCache {
        &self.cache
    }

    pub fn logs(&self) -> &QueryLogStore {
        &self.logs
    }

    /// Answer a question in one LLM round-trip.
    pub async fn answer(&self, question: &str, top_k: usize) -> Result<AnswerResponse> {
        let question = prepare_question(question);
        if question.is_empty() {
            anyhow::bail!("Question is required");
        }

        let mut log = QueryLog::new(&question);
        let outcome = self.generate(&question, top_k, &mut log).await;

        log.finish(outcome.as_ref().map(|(_, s)| s.len()).unwrap_or(0));
        let summary = log.summary();
        self.logs.record(log);

        let (answer, sources) = outcome?;
        tracing::info!(
            "Answered in {}ms ({} sources, cache hit: {})",
            summary.total_duration,
            sources.len(),
            summary.cache_hit
        );
        Ok(AnswerResponse {
            answer,
            sources,
            query_log: Some(summary),
        })
    }

    async fn generate(
        &self,
        question: &str,
        top_k: usize,
        log: &mut QueryLog,
    ) -> Result<(String, Vec<Source>)> {
        let retrieval = self.retrieve(question, log).await?;
        let (sources, messages) = self.assemble(&retrieval.documents, question, top_k);

        log.start_step(steps::GENERATION);
        let answer = self
            .chat
            .complete_chat(&messages, self.answer_temperature)
            .await
            .context("LLM completion failed")?;
        log.end_step(
            steps::GENERATION,
            Some(serde_json::json!({ "answerChars": answer.chars().count() })),
        );

        Ok((answer, sources))
    }

    /// Answer a question, pushing text deltas as the provider produces them.
    ///
    /// The channel always ends with exactly one `Done` or `Error` event.
    pub fn answer_stream(
        self: &Arc<Self>,
        question: &str,
        top_k: usize,
    ) -> mpsc::Receiver<AnswerEvent> {
        let (tx, rx) = mpsc::channel(64);
        let pipeline = Arc::clone(self);
        let question = prepare_question(question);

        tokio::spawn(async move {
            if question.is_empty() {
                let _ = tx
                    .send(AnswerEvent::Error {
                        message: "Question is required".to_string(),
                    })
                    .await;
                return;
            }

            let mut log = QueryLog::new(&question);
            let outcome = pipeline.stream_into(&question, top_k, &mut log, &tx).await;

            log.finish(outcome.as_ref().map(|s| s.len()).unwrap_or(0));
            let summary = log.summary();
            pipeline.logs.record(log);

            let terminal = match outcome {
                Ok(sources) => AnswerEvent::Done {
                    sources,
                    query_log: summary,
                },
                Err(e) => {
                    tracing::warn!("Streaming answer failed: {e:#}");
                    AnswerEvent::Error {
                        message: format!("{e:#}"),
                    }
                }
            };
            if tx.send(terminal).await.is_err() {
                tracing::debug!("Stream receiver dropped before the terminal event");
            }
        });

        rx
    }

    async fn stream_into(
        &self,
        question: &str,
        top_k: usize,
        log: &mut QueryLog,
        tx: &mpsc::Sender<AnswerEvent>,
    ) -> Result<Vec<Source>> {
        let retrieval = self.retrieve(question, log).await?;
        let (sources, messages) = self.assemble(&retrieval.documents, question, top_k);

        log.start_step(steps::GENERATION);
        let mut stream = self
            .chat
            .stream_chat(&messages, self.answer_temperature)
            .await
            .context("LLM streaming failed")?;

        let mut streamed_chars = 0usize;
        while let Some(delta) = stream.next().await {
            let content = delta.context("LLM stream interrupted")?;
            if content.is_empty() {
                continue;
            }
            streamed_chars += content.chars().count();
            if tx.send(AnswerEvent::Delta { content }).await.is_err() {
                tracing::debug!("Stream receiver dropped, stopping generation");
                break;
            }
        }
        log.end_step(
            steps::GENERATION,
            Some(serde_json::json!({ "answerChars": streamed_chars })),
        );

        Ok(sources)
    }

    fn assemble(
        &self,
        documents: &[RankedDocument],
        question: &str,
        top_k: usize,
    ) -> (Vec<Source>, Vec<crate::models::ChatMessage>) {
        let limit = top_k.max(1);
        let documents = &documents[..documents.len().min(limit)];
        let sources = build_sources(documents, self.settings.preview_chars, limit);
        let context = build_context_block(documents, self.settings.context_token_budget);
        (sources, build_messages(&context, question))
    }

    /// Refine the question when it looks ambiguous, then embed the search query.
    async fn resolve_query(&self, question: &str, log: &mut QueryLog) -> Result<ResolvedQuery> {
        let refined = if is_query_likely_ambiguous(question) {
            log.start_step(steps::REFINE);
            let refined = self.refiner.refine(question).await;
            log.end_step(
                steps::REFINE,
                Some(serde_json::json!({
                    "refinedQuery": refined.refined_query,
                    "intent": refined.intent,
                    "entities": refined.entities,
                })),
            );
            log.refined_query = Some(refined.refined_query.clone());
            Some(refined)
        } else {
            None
        };

        let search_query = refined
            .as_ref()
            .map(|r| r.refined_query.clone())
            .unwrap_or_else(|| question.to_string());

        log.start_step(steps::EMBEDDING);
        let embedding = self
            .embedder
            .embed(&search_query)
            .await
            .context("Failed to embed query")?;
        log.end_step(
            steps::EMBEDDING,
            Some(serde_json::json!({ "dimensions": embedding.len() })),
        );

        Ok(ResolvedQuery {
            search_query,
            refined,
            embedding,
        })
    }

    /// Refine, embed, then look up the cache while searching the index.
    async fn retrieve(&self, question: &str, log: &mut QueryLog) -> Result<Retrieval> {
        let resolved = self.resolve_query(question, log).await?;

        let started = Utc::now();
        let cache_lookup = async {
            let hit = self.cache.check(&resolved.embedding);
            (hit, Utc::now())
        };
        let vector_search = async {
            let result = self.retriever.retrieve(&resolved.embedding).await;
            (result, Utc::now())
        };
        let ((hit, cache_done), (matches, search_done)) = tokio::join!(cache_lookup, vector_search);

        log.record_step(
            steps::CACHE_CHECK,
            started,
            cache_done,
            Some(serde_json::json!({
                "hit": hit.is_some(),
                "similarity": hit.as_ref().map(|h| h.similarity),
            })),
        );
        log.record_step(
            steps::RETRIEVAL,
            started,
            search_done,
            Some(serde_json::json!({
                "matches": matches.as_ref().map(Vec::len).unwrap_or(0),
            })),
        );

        if let Some(hit) = hit {
            if let Err(e) = &matches {
                tracing::warn!("Vector search failed, serving cached results: {e:#}");
            }
            log.cache_hit = true;
            return Ok(Retrieval {
                documents: hit.entry.retrieval_results.clone(),
                cache_hit: true,
            });
        }

        let candidates = matches?;
        Ok(Retrieval {
            documents: self.rank_and_store(question, resolved, &candidates, log),
            cache_hit: false,
        })
    }

    /// Rerank fresh candidates and remember them under the query embedding.
    fn rank_and_store(
        &self,
        question: &str,
        resolved: ResolvedQuery,
        candidates: &[RetrievedDocument],
        log: &mut QueryLog,
    ) -> Vec<RankedDocument> {
        log.start_step(steps::RERANK);
        let intent = resolved.refined.as_ref().map(|r| r.intent.as_str());
        let documents = self
            .reranker
            .rerank(&resolved.search_query, candidates, intent);
        log.end_step(
            steps::RERANK,
            Some(serde_json::json!({
                "candidates": candidates.len(),
                "kept": documents.len(),
            })),
        );

        log.start_step(steps::CACHE_ADD);
        let added = self
            .cache
            .add(question, resolved.embedding, documents.clone());
        if let Err(e) = &added {
            tracing::warn!("Failed to add query to cache: {e:#}");
        }
        log.end_step(
            steps::CACHE_ADD,
            Some(serde_json::json!({ "stored": added.is_ok() })),
        );

        documents
    }

    /// Resolve each question into the cache, pausing between questions.
    /// Questions already cached are skipped without searching the index.
    /// Failures are collected without stopping the batch.
    pub async fn warm_cache(&self, questions: &[String]) -> WarmReport {
        let mut report = WarmReport::default();

        for (i, raw) in questions.iter().enumerate() {
            if i > 0 && !self.warm_delay.is_zero() {
                tokio::time::sleep(self.warm_delay).await;
            }

            let question = prepare_question(raw);
            if question.is_empty() {
                continue;
            }

            match self.warm_one(&question).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!("Cache warm-up failed for {question:?}: {e:#}");
                    report.errors.push(WarmFailure {
                        question,
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        tracing::info!(
            "Cache warm-up: {} processed, {} skipped, {} errors",
            report.processed,
            report.skipped,
            report.errors.len()
        );
        report
    }

    /// Returns false when the question already resolves from the cache.
    async fn warm_one(&self, question: &str) -> Result<bool> {
        // Warm-up runs are not recorded in the log store
        let mut log = QueryLog::new(question);
        let resolved = self.resolve_query(question, &mut log).await?;
        if self.cache.check(&resolved.embedding).is_some() {
            return Ok(false);
        }

        let candidates = self.retriever.retrieve(&resolved.embedding).await?;
        self.rank_and_store(question, resolved, &candidates, &mut log);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatStream, EmbedError, EmbeddingBackend};
    use crate::models::{ChatMessage, DocumentMetadata};
    use crate::search::vector::{MemoryVectorIndex, VectorIndex, VectorMatch};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as letter-frequency over a few letters.
    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingBackend for LetterEmbedder {
        async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    "aeiourst"
                        .chars()
                        .map(|c| t.matches(c).count() as f32 + 0.1)
                        .collect()
                })
                .collect())
        }
    }

    struct EchoChat {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for EchoChat {
        async fn complete_chat(&self, messages: &[ChatMessage], _t: f32) -> Result<String> {
            self.calls.lock().push(messages.to_vec());
            // Refinement prompts get unparseable output and fall back
            Ok("See (tarifs.pdf, line 1).".to_string())
        }

        async fn stream_chat(&self, _messages: &[ChatMessage], _t: f32) -> Result<ChatStream> {
            let parts: Vec<Result<String>> = vec![Ok("See ".into()), Ok("tarifs.pdf".into())];
            Ok(Box::pin(futures_util::stream::iter(parts)))
        }
    }

    async fn pipeline() -> Arc<RagPipeline> {
        let embedder = EmbeddingClient::new(Arc::new(LetterEmbedder), "test", None);
        let index = Arc::new(MemoryVectorIndex::new());
        for (file, text) in [
            ("tarifs.pdf", "Le prix de la fibre est de 2000 DA"),
            ("facture.pdf", "Payer sa facture en ligne"),
            ("gaming.pdf", "Pack gamer avec ping réduit"),
        ] {
            let emb = embedder.embed(text).await.unwrap();
            index.upsert(
                file,
                emb,
                DocumentMetadata {
                    file_name: file.to_string(),
                    text: text.to_string(),
                    ..DocumentMetadata::default()
                },
            );
        }
        let mut config = Config::default();
        config.cache.warm_delay_ms = 0;
        let chat = Arc::new(EchoChat {
            calls: Mutex::new(Vec::new()),
        });
        Arc::new(RagPipeline::new(
            embedder,
            VectorRetriever::new(index, 20),
            chat,
            &config,
        ))
    }

    #[tokio::test]
    async fn test_answer_records_log_and_sources() {
        let p = pipeline().await;
        let resp = p
            .answer("Quel est le prix de la fibre optique en agence", 10)
            .await
            .unwrap();
        assert!(!resp.sources.is_empty());
        let log = resp.query_log.unwrap();
        assert!(!log.cache_hit);
        let names: Vec<_> = log.steps.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&steps::EMBEDDING));
        assert!(names.contains(&steps::CACHE_CHECK));
        assert!(names.contains(&steps::RETRIEVAL));
        assert!(names.contains(&steps::RERANK));
        assert!(names.contains(&steps::GENERATION));
        assert_eq!(p.logs().len(), 1);
        assert_eq!(p.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_second_identical_question_hits_cache() {
        let p = pipeline().await;
        let first = p.answer("Payer sa facture en ligne maintenant", 10).await.unwrap();
        let second = p.answer("Payer sa facture en ligne maintenant", 10).await.unwrap();
        assert!(second.query_log.unwrap().cache_hit);
        assert_eq!(first.sources, second.sources);
        assert_eq!(p.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let p = pipeline().await;
        assert!(p.answer("   ", 10).await.is_err());
        assert!(p.logs().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_caps_sources() {
        let p = pipeline().await;
        let resp = p.answer("internet", 1).await.unwrap();
        assert!(resp.sources.len() <= 1);
    }

    #[tokio::test]
    async fn test_stream_emits_deltas_then_done() {
        let p = pipeline().await;
        let mut rx = p.answer_stream("Payer sa facture en ligne maintenant", 10);
        let mut text = String::new();
        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            match event {
                AnswerEvent::Delta { content } => text.push_str(&content),
                other => terminal = Some(other),
            }
        }
        assert_eq!(text, "See tarifs.pdf");
        match terminal.unwrap() {
            AnswerEvent::Done { sources, query_log } => {
                assert!(!sources.is_empty());
                assert!(query_log.steps.iter().any(|s| s.name == steps::GENERATION));
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_warm_cache_processes_then_skips() {
        let p = pipeline().await;
        let questions = vec![
            "Payer sa facture en ligne maintenant".to_string(),
            "   ".to_string(),
        ];
        let report = p.warm_cache(&questions).await;
        assert_eq!(report.processed, 1);
        assert!(report.errors.is_empty());

        let report = p.warm_cache(&questions).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 0);
        // Warm-up does not produce query logs
        assert!(p.logs().is_empty());
    }

    /// Counts searches against the wrapped index.
    struct CountingIndex {
        inner: MemoryVectorIndex,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for CountingIndex {
        async fn query(
            &self,
            vector: &[f32],
            top_k: usize,
            include_metadata: bool,
        ) -> Result<Vec<VectorMatch>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query(vector, top_k, include_metadata).await
        }
    }

    #[tokio::test]
    async fn test_warm_cache_skip_does_not_search_index() {
        let embedder = EmbeddingClient::new(Arc::new(LetterEmbedder), "test", None);
        let index = Arc::new(CountingIndex {
            inner: MemoryVectorIndex::new(),
            queries: AtomicUsize::new(0),
        });
        let mut config = Config::default();
        config.cache.warm_delay_ms = 0;
        let chat = Arc::new(EchoChat {
            calls: Mutex::new(Vec::new()),
        });
        let p = RagPipeline::new(embedder, VectorRetriever::new(index.clone(), 20), chat, &config);

        let questions = vec!["Payer sa facture en ligne maintenant".to_string()];
        assert_eq!(p.warm_cache(&questions).await.processed, 1);
        assert_eq!(index.queries.load(Ordering::SeqCst), 1);

        let report = p.warm_cache(&questions).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(index.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_answer_event_wire_shape() {
        let json = serde_json::to_value(AnswerEvent::Delta {
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["content"], "hi");
    }
}
