//! # rag-query
//!
//! A retrieval-augmented question answering service. Questions are matched
//! against chunks stored in a vector index, reranked with a hybrid
//! semantic + keyword score, and answered by an LLM with per-claim citations.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌────────────────┐
//!                        │    Question    │
//!                        └───────┬────────┘
//!                                │ ambiguous? (local heuristic)
//!                                ▼
//!                    ┌────────────────────────┐
//!                    │ Ghost-prompt refine    │
//!                    │ LLM, temperature 0.1   │
//!                    │ query + intent label   │
//!                    └───────────┬────────────┘
//!                                │
//!                                ▼
//!                    ┌────────────────────────┐
//!                    │ Embed search query     │
//!                    │ primary → fallback     │
//!                    └───────────┬────────────┘
//!                    ┌───────────┴───────────┐   joined
//!                    ▼                       ▼
//!          ┌──────────────────┐    ┌──────────────────┐
//!          │ Similarity cache │    │ Vector search    │
//!          │ cosine ≥ 0.95    │    │ over-fetch 20    │
//!          └────────┬─────────┘    └────────┬─────────┘
//!                   │ hit                   │ miss
//!                   │          ┌────────────┴──────────────┐
//!                   │          │ Hybrid rerank             │
//!                   │          │ 0.6 semantic + 0.4 kw     │
//!                   │          │ dedup by file             │
//!                   │          │ dynamic threshold         │
//!                   │          │ intent filter, keep 2..5  │
//!                   │          └────────────┬──────────────┘
//!                   │                       │ cache add
//!                   └───────────┬───────────┘
//!                               ▼
//!                  ┌────────────────────────────┐
//!                  │ Sources: 240-char previews │
//!                  │ Context: ~3500 tokens      │
//!                  └─────────────┬──────────────┘
//!                                ▼
//!                  ┌────────────────────────────┐
//!                  │ LLM answer (sync or SSE)   │
//!                  └────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for providers, index, reranker and cache
//! - [`models`] - Shared data types: `RetrievedDocument`, `RankedDocument`, `Source`, request/response types
//! - [`llm::embeddings`] - Batch embedding with primary/fallback model selection
//! - [`llm::chat`] / [`llm::chat_stream`] - Chat completion and streaming via Ollama or OpenAI-compatible APIs
//! - [`llm::stream_decoder`] - Incremental decoder for SSE and JSON-lines provider streams
//! - [`llm::refine`] - Ambiguity heuristic and ghost-prompt query refinement
//! - [`search::keywords`] / [`search::keyword_score`] - Domain keyword weights and weighted keyword scoring
//! - [`search::rerank`] - Hybrid reranker with dynamic threshold and intent filtering
//! - [`search::vector`] - Vector index trait, HTTP and in-memory indexes, retriever
//! - [`cache`] - Bounded similarity cache of past retrievals
//! - [`query_log`] - Per-request step tracing and recent-log store
//! - [`pipeline`] - Orchestration, cache warm-up and prompt assembly
//! - [`api`] - Axum HTTP handlers for asking, streaming, cache admin and logs
//! - [`state`] - Shared application state wiring the pipeline from config

pub mod api;
pub mod cache;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod query_log;
pub mod search;
pub mod state;
