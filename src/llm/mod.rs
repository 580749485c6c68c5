//! Embedding and chat providers consumed by the pipeline.
//!
//! The pipeline only sees the [`EmbeddingBackend`] and [`ChatModel`] traits;
//! the HTTP adapters for Ollama and OpenAI-compatible APIs live in
//! [`embeddings`], [`chat`] and [`chat_stream`].

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;

use crate::models::ChatMessage;

pub mod chat;
pub mod chat_stream;
pub mod embeddings;
pub mod refine;
pub mod stream_decoder;

/// Stream of answer text deltas.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The provider does not know the requested model.
    #[error("embedding model not found: {model}")]
    ModelNotFound { model: String },
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Raw embedding provider call for an explicit model.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Largest number of inputs sent in one request.
    fn max_batch_size(&self) -> usize {
        32
    }
}

/// Chat completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete_chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;

    /// Stream answer deltas. The stream ends once the provider signals
    /// completion or the connection closes; read failures surface as `Err` items.
    async fn stream_chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<ChatStream>;
}
