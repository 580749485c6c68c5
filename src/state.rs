use std::sync::Arc;

use crate::config::Config;
use crate::llm::chat::HttpChatModel;
use crate::llm::embeddings::EmbeddingClient;
use crate::llm::ChatModel;
use crate::pipeline::RagPipeline;
use crate::search::vector::{HttpVectorIndex, MemoryVectorIndex, VectorIndex, VectorRetriever};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let index: Arc<dyn VectorIndex> = match &config.vector.base_url {
            Some(url) => {
                tracing::info!("Vector index: {url}");
                Arc::new(HttpVectorIndex::new(http_client.clone(), url, &config.vector))
            }
            None => {
                tracing::warn!("VECTOR_INDEX_URL not set, using an empty in-memory index");
                Arc::new(MemoryVectorIndex::new())
            }
        };

        let embedder = EmbeddingClient::from_config(http_client.clone(), &config.llm);
        let retriever = VectorRetriever::new(index, config.pipeline.initial_retrieval_count);
        let chat: Arc<dyn ChatModel> =
            Arc::new(HttpChatModel::new(http_client, config.llm.clone()));

        Ok(Self::with_pipeline(
            config.clone(),
            RagPipeline::new(embedder, retriever, chat, &config),
        ))
    }

    pub fn with_pipeline(config: Config, pipeline: RagPipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }
}
