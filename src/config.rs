use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// LLM and embedding provider configuration
    pub llm: LlmConfig,
    /// External vector index (ANN service) configuration
    pub vector: VectorIndexConfig,
    /// Hybrid reranker tuning
    pub reranker: RerankerConfig,
    /// Similarity cache tuning
    pub cache: CacheConfig,
    /// Retrieval and answer-assembly budgets
    pub pipeline: PipelineConfig,
    /// Number of query logs retained for diagnostics
    pub query_log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for chat and query refinement
    pub chat_model: String,
    /// Primary model name for embeddings
    pub embedding_model: String,
    /// Secondary embedding model used when the primary is not found
    pub fallback_embedding_model: Option<String>,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Temperature for answer generation
    pub answer_temperature: f32,
}

/// Pinecone-style vector index service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    /// Index host URL. If None, an empty in-memory index is used.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub namespace: Option<String>,
}

/// Weights and cut-offs for the hybrid semantic + keyword reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// Fixed floor used when the best score is weak.
    pub threshold_floor: f32,
    /// Fraction of the top score kept when the best score is strong.
    pub threshold_ratio: f32,
    /// Results restored when thresholding leaves fewer than this.
    pub min_results: usize,
    pub max_results: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.6,
            keyword_weight: 0.4,
            threshold_floor: 0.27,
            threshold_ratio: 0.9,
            min_results: 2,
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum cosine similarity for a cache hit.
    pub similarity_threshold: f32,
    /// Maximum number of cached queries (0 = unbounded).
    pub capacity: usize,
    /// Delay between questions while warming the cache.
    pub warm_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            capacity: 500,
            warm_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates fetched from the vector index before reranking.
    pub initial_retrieval_count: usize,
    /// Character budget of each source preview shown to the user.
    pub preview_chars: usize,
    /// Token budget (chars / 4 estimate) of the context sent to the LLM.
    pub context_token_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_retrieval_count: 20,
            preview_chars: 240,
            context_token_budget: 3500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            llm: LlmConfig::default(),
            vector: VectorIndexConfig::default(),
            reranker: RerankerConfig::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            query_log_capacity: 100,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            fallback_embedding_model: Some("all-minilm".to_string()),
            api_key: None,
            answer_temperature: 0.3,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }

        // LLM config
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_FALLBACK_MODEL") {
            // Empty disables the fallback
            config.llm.fallback_embedding_model = Some(model).filter(|m| !m.trim().is_empty());
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_ANSWER_TEMPERATURE") {
            if let Ok(v) = val.parse() {
                config.llm.answer_temperature = v;
            }
        }

        // Vector index config
        if let Ok(url) = std::env::var("VECTOR_INDEX_URL") {
            config.vector.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("VECTOR_INDEX_API_KEY") {
            config.vector.api_key = Some(key);
        }
        if let Ok(ns) = std::env::var("VECTOR_INDEX_NAMESPACE") {
            config.vector.namespace = Some(ns);
        }

        // Reranker config
        if let Ok(val) = std::env::var("RERANK_SEMANTIC_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.reranker.semantic_weight = v;
            }
        }
        if let Ok(val) = std::env::var("RERANK_KEYWORD_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.reranker.keyword_weight = v;
            }
        }
        if let Ok(val) = std::env::var("RERANK_MAX_RESULTS") {
            if let Ok(v) = val.parse::<usize>() {
                config.reranker.max_results = v.max(1);
            }
        }

        // Cache config
        if let Ok(val) = std::env::var("CACHE_SIMILARITY_THRESHOLD") {
            if let Ok(v) = val.parse::<f32>() {
                config.cache.similarity_threshold = v.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = std::env::var("CACHE_CAPACITY") {
            if let Ok(v) = val.parse() {
                config.cache.capacity = v;
            }
        }
        if let Ok(val) = std::env::var("CACHE_WARM_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.cache.warm_delay_ms = v;
            }
        }

        // Pipeline budgets
        if let Ok(val) = std::env::var("RAG_INITIAL_RETRIEVAL") {
            if let Ok(v) = val.parse::<usize>() {
                config.pipeline.initial_retrieval_count = v.max(1);
            }
        }
        if let Ok(val) = std::env::var("RAG_PREVIEW_CHARS") {
            if let Ok(v) = val.parse() {
                config.pipeline.preview_chars = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_CONTEXT_TOKEN_BUDGET") {
            if let Ok(v) = val.parse() {
                config.pipeline.context_token_budget = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_QUERY_LOG_CAPACITY") {
            if let Ok(v) = val.parse::<usize>() {
                config.query_log_capacity = v.max(1);
            }
        }

        config
    }
}
