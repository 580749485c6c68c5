use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::llm::{EmbedError, EmbeddingBackend};

/// Maximum characters sent per text to the embedding API.
/// nomic-embed-text has an 8 192-token context; 3 000 chars stays under it
/// even for dense text.
const MAX_EMBED_CHARS: usize = 3_000;

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Embedding client with primary/fallback model selection.
///
/// Inputs are sent in sequential batches. If the provider reports that the
/// primary model does not exist, the same batch is retried once with the
/// fallback model; any other failure propagates.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    primary_model: String,
    fallback_model: Option<String>,
}

impl EmbeddingClient {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        primary_model: impl Into<String>,
        fallback_model: Option<String>,
    ) -> Self {
        Self {
            backend,
            primary_model: primary_model.into(),
            fallback_model,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self::new(
            Arc::new(HttpEmbeddingBackend::new(client, config.clone())),
            config.embedding_model.clone(),
            config.fallback_embedding_model.clone(),
        )
    }

    /// Generate the embedding for a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results.into_iter().next().context("No embedding returned")
    }

    /// Generate embeddings for a list of texts, preserving order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let batch_size = self.backend.max_batch_size().max(1);
        let mut all_embeddings = Vec::with_capacity(truncated.len());

        for chunk in truncated.chunks(batch_size) {
            let embeddings = self.embed_with_fallback(chunk).await?;
            if embeddings.len() != chunk.len() {
                anyhow::bail!(
                    "Embedding provider returned {} vectors for {} inputs",
                    embeddings.len(),
                    chunk.len()
                );
            }
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    async fn embed_with_fallback(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.backend.embed(&self.primary_model, texts).await {
            Ok(embeddings) => Ok(embeddings),
            Err(EmbedError::ModelNotFound { model }) => {
                let Some(fallback) = self.fallback_model.as_deref() else {
                    anyhow::bail!("Embedding model {model} not found and no fallback configured");
                };
                tracing::warn!("Embedding model {model} not found, falling back to {fallback}");
                self.backend
                    .embed(fallback, texts)
                    .await
                    .map_err(anyhow::Error::from)
                    .with_context(|| format!("Fallback embedding model {fallback} failed"))
            }
            Err(EmbedError::Provider(e)) => Err(e),
        }
    }
}

/// Returns true when a provider error response means "unknown model".
fn is_model_not_found(status: StatusCode, body: &str) -> bool {
    let lower = body.to_lowercase();
    let mentions_model = lower.contains("model");
    mentions_model
        && (status == StatusCode::NOT_FOUND
            || lower.contains("not found")
            || lower.contains("does not exist"))
}

/// Embedding backend speaking the Ollama or OpenAI-compatible HTTP API.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpEmbeddingBackend {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self.config.provider.as_str() {
            "ollama" => embed_ollama(&self.client, &self.config, model, texts).await,
            "openai" => embed_openai(&self.client, &self.config, model, texts).await,
            other => Err(anyhow::anyhow!("Unknown LLM provider: {other}").into()),
        }
    }

    fn max_batch_size(&self) -> usize {
        match self.config.provider.as_str() {
            "openai" => 64,
            _ => 32,
        }
    }
}

async fn check_response(
    resp: reqwest::Response,
    model: &str,
    provider: &str,
) -> Result<reqwest::Response, EmbedError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if is_model_not_found(status, &body) {
        return Err(EmbedError::ModelNotFound {
            model: model.to_string(),
        });
    }
    Err(anyhow::anyhow!("{provider} embed API returned {status}: {body}").into())
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    /// Ask Ollama to truncate inputs longer than the model context
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let url = format!("{}/api/embed", config.base_url);

    let req = OllamaEmbedRequest {
        model,
        input: texts,
        truncate: true,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama embed API")?;

    let resp = check_response(resp, model, "Ollama").await?;

    let body: OllamaEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama embed response")?;

    Ok(body.embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let req = OpenAiEmbedRequest { model, input: texts };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI embed API")?;

    let resp = check_response(resp, model, "OpenAI").await?;

    let body: OpenAiEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI embed response")?;

    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the models it was called with; `missing` models report not-found.
    struct ScriptedBackend {
        missing: Vec<String>,
        calls: Mutex<Vec<(String, usize)>>,
        batch: usize,
    }

    impl ScriptedBackend {
        fn new(missing: &[&str], batch: usize) -> Self {
            Self {
                missing: missing.iter().map(|m| m.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
                batch,
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for ScriptedBackend {
        async fn embed(
            &self,
            model: &str,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.lock().push((model.to_string(), texts.len()));
            if self.missing.iter().any(|m| m == model) {
                return Err(EmbedError::ModelNotFound {
                    model: model.to_string(),
                });
            }
            if model == "broken" {
                return Err(anyhow::anyhow!("quota exceeded").into());
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn max_batch_size(&self) -> usize {
            self.batch
        }
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_for_embedding("hello"), "hello");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "é".repeat(2_000); // 4 000 bytes
        let cut = truncate_for_embedding(&text);
        assert!(cut.len() <= MAX_EMBED_CHARS);
        assert!(text.is_char_boundary(cut.len()));
    }

    #[test]
    fn test_model_not_found_detection() {
        assert!(is_model_not_found(
            StatusCode::NOT_FOUND,
            r#"{"error":"model \"x\" not found, try pulling it first"}"#
        ));
        assert!(is_model_not_found(
            StatusCode::BAD_REQUEST,
            "The model `text-embedding-4` does not exist"
        ));
        assert!(!is_model_not_found(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        assert!(!is_model_not_found(StatusCode::NOT_FOUND, "no route"));
    }

    #[tokio::test]
    async fn test_primary_model_used_when_available() {
        let backend = Arc::new(ScriptedBackend::new(&[], 32));
        let client = EmbeddingClient::new(backend.clone(), "primary", Some("fallback".into()));
        let v = client.embed("abc").await.unwrap();
        assert_eq!(v, vec![3.0, 1.0]);
        assert_eq!(backend.calls.lock().as_slice(), &[("primary".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_fallback_on_model_not_found() {
        let backend = Arc::new(ScriptedBackend::new(&["primary"], 32));
        let client = EmbeddingClient::new(backend.clone(), "primary", Some("fallback".into()));
        let v = client.embed("abcd").await.unwrap();
        assert_eq!(v[0], 4.0);
        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "fallback");
    }

    #[tokio::test]
    async fn test_no_fallback_configured_errors() {
        let backend = Arc::new(ScriptedBackend::new(&["primary"], 32));
        let client = EmbeddingClient::new(backend, "primary", None);
        assert!(client.embed("x").await.is_err());
    }

    #[tokio::test]
    async fn test_other_errors_do_not_fall_back() {
        let backend = Arc::new(ScriptedBackend::new(&[], 32));
        let client = EmbeddingClient::new(backend.clone(), "broken", Some("fallback".into()));
        let err = client.embed("x").await.unwrap_err();
        assert!(err.to_string().contains("quota"));
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_batches_are_sequential_and_ordered() {
        let backend = Arc::new(ScriptedBackend::new(&[], 2));
        let client = EmbeddingClient::new(backend.clone(), "primary", None);
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = client.embed_batch(&texts).await.unwrap();
        let lens: Vec<f32> = out.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let sizes: Vec<usize> = backend.calls.lock().iter().map(|c| c.1).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    // ─── HTTP backend ────────────────────────────────────

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_client(provider: &str, base_url: String) -> EmbeddingClient {
        let config = LlmConfig {
            provider: provider.to_string(),
            base_url,
            embedding_model: "primary".to_string(),
            fallback_embedding_model: Some("fallback".to_string()),
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        EmbeddingClient::from_config(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_ollama_missing_model_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({ "model": "primary", "truncate": true })))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string(r#"{"error":"model \"primary\" not found, try pulling it first"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        // The fallback model has a different dimension than the primary
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({ "model": "fallback", "input": ["bonjour"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client("ollama", server.uri());
        let v = client.embed("bonjour").await.unwrap();
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_openai_missing_model_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({ "model": "primary" })))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": { "message": "The model `primary` does not exist" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({ "model": "fallback" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [1.0, 0.0] }, { "embedding": [0.0, 1.0] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client("openai", server.uri());
        let out = client
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_http_server_error_does_not_fall_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client("ollama", server.uri());
        let err = client.embed("x").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_provider() {
        let backend = Arc::new(ScriptedBackend::new(&[], 2));
        let client = EmbeddingClient::new(backend.clone(), "primary", None);
        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
        assert!(backend.calls.lock().is_empty());
    }
}
