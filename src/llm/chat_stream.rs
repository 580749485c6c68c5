use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::stream_decoder::{StreamDecoder, StreamEvent, StreamFormat};
use crate::llm::ChatStream;
use crate::models::ChatMessage;

/// Stream chat completions from Ollama or OpenAI.
/// Returns a stream of content delta strings (one per token/chunk).
pub async fn stream_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: &[ChatMessage],
    temperature: f32,
) -> Result<ChatStream> {
    match config.provider.as_str() {
        "ollama" => stream_ollama(client, config, messages, temperature).await,
        "openai" => stream_openai(client, config, messages, temperature).await,
        other => anyhow::bail!("Unsupported LLM provider for chat: {other}"),
    }
}

// ─── Ollama streaming ────────────────────────────────────

#[derive(Serialize)]
struct OllamaStreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

async fn stream_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: &[ChatMessage],
    temperature: f32,
) -> Result<ChatStream> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaStreamRequest {
        model: &config.chat_model,
        messages,
        stream: true,
        options: OllamaOptions { temperature },
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(300))
        .json(&req)
        .send()
        .await
        .context("Failed to connect to Ollama for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    Ok(decode_stream(resp.bytes_stream(), StreamFormat::JsonLines))
}

// ─── OpenAI streaming ────────────────────────────────────

#[derive(Serialize)]
struct OpenAiStreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
}

async fn stream_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: &[ChatMessage],
    temperature: f32,
) -> Result<ChatStream> {
    let url = format!("{}/v1/chat/completions", config.base_url);

    let req = OpenAiStreamRequest {
        model: &config.chat_model,
        messages,
        stream: true,
        temperature,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(300))
        .header(
            "Authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or("")),
        )
        .json(&req)
        .send()
        .await
        .context("Failed to connect to OpenAI for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    Ok(decode_stream(
        resp.bytes_stream(),
        StreamFormat::ServerSentEvents,
    ))
}

// ─── Byte stream → text deltas ───────────────────────────

struct DecodeState<S> {
    bytes: S,
    decoder: StreamDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

/// Turn a raw byte stream into text deltas. Ends after the provider's done
/// signal, the end of the byte stream, or the first read/provider error.
pub fn decode_stream<S, E>(byte_stream: S, format: StreamFormat) -> ChatStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(byte_stream),
        decoder: StreamDecoder::new(format),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            let events = match state.bytes.next().await {
                Some(Ok(bytes)) => state.decoder.feed(&bytes),
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(anyhow::anyhow!("Stream read error: {e}")));
                    continue;
                }
                None => state.decoder.finish(),
            };

            for event in events {
                match event {
                    StreamEvent::Delta(text) => state.pending.push_back(Ok(text)),
                    StreamEvent::Error(message) => state
                        .pending
                        .push_back(Err(anyhow::anyhow!("Provider stream error: {message}"))),
                    StreamEvent::Done => {}
                }
            }
            if state.decoder.is_done() {
                state.finished = true;
            }
        }
    });

    Box::pin(stream)
}
