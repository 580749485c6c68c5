//! Incremental decoder for provider chat streams.
//!
//! Network reads split frames arbitrarily: a JSON payload, a line, or even a
//! multi-byte character may arrive across several reads. The decoder keeps
//! unconsumed bytes in its buffer and only decodes complete lines.

use serde::Deserialize;

/// Framing used by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// `data: {json}` lines terminated by `data: [DONE]` (OpenAI-compatible)
    ServerSentEvents,
    /// One JSON object per line with a `done` flag (Ollama)
    JsonLines,
}

/// Decoded stream events.
///
/// A decoder emits at most one terminal event, either `Error` or `Done`, and
/// nothing after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta
    Delta(String),
    /// Provider reported an error inside the stream. Terminal.
    Error(String),
    /// Normal completion. Terminal.
    Done,
}

pub struct StreamDecoder {
    format: StreamFormat,
    buffer: Vec<u8>,
    done: bool,
}

impl StreamDecoder {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            buffer: Vec::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return the events completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..line.len() - 1], &mut events);
            if self.done {
                self.buffer.clear();
                break;
            }
        }

        events
    }

    /// Signal end of input: decode any trailing unterminated line and emit
    /// `Done` if it has not been emitted yet.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest, &mut events);

        if !self.done {
            self.done = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }

        match self.format {
            StreamFormat::ServerSentEvents => self.decode_sse_line(line, events),
            StreamFormat::JsonLines => self.decode_json_line(line, events),
        }
    }

    fn decode_sse_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        // Comments, event names and ids carry no text
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }

        match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    self.done = true;
                    events.push(StreamEvent::Error(err.message));
                    return;
                }
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if !content.is_empty() {
                    events.push(StreamEvent::Delta(content));
                }
            }
            Err(e) => tracing::warn!("Skipping malformed stream chunk: {e}"),
        }
    }

    fn decode_json_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        match serde_json::from_str::<OllamaStreamChunk>(line) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    self.done = true;
                    events.push(StreamEvent::Error(err));
                    return;
                }
                let content = chunk.message.map(|m| m.content).unwrap_or_default();
                if !content.is_empty() {
                    events.push(StreamEvent::Delta(content));
                }
                if chunk.done {
                    self.done = true;
                    events.push(StreamEvent::Done);
                }
            }
            Err(e) => tracing::warn!("Skipping malformed stream chunk: {e}"),
        }
    }
}

// ─── Provider payloads ───────────────────────────────────

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaStreamMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaStreamMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiStreamError>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamError {
    message: String,
}
