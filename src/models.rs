use serde::{Deserialize, Serialize};
use std::fmt;

use crate::query_log::QueryLogSummary;

/// Line reference stored with a chunk. Indexers write either a number or a
/// free-form label such as "12-18".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LineNumber {
    Number(u64),
    Text(String),
}

impl Default for LineNumber {
    fn default() -> Self {
        LineNumber::Text("N/A".to_string())
    }
}

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineNumber::Number(n) => write!(f, "{n}"),
            LineNumber::Text(s) => f.write_str(s),
        }
    }
}

/// Metadata attached to a chunk in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub line_number: LineNumber,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Any other fields the indexer stored
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_file_name() -> String {
    "Unknown".to_string()
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            file_name: default_file_name(),
            line_number: LineNumber::default(),
            text: String::new(),
            folder: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A chunk returned by the vector index, before reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    /// Vector similarity reported by the index (0..1)
    pub score: f32,
    pub metadata: DocumentMetadata,
}

/// A chunk after hybrid reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDocument {
    #[serde(flatten)]
    pub document: RetrievedDocument,
    /// 1-based position in the retrieval order
    pub original_rank: usize,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub hybrid_score: f32,
    /// Score used for ordering. Equal to `hybrid_score` until a boost layer is applied.
    pub final_score: f32,
}

impl RankedDocument {
    pub fn file_name(&self) -> &str {
        &self.document.metadata.file_name
    }

    pub fn text(&self) -> &str {
        &self.document.metadata.text
    }
}

/// A single chat turn (system, user or assistant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Citation returned to the caller, one per source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub file_name: String,
    pub line_number: LineNumber,
    /// Preview text, truncated for display
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Ask request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

/// Answer returned by the synchronous endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_log: Option<QueryLogSummary>,
}

/// Cache warm-up request. Without questions, the default list is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarmRequest {
    pub questions: Option<Vec<String>>,
}
