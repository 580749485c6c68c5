//! Ghost-prompt query refinement.
//!
//! Short or vague questions ("internet?", "what's the deal?") embed poorly.
//! [`is_query_likely_ambiguous`] is a cheap local gate; only when it fires do
//! we spend one low-temperature LLM call rewriting the query into a precise
//! search query with an intent label and extracted entities.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::llm::ChatModel;
use crate::models::ChatMessage;

pub const UNKNOWN_INTENT: &str = "unknown";

const REFINE_TEMPERATURE: f32 = 0.1;

static WH_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(what|how|where|when|why|qui|quoi|comment|où|quand|pourquoi)\b")
        .expect("valid regex")
});

static IMPERATIVE_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(tell me|show me|give me|dis[- ]moi|montre)\b").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedQuery {
    pub original_query: String,
    pub refined_query: String,
    pub intent: String,
    pub entities: Vec<String>,
    pub is_ambiguous: bool,
}

impl RefinedQuery {
    /// The query passed through untouched.
    pub fn unrefined(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            refined_query: query.to_string(),
            intent: UNKNOWN_INTENT.to_string(),
            entities: Vec::new(),
            is_ambiguous: false,
        }
    }
}

/// Cheap heuristic deciding whether a query is worth refining.
pub fn is_query_likely_ambiguous(query: &str) -> bool {
    let query = query.trim();
    // Also covers determiner + noun ("la fibre", "the price")
    if query.split_whitespace().count() <= 2 {
        return true;
    }

    WH_OPENER.is_match(query) || IMPERATIVE_OPENER.is_match(query) || query.ends_with('?')
}

pub struct QueryRefiner {
    chat: Arc<dyn ChatModel>,
}

impl QueryRefiner {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Rewrite `query` into a search query. Never fails: any provider or
    /// parse error yields [`RefinedQuery::unrefined`].
    pub async fn refine(&self, query: &str) -> RefinedQuery {
        let messages = build_refine_messages(query);

        match self.chat.complete_chat(&messages, REFINE_TEMPERATURE).await {
            Ok(response) => match parse_refinement(query, &response) {
                Some(refined) => {
                    tracing::info!(
                        "Query refined: {:?} -> {:?} (intent: {})",
                        query,
                        refined.refined_query,
                        refined.intent
                    );
                    refined
                }
                None => {
                    tracing::warn!("Failed to parse query refinement. Raw: {response}");
                    RefinedQuery::unrefined(query)
                }
            },
            Err(e) => {
                tracing::warn!("Query refinement failed: {e:#}");
                RefinedQuery::unrefined(query)
            }
        }
    }
}

fn build_refine_messages(query: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You rewrite customer questions into search queries for the knowledge base of an \
             internet and telephone operator (offers, prices, billing, speed, gaming, procedures).\n\
             Rules:\n\
             - Keep the user's language.\n\
             - Add at most 3 domain words that make the query specific. Never broaden its scope.\n\
             - intent is one short label: price, billing, gaming, speed, procedure, promotion or unknown.\n\
             Respond with ONLY a JSON object:\n\
             {\"refinedQuery\": string, \"intent\": string, \"entities\": [string], \"isAmbiguous\": bool}",
        ),
        ChatMessage::user("internet?"),
        ChatMessage::assistant(
            r#"{"refinedQuery":"internet offers fibre ADSL 4G subscription","intent":"unknown","entities":["internet"],"isAmbiguous":true}"#,
        ),
        ChatMessage::user("combien le pack gamer"),
        ChatMessage::assistant(
            r#"{"refinedQuery":"prix tarif pack gamer","intent":"price","entities":["pack gamer"],"isAmbiguous":true}"#,
        ),
        ChatMessage::user(query),
    ]
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefinementPayload {
    refined_query: Option<String>,
    intent: Option<String>,
    #[serde(default)]
    entities: Vec<String>,
    is_ambiguous: Option<bool>,
}

fn parse_refinement(original: &str, content: &str) -> Option<RefinedQuery> {
    let json = first_json_object(content)?;
    let payload: RefinementPayload = serde_json::from_str(json).ok()?;

    let refined_query = payload
        .refined_query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| original.to_string());
    let intent = payload
        .intent
        .map(|i| i.trim().to_lowercase())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| UNKNOWN_INTENT.to_string());

    Some(RefinedQuery {
        original_query: original.to_string(),
        refined_query,
        intent,
        entities: payload.entities,
        is_ambiguous: payload.is_ambiguous.unwrap_or(true),
    })
}

/// First balanced `{...}` block of `text`, ignoring braces inside JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
