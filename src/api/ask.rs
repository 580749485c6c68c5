use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::{self, Stream};

use crate::models::{AnswerResponse, AskRequest};
use crate::pipeline::assemble::prepare_question;
use crate::pipeline::AnswerEvent;
use crate::state::AppState;

/// POST /api/ask — answer a question with citations.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AnswerResponse>, (StatusCode, String)> {
    validate_question(&req)?;

    state
        .pipeline
        .answer(&req.question, req.top_k)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Ask failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to answer question: {e}"),
            )
        })
}

/// POST /api/ask/stream — answer with SSE streaming.
///
/// Emits `delta` events with text fragments, then a single `done` event
/// (sources + query log) or `error` event (message).
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    validate_question(&req)?;

    let rx = state.pipeline.answer_stream(&req.question, req.top_k);

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse_event(&event)), rx))
    });

    Ok(Sse::new(events))
}

/// Rejects questions with nothing left once control tokens are stripped.
fn validate_question(req: &AskRequest) -> Result<(), (StatusCode, String)> {
    if prepare_question(&req.question).is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question is required".to_string()));
    }
    Ok(())
}

/// SSE event name and JSON `data` for a pipeline event.
fn event_payload(event: &AnswerEvent) -> (&'static str, serde_json::Value) {
    match event {
        AnswerEvent::Delta { content } => ("delta", serde_json::json!({ "content": content })),
        AnswerEvent::Done { sources, query_log } => (
            "done",
            serde_json::json!({ "sources": sources, "queryLog": query_log }),
        ),
        AnswerEvent::Error { message } => ("error", serde_json::json!({ "message": message })),
    }
}

fn to_sse_event(event: &AnswerEvent) -> Event {
    let (name, payload) = event_payload(event);
    Event::default().event(name).data(payload.to_string())
}
