use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use hyper::StatusCode;
use hyper::header;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};

use super::middleware;
use super::{ApiError, AppState};
use crate::agent::AgentProcess;
use crate::prompt::{self, FlowContext, Message};
use crate::relay::{self, Frame};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .nest("/paautin-ai", super::admin::router())
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::strip_trailing_slash))
        .layer(axum::middleware::from_fn(
            middleware::enrich_current_span_middleware,
        ))
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "project": state.config.project_dir.display().to_string(),
    }))
}

// --- Companion chat ---

#[derive(Deserialize)]
pub struct ChatRequest {
    pub prompt: Option<String>,
    pub history: Option<Vec<Message>>,
    #[serde(rename = "flowContext")]
    pub flow_context: Option<FlowContext>,
}

#[tracing::instrument(skip_all)]
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or(ApiError::MissingPrompt)?;

    let composed = prompt::compose(
        &prompt,
        body.history.as_deref().unwrap_or_default(),
        body.flow_context.as_ref(),
    );

    tracing::info!(
        prompt_len = composed.len(),
        history = body.history.as_ref().map(|h| h.len()).unwrap_or(0),
        "chat request"
    );

    Ok(Sse::new(agent_event_stream(state, composed)))
}

/// SSE stream for one agent subprocess run. Every upstream line is
/// translated in order; the stream always closes with the `[DONE]` sentinel.
/// Dropping the stream (client disconnect) drops the `AgentProcess`, which
/// terminates the subprocess.
pub(crate) fn agent_event_stream(
    state: AppState,
    prompt: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut agent = match AgentProcess::spawn(&state.agent_bin, &state.config, &prompt) {
            Ok(agent) => agent,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn agent process");
                let frame = Frame::Error(format!("failed to spawn agent: {e}"));
                yield Ok(Event::default().data(frame.to_json()));
                yield Ok(Event::default().data(relay::DONE_SENTINEL));
                return;
            }
        };

        loop {
            match agent.next_line().await {
                Ok(Some(line)) => {
                    for frame in relay::parse_line(&line) {
                        yield Ok(Event::default().data(frame.to_json()));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "error reading agent output");
                    let frame = Frame::Error(format!("error reading agent output: {e}"));
                    yield Ok(Event::default().data(frame.to_json()));
                    break;
                }
            }
        }

        yield Ok(Event::default().data(relay::DONE_SENTINEL));
    }
}
