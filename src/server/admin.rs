use axum::body::Body;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use hyper::header;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio_stream::StreamExt;

use super::routes::agent_event_stream;
use super::{ApiError, AppState};
use crate::config::Mode;
use crate::prompt::{self, FlowContext, Message};
use crate::relay::{self, Frame, LineBuffer};

/// Admin-scoped routes, mounted under `/paautin-ai`. This is the surface the
/// host editor runtime talks to.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config))
        .route("/chat", post(chat))
}

/// Non-secret configuration snapshot for the editor sidebar.
async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "mode": config.mode.as_str(),
        "model": config.model,
        "maxTurns": config.max_turns,
        "project": config.project_dir.display().to_string(),
        "spawnStrategy": config.spawn_strategy.as_str(),
        "serverUrl": config.server_url,
        "hasApiKey": config.api_key.is_some(),
    }))
}

#[derive(Deserialize)]
pub struct AdminChatRequest {
    pub mode: Option<String>,
    pub messages: Option<Vec<Message>>,
    #[serde(rename = "flowContext")]
    pub flow_context: Option<FlowContext>,
}

/// The raw JSON body is kept alongside the typed view so server mode can
/// forward exactly what the client sent, unknown fields included.
#[tracing::instrument(skip_all, fields(mode))]
pub async fn chat(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Response, ApiError> {
    let body: AdminChatRequest =
        serde_json::from_value(raw.clone()).map_err(|_| ApiError::InvalidBody)?;

    let messages = body
        .messages
        .filter(|m| !m.is_empty())
        .ok_or(ApiError::MissingMessages)?;

    let mode_raw = body
        .mode
        .unwrap_or_else(|| state.config.mode.as_str().to_string());
    tracing::Span::current().record("mode", mode_raw.as_str());

    let Ok(mode) = mode_raw.parse::<Mode>() else {
        tracing::warn!(mode = %mode_raw, "unknown chat mode requested");
        return Ok(sse_error_response(&format!("unknown mode: {mode_raw}")));
    };

    match mode {
        Mode::ClaudeCode => {
            // Only the last message goes to the subprocess; the CLI keeps
            // its own turn state within the run.
            let last = messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let composed = prompt::compose(&last, &[], body.flow_context.as_ref());
            Ok(Sse::new(agent_event_stream(state, composed)).into_response())
        }
        Mode::Simple => {
            Ok(Sse::new(api_event_stream(state, messages, body.flow_context)).into_response())
        }
        Mode::Server => Ok(proxy_chat(state, &raw).await),
    }
}

// --- simple mode: direct remote API streaming ---

const SYSTEM_INSTRUCTIONS: &str = "You are an assistant embedded in a visual flow editor. \
Help the user understand, build, and debug their flows. Answer concisely. \
When a flow context block is provided, ground your answers in it.";

fn build_system_prompt(flow: Option<&FlowContext>) -> String {
    match prompt::flow_context_block(flow) {
        Some(block) => format!("{SYSTEM_INSTRUCTIONS}\n\n{block}"),
        None => SYSTEM_INSTRUCTIONS.to_string(),
    }
}

/// Call the remote messages API with streaming enabled and translate its
/// delta events into the server's frame vocabulary.
fn api_event_stream(
    state: AppState,
    messages: Vec<Message>,
    flow: Option<FlowContext>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let Some(api_key) = state.config.api_key.clone() else {
            let frame = Frame::Error("simple mode requires ANTHROPIC_API_KEY".to_string());
            yield Ok(Event::default().data(frame.to_json()));
            yield Ok(Event::default().data(relay::DONE_SENTINEL));
            return;
        };

        let api_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = if m.role == "assistant" { "assistant" } else { "user" };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let request = json!({
            "model": state.config.model,
            "max_tokens": 4096,
            "stream": true,
            "system": build_system_prompt(flow.as_ref()),
            "messages": api_messages,
        });

        let response = state
            .http_client
            .post(&state.config.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "remote API request failed");
                let frame = Frame::Error(format!("upstream request failed: {e}"));
                yield Ok(Event::default().data(frame.to_json()));
                yield Ok(Event::default().data(relay::DONE_SENTINEL));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "remote API returned error");
            let frame = Frame::Error(format!("upstream returned {status}: {body}"));
            yield Ok(Event::default().data(frame.to_json()));
            yield Ok(Event::default().data(relay::DONE_SENTINEL));
            return;
        }

        let mut upstream = response.bytes_stream();
        let mut line_buf = LineBuffer::new();

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "remote API stream failed");
                    let frame = Frame::Error(format!("upstream stream failed: {e}"));
                    yield Ok(Event::default().data(frame.to_json()));
                    break;
                }
            };
            for line in line_buf.push(&chunk) {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<Value>(data) {
                    for frame in relay::parse_event(&event) {
                        yield Ok(Event::default().data(frame.to_json()));
                    }
                }
            }
        }

        yield Ok(Event::default().data(relay::DONE_SENTINEL));
    }
}

// --- server mode: verbatim SSE passthrough ---

/// Forward the request body to the configured remote `/chat` endpoint and
/// pipe its SSE byte stream through without reparsing.
async fn proxy_chat(state: AppState, body: &Value) -> Response {
    let Some(base) = state.config.server_url.clone() else {
        return sse_error_response("server mode requires PAAUTIN_SERVER_URL");
    };
    let url = format!("{}/chat", base.trim_end_matches('/'));

    let response = match state.http_client.post(&url).json(body).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, url, "proxy request failed");
            return sse_error_response(&format!("upstream request failed: {e}"));
        }
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        tracing::error!(%status, url, "proxy target returned error");
        return sse_error_response(&format!("upstream returned {status}: {text}"));
    }

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(response.bytes_stream()))
        .expect("static event-stream response")
}

/// A complete one-error SSE response: a single `error` frame and the
/// `[DONE]` sentinel.
fn sse_error_response(message: &str) -> Response {
    let frame = Frame::Error(message.to_string());
    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        frame.to_json(),
        relay::DONE_SENTINEL
    );
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(body))
        .expect("static event-stream response")
}
