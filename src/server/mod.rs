pub mod admin;
pub mod middleware;
pub mod routes;

use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use hyper::StatusCode;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

/// Everything a request handler needs, resolved once at startup. Handlers
/// never scan runtime state for configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: Arc<reqwest::Client>,
    pub agent_bin: Arc<PathBuf>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}

/// Request errors raised before any SSE headers are sent. Everything that
/// fails after the stream has opened is reported as an in-stream `error`
/// frame instead.
#[derive(Debug, Error, PartialEq)]
pub enum ApiError {
    #[error("Missing prompt")]
    MissingPrompt,
    #[error("Missing messages")]
    MissingMessages,
    #[error("Invalid request body")]
    InvalidBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
