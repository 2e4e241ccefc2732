//! HTTP routes and handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chatguard_core::Persona;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::debug;

use crate::relay::{Relay, RelayError};

const MAX_BODY_BYTES: usize = 64 * 1024;

const INVALID_START_BODY: &str = "Invalid request body.";
const MESSAGE_FIELDS_REQUIRED: &str = "sessionId and text are required.";
const SESSION_ID_REQUIRED: &str = "sessionId required";

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,

    /// Prometheus handle for `/metrics`; absent when no recorder is installed
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(relay: Relay, metrics_handle: Option<PrometheusHandle>) -> Self {
        Self {
            relay: Arc::new(relay),
            metrics_handle,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // The browser client is served from its own origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/start-session", post(start_session))
        .route("/message", post(message))
        .route("/delete-session", post(delete_session))
        .fallback(fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Any value other than the string "male" selects the female persona
    #[serde(default)]
    pub persona: Option<serde_json::Value>,
    #[serde(default)]
    pub age_confirmed: bool,
    #[serde(default)]
    pub intake: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub reply: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub deleted: bool,
}

async fn start_session(
    State(state): State<AppState>,
    payload: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Json<StartSessionResponse>, AppError> {
    metrics::counter!("chatguard_requests_total", "action" => "start_session").increment(1);
    let Json(req) = payload.map_err(|r| AppError::rejected(r, INVALID_START_BODY))?;

    let persona = Persona::from_label(req.persona.as_ref().and_then(serde_json::Value::as_str));
    let session_id =
        state
            .relay
            .start_session(persona, req.age_confirmed, req.intake.unwrap_or_default())?;

    Ok(Json(StartSessionResponse { session_id }))
}

async fn message(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    metrics::counter!("chatguard_requests_total", "action" => "message").increment(1);
    let Json(req) = payload.map_err(|r| AppError::rejected(r, MESSAGE_FIELDS_REQUIRED))?;

    let (Some(session_id), Some(text)) = (req.session_id, req.text) else {
        return Err(AppError::Validation(MESSAGE_FIELDS_REQUIRED.to_string()));
    };

    let outcome = state.relay.post_message(&session_id, &text).await?;
    Ok(Json(MessageResponse {
        reply: outcome.into_reply(),
    }))
}

async fn delete_session(
    State(state): State<AppState>,
    payload: Result<Json<DeleteSessionRequest>, JsonRejection>,
) -> Result<Json<DeleteSessionResponse>, AppError> {
    metrics::counter!("chatguard_requests_total", "action" => "delete_session").increment(1);
    let Json(req) = payload.map_err(|r| AppError::rejected(r, SESSION_ID_REQUIRED))?;

    state
        .relay
        .delete_session(req.session_id.as_deref().unwrap_or_default())?;

    Ok(Json(DeleteSessionResponse { deleted: true }))
}

async fn fallback() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

/// Error handling
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    PayloadTooLarge,
    NotFound,
    Upstream,
}

impl AppError {
    /// Body extraction failure; the client only sees `message`
    fn rejected(rejection: JsonRejection, message: &str) -> Self {
        debug!(
            status = %rejection.status(),
            error = %rejection.body_text(),
            "Rejected request body"
        );

        // The body limit layer surfaces as a buffering failure.
        if matches!(rejection, JsonRejection::BytesRejection(_))
            || rejection.status() == StatusCode::PAYLOAD_TOO_LARGE
        {
            AppError::PayloadTooLarge
        } else {
            AppError::Validation(message.to_string())
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(msg) => AppError::Validation(msg),
            RelayError::NotFound => AppError::NotFound,
            // Detail is logged by the relay, never returned to the client.
            RelayError::Gateway(_) => AppError::Upstream,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "Session not found".to_string()),
            AppError::Upstream => (StatusCode::INTERNAL_SERVER_ERROR, "LLM call failed".to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
