//! JSON API for the assistant.
//!
//! - `POST /agent/send`      route a message through the tool-calling agent
//! - `POST /chat/send`       plain conversational reply, no tools
//! - `GET  /chat/history`    messages recorded for a thread
//! - `POST /donation/parse`  free-text donation to a structured record

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use foodlink_agent::extraction::DonationExtractor;
use foodlink_agent::runtime::{AgentRuntime, RoutingConfig};
use foodlink_core::domain::conversation::{Message, ThreadId};
use foodlink_core::domain::donation::DonationRecord;
use foodlink_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub extractor: Arc<DonationExtractor>,
}

#[derive(Debug, Deserialize)]
pub struct AgentSendRequest {
    pub message: String,
    pub thread_id: Option<String>,
    pub config: Option<RoutingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ChatSendRequest {
    pub message: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub response: String,
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct DonationParseRequest {
    pub text: String,
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub correlation_id: String,
}

/// An [`InterfaceError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn from_application(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self(error.into().into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, Some(message.clone()))
            }
            InterfaceError::Unprocessable { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, Some(message.clone()))
            }
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ApiErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/agent/send", post(agent_send))
        .route("/chat/send", post(chat_send))
        .route("/chat/history", get(chat_history))
        .route("/donation/parse", post(donation_parse))
        .with_state(state)
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn thread_or_new(thread_id: Option<String>) -> ThreadId {
    thread_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(ThreadId::new)
        .unwrap_or_else(ThreadId::generate)
}

pub async fn agent_send(
    State(state): State<AppState>,
    Json(body): Json<AgentSendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let correlation_id = correlation_id();
    if body.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty", &correlation_id));
    }
    let thread_id = thread_or_new(body.thread_id);

    let outcome = state.runtime.dispatch(&body.message, &thread_id, body.config.as_ref()).await;
    info!(
        event_name = "server.agent.replied",
        correlation_id = %correlation_id,
        thread_id = %thread_id,
        tool = outcome.tool.as_deref().unwrap_or("none"),
        degraded = outcome.is_degraded(),
        "agent reply sent"
    );

    Ok(Json(SendResponse { response: outcome.reply, thread_id: thread_id.to_string() }))
}

pub async fn chat_send(
    State(state): State<AppState>,
    Json(body): Json<ChatSendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let correlation_id = correlation_id();
    if body.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty", &correlation_id));
    }
    let thread_id = thread_or_new(body.thread_id);

    match state.runtime.chat(&body.message, &thread_id).await {
        Ok(response) => Ok(Json(SendResponse { response, thread_id: thread_id.to_string() })),
        Err(error) => {
            warn!(
                event_name = "server.chat.gateway_failed",
                correlation_id = %correlation_id,
                thread_id = %thread_id,
                error = %error,
                "chat completion failed"
            );
            Err(ApiError::from_application(error, &correlation_id))
        }
    }
}

pub async fn chat_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let history = state.runtime.history(&ThreadId::new(query.thread_id)).await;
    Json(HistoryResponse { history })
}

pub async fn donation_parse(
    State(state): State<AppState>,
    Json(body): Json<DonationParseRequest>,
) -> Result<Json<DonationRecord>, ApiError> {
    let correlation_id = correlation_id();
    let extracted = match body.reference_date {
        Some(reference_date) => state.extractor.extract(&body.text, reference_date).await,
        None => state.extractor.extract_now(&body.text).await,
    };

    extracted.map(Json).map_err(|error| {
        warn!(
            event_name = "server.donation.parse_failed",
            correlation_id = %correlation_id,
            error = %error,
            "donation text could not be parsed"
        );
        ApiError::from_application(error, &correlation_id)
    })
}
