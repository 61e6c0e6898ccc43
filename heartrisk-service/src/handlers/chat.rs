use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use utoipa::{OpenApi, ToSchema};

use crate::{
    error::{ErrorResponse, HeartRiskServiceError},
    handlers::metrics::{CHAT_LATENCY, CHAT_NUM_REQUESTS},
    server::AppState,
};

pub const CHAT_PATH: &str = "/chat";

#[derive(OpenApi)]
#[openapi(
    paths(chat_handler),
    components(schemas(ChatRequest, ChatResponse, ErrorResponse))
)]
pub(crate) struct ChatOpenApi;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// The user's message, must not be blank
    pub message: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    /// The assistant's reply, or a fixed apology when the assistant is unavailable
    pub reply: String,
}

/// Forwards a user message to the heart health assistant.
///
/// Once the body is well formed this endpoint always succeeds: if the external
/// assistant fails, the reply is a fixed apology. Fallbacks are visible in the logs
/// and in the `heartrisk_chat_num_requests{outcome="fallback"}` metric.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = OK, description = "Assistant reply", body = ChatResponse),
        (status = BAD_REQUEST, description = "Missing or blank message", body = ErrorResponse)
    )
)]
#[instrument(level = "info", skip_all, fields(path = CHAT_PATH))]
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ChatResponse>, HeartRiskServiceError> {
    let request = match parse_request(payload) {
        Ok(request) => request,
        Err(e) => {
            CHAT_NUM_REQUESTS.with_label_values(&["invalid_body"]).inc();
            return Err(e);
        }
    };

    let timer = Instant::now();
    let exchange = state.assistant.converse(&request.message).await;
    CHAT_LATENCY.observe(timer.elapsed().as_secs_f64());
    CHAT_NUM_REQUESTS
        .with_label_values(&[exchange.outcome.as_str()])
        .inc();

    Ok(Json(ChatResponse {
        reply: exchange.reply,
    }))
}

fn parse_request(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<ChatRequest, HeartRiskServiceError> {
    let Json(payload) = payload.map_err(|e| HeartRiskServiceError::InvalidBody {
        message: e.body_text(),
        endpoint: CHAT_PATH.to_string(),
    })?;
    let request: ChatRequest =
        serde_json::from_value(payload).map_err(|e| HeartRiskServiceError::InvalidBody {
            message: e.to_string(),
            endpoint: CHAT_PATH.to_string(),
        })?;
    if request.message.trim().is_empty() {
        return Err(HeartRiskServiceError::InvalidBody {
            message: "message must not be empty".to_string(),
            endpoint: CHAT_PATH.to_string(),
        });
    }
    Ok(request)
}
