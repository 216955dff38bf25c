use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use profrag_core::ChatMessage;

use crate::error::ApiError;
use crate::{SharedState, REQUEST_ID_HEADER};

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// Answer the last message of a conversation, streaming plain text.
///
/// Everything up to opening the generation stream happens before the
/// response head is sent, so those failures still get a JSON error body.
/// A failure after that aborts the chunked body.
pub async fn chat(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<Vec<ChatMessage>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(messages) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    info!(request_id = %request_id, messages = messages.len(), "chat request");

    let relay = state.pipeline.answer(&messages, &request_id).await?;

    Ok(([(CONTENT_TYPE, TEXT_PLAIN_UTF8)], Body::from_stream(relay)).into_response())
}
