use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::{borrow::Cow, future::Future};
use thiserror::Error;
use tracing::{error, warn};

use profrag_core::PipelineError;

use crate::config::ConfigError;

tokio::task_local! {
    static REQUEST_ID: String;
}

pub async fn with_request_id<Fut, T>(request_id: Option<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    if let Some(request_id) = request_id {
        REQUEST_ID.scope(request_id, fut).await
    } else {
        fut.await
    }
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|value| value.clone()).ok()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector index failed: {0}")]
    VectorIndex(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();
        let request_id = current_request_id();

        if status.is_server_error() {
            error!(
                code,
                status = %status,
                request_id = request_id.as_deref().unwrap_or(""),
                error = %self,
                "api_error"
            );
        } else {
            warn!(
                code,
                status = %status,
                request_id = request_id.as_deref().unwrap_or(""),
                error = %self,
                "api_error"
            );
        }

        let body = Json(ErrorResponse {
            code,
            message: self.public_message().into_owned(),
            request_id,
        });

        (status, body).into_response()
    }
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Embedding(_) => "embedding_failed",
            ApiError::VectorIndex(_) => "vector_index_failed",
            ApiError::Generation(_) => "generation_failed",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Upstream details stay in the logs
    fn public_message(&self) -> Cow<'static, str> {
        match self {
            ApiError::BadRequest(msg) => Cow::Owned(msg.clone()),
            ApiError::Embedding(_) => Cow::Borrowed("failed to embed the question"),
            ApiError::VectorIndex(_) => Cow::Borrowed("failed to search professor reviews"),
            ApiError::Generation(_) => Cow::Borrowed("failed to start the answer stream"),
            ApiError::ServiceUnavailable(_) => Cow::Borrowed("service unavailable"),
            ApiError::Internal(_) => Cow::Borrowed("internal server error"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Embedding(_) | ApiError::VectorIndex(_) | ApiError::Generation(_) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Embedding(e) => ApiError::Embedding(e.to_string()),
            PipelineError::VectorIndex(e) => ApiError::VectorIndex(e.to_string()),
            PipelineError::Generation(e) => ApiError::Generation(e.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(value: ConfigError) -> Self {
        ApiError::Internal(format!("invalid configuration: {value}"))
    }
}
