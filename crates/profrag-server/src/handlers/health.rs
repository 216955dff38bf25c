use axum::{extract::State, Json};
use serde_json::json;
use std::sync::atomic::Ordering;

use crate::error::ApiError;
use crate::SharedState;

pub async fn livez() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Flips to 503 as soon as shutdown begins. Upstreams are not probed here;
/// their failures surface per request as 502.
pub async fn readyz(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.readiness.load(Ordering::SeqCst) {
        return Err(ApiError::ServiceUnavailable("shutting_down".into()));
    }

    Ok(Json(json!({
        "status": "ok",
        "application": env!("CARGO_PKG_NAME"),
        "top_k": state.pipeline.settings().top_k,
    })))
}
