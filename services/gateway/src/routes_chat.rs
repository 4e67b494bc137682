use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::proxy::{ChatOutcome, INVALID_INPUT_REPLY, NOT_READY_REPLY};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ChatReq {
    #[serde(default)]
    pub message: String,
}

pub async fn chat(
    State(state): State<SharedState>,
    Json(req): Json<ChatReq>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.proxy.respond(&state.supervisor, &req.message).await {
        ChatOutcome::Reply(text) => (StatusCode::OK, Json(json!({ "reply": text }))),
        ChatOutcome::InvalidInput => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "reply": INVALID_INPUT_REPLY })),
        ),
        ChatOutcome::NotReady => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "reply": NOT_READY_REPLY })),
        ),
    }
}
