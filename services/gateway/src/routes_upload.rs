use std::path::PathBuf;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use artifacts::ArtifactError;

use crate::state::SharedState;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() })))
}

fn internal(msg: impl ToString) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg.to_string() })))
}

/// Persist an uploaded model artifact and trigger an asynchronous server
/// replace. Returns as soon as the artifact is stored; readiness is reported
/// separately via /check_status.
pub async fn upload_model(
    State(state): State<SharedState>,
    mut mp: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<bytes::Bytes> = None;

    while let Some(field) = mp.next_field().await.map_err(|e| bad_request(e.to_string()))? {
        if field.name() == Some("file") {
            file_name = field.file_name().map(str::to_string);
            file_bytes = Some(field.bytes().await.map_err(|e| bad_request(e.to_string()))?);
        }
    }

    let bytes = file_bytes.ok_or_else(|| bad_request("No file uploaded"))?;
    let name = file_name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| bad_request("Empty filename"))?;

    // Store is blocking filesystem IO.
    let store = state.store.clone();
    let record = tokio::task::spawn_blocking(move || store.store(&bytes, &name))
        .await
        .map_err(internal)?
        .map_err(|e| match e {
            ArtifactError::EmptyFilename => bad_request("Empty filename"),
            ArtifactError::DisallowedExtension(_) => bad_request("Only .gguf models are allowed"),
            ArtifactError::Io(io) => internal(io),
        })?;

    state
        .supervisor
        .clone()
        .start_or_replace(PathBuf::from(&record.path));

    Ok(Json(json!({
        "status": "Model uploaded. Starting server...",
        "artifact": record,
    })))
}

/// Re-launch the model server from the most recently stored artifact.
pub async fn reload_model(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.store.clone();
    let latest = tokio::task::spawn_blocking(move || store.latest())
        .await
        .map_err(internal)?
        .map_err(internal)?;

    let Some(path) = latest else {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "error": "No model found" }))));
    };

    state.supervisor.clone().start_or_replace(path);
    Ok(Json(json!({ "status": "Reloading model..." })))
}
