use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::SharedState;

pub async fn check_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "ready": state.supervisor.is_ready(),
        "generation": state.supervisor.current_generation(),
    }))
}
