pub mod agents;
pub mod sessions;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /api/v1/treasury — the address payments must be sent to, so callers
/// can construct a transaction without prior knowledge of pricing.
pub async fn treasury(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "address": state.gate.price_table().treasury() }))
}

/// GET /health — liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
