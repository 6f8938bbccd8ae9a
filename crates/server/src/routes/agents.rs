use axum::{extract::State, Json};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use anky_core::ledger::NewAgent;

use crate::{error::ApiError, state::AppState};

/// Free sessions granted to a freshly registered agent.
pub const FREE_SESSIONS_ON_REGISTER: i64 = 4;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub agent_id: String,
    pub api_key: String,
    pub free_sessions_remaining: i64,
    pub message: String,
}

fn generate_api_key() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    format!("anky_{}", hex::encode(bytes))
}

/// POST /api/v1/agents — create a new agent with an API key and free
/// sessions. The key is returned exactly once.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::BadRequest("name must be 1-100 characters".into()));
    }

    let api_key = generate_api_key();
    let agent_id = Uuid::new_v4().to_string();

    state
        .ledger
        .create_agent(&NewAgent {
            id: agent_id.clone(),
            name: name.to_string(),
            description: req.description.clone(),
            api_key: api_key.clone(),
            free_sessions: FREE_SESSIONS_ON_REGISTER,
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(agent_id = %agent_id, name = %name, "registered agent");

    Ok(Json(RegisterResponse {
        agent_id,
        api_key,
        free_sessions_remaining: FREE_SESSIONS_ON_REGISTER,
        message: "save your API key. it is only shown once.".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::is_valid_key_format;

    #[test]
    fn test_generated_keys_have_valid_format() {
        for _ in 0..20 {
            let key = generate_api_key();
            assert!(is_valid_key_format(&key), "bad key: {key}");
        }
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let mut keys = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(keys.insert(generate_api_key()));
        }
    }
}
