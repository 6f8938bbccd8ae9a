use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, state::AppState};

/// Authenticated caller, inserted into request extensions for downstream
/// handlers and the agent-keyed rate limiter.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub id: String,
    pub name: String,
}

/// API keys are `anky_` followed by 32 hex characters. Checking the shape
/// first keeps garbage away from the database.
#[must_use]
pub fn is_valid_key_format(key: &str) -> bool {
    const PREFIX: &str = "anky_";
    const TOTAL_LENGTH: usize = 37;

    key.len() == TOTAL_LENGTH
        && key.starts_with(PREFIX)
        && key[PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Axum middleware that resolves the `X-API-Key` header to an agent and
/// inserts an [`AgentContext`] extension. Missing or unknown keys are 401;
/// the admission gate itself never sees unauthenticated traffic.
pub async fn api_key_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    else {
        return ApiError::Unauthorized("API key required. set the X-API-Key header".into())
            .into_response();
    };

    if !is_valid_key_format(key) {
        return ApiError::Unauthorized("malformed API key".into()).into_response();
    }

    match state.ledger.find_agent_by_key(key).await {
        Ok(Some(agent)) => {
            request
                .extensions_mut()
                .insert(AgentContext { id: agent.id, name: agent.name });
            next.run(request).await
        }
        Ok(None) => {
            tracing::warn!("authentication failed: unknown api key");
            ApiError::Unauthorized("invalid API key".into()).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LogOnlyPipeline;
    use anky_core::{
        admission::{AdmissionGate, PriceTable},
        chain::TxVerifier,
        config::{ChainConfig, LimitsConfig, PaymentsConfig},
        ledger::{NewAgent, PaymentLedger, SqliteLedger},
        limiter::RateLimiters,
    };
    use axum::{
        extract::Extension, http::Request as HttpRequest, http::StatusCode, middleware,
        routing::get, Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    const VALID_KEY: &str = "anky_0123456789abcdef0123456789abcdef";

    async fn test_state() -> AppState {
        let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());
        ledger
            .create_agent(&NewAgent {
                id: "agent-1".into(),
                name: "test agent".into(),
                description: None,
                api_key: VALID_KEY.into(),
                free_sessions: 4,
            })
            .await
            .unwrap();

        let chain = ChainConfig {
            rpc_url: "http://127.0.0.1:1".into(),
            ..ChainConfig::default()
        };
        let verifier = Arc::new(TxVerifier::new(&chain).unwrap());
        let prices = PriceTable::new(&PaymentsConfig::default(), &chain);

        AppState {
            ledger: ledger.clone(),
            gate: Arc::new(AdmissionGate::new(ledger, verifier, prices)),
            limiters: Arc::new(RateLimiters::from_config(&LimitsConfig::default())),
            pipeline: Arc::new(LogOnlyPipeline),
        }
    }

    async fn handler(Extension(agent): Extension<AgentContext>) -> String {
        format!("authenticated: {}", agent.name)
    }

    async fn app() -> Router {
        let state = test_state().await;
        Router::new()
            .route("/test", get(handler))
            .layer(middleware::from_fn_with_state(state, api_key_auth))
    }

    #[test]
    fn test_key_format() {
        assert!(is_valid_key_format(VALID_KEY));
        assert!(!is_valid_key_format("anky_short"));
        assert!(!is_valid_key_format("rpc_0123456789abcdef0123456789abcdef0"));
        assert!(!is_valid_key_format("anky_0123456789abcdef0123456789abcdeg"));
        assert!(!is_valid_key_format(""));
    }

    #[tokio::test]
    async fn test_valid_key_inserts_agent_context() {
        let response = app()
            .await
            .oneshot(
                HttpRequest::builder()
                    .uri("/test")
                    .header("x-api-key", VALID_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"authenticated: test agent");
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let response = app()
            .await
            .oneshot(HttpRequest::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_key_is_unauthorized() {
        let response = app()
            .await
            .oneshot(
                HttpRequest::builder()
                    .uri("/test")
                    .header("x-api-key", "anky_ffffffffffffffffffffffffffffffff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
