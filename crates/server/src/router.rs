use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    middleware::{agent_rate_limit, api_key_auth, ip_rate_limit},
    routes,
    state::AppState,
};

/// Builds the application router.
///
/// Each route class carries its own rate limiter. On the submission route
/// authentication is the outermost layer so the limiter can key by agent
/// id; the IP-keyed classes need no authentication at all.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let register = post(routes::agents::register).layer(from_fn_with_state(
        state.limiters.agent_register.clone(),
        ip_rate_limit,
    ));

    let submit = post(routes::sessions::submit_session)
        .layer(from_fn_with_state(state.limiters.session_submit.clone(), agent_rate_limit))
        .layer(from_fn_with_state(state.clone(), api_key_auth));

    let read = get(routes::sessions::get_session).layer(from_fn_with_state(
        state.limiters.public_read.clone(),
        ip_rate_limit,
    ));

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/agents", register)
        .route("/api/v1/sessions", submit)
        .route("/api/v1/sessions/:id", read)
        .route("/api/v1/treasury", get(routes::treasury))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
