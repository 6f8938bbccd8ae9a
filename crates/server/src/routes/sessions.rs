use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use anky_core::{
    admission::{Admission, AdmissionOutcome, PaymentProof, PriceTable},
    ledger::{NewPayment, NewSession},
};

use crate::{error::ApiError, middleware::auth::AgentContext, state::AppState};

/// A session at or above this duration is a full session and is handed to
/// the generation pipeline.
pub const FULL_SESSION_SECONDS: f64 = 480.0;

const MAX_WRITING_CHARS: usize = 50_000;

#[derive(Debug, Deserialize)]
pub struct SubmitSessionRequest {
    pub writing: String,
    #[serde(default)]
    pub duration_seconds: f64,
    /// Optional payment proof; required once free sessions are exhausted.
    #[serde(default)]
    pub payment: Option<PaymentProof>,
}

/// The deterministic 402 body: both accepted payment methods, fully
/// described, so a caller can construct a transaction from the response
/// alone.
fn payment_required_response(reason: &str, prices: &PriceTable) -> Response {
    (
        StatusCode::PAYMENT_REQUIRED,
        Json(json!({
            "error": "Payment required",
            "message": reason,
            "payment_options": prices.payment_options(),
            "freeSessionsRemaining": 0,
        })),
    )
        .into_response()
}

/// POST /api/v1/sessions — submit a metered writing session.
///
/// Runs after authentication and the `session-submit` rate limiter. The
/// body is parsed exactly once by the extractor; the parsed value is what
/// the gate and the persistence steps share.
pub async fn submit_session(
    State(state): State<AppState>,
    Extension(agent): Extension<AgentContext>,
    Json(req): Json<SubmitSessionRequest>,
) -> Result<Response, ApiError> {
    if req.writing.trim().is_empty() {
        return Err(ApiError::BadRequest("writing cannot be empty".into()));
    }
    if req.writing.len() > MAX_WRITING_CHARS {
        return Err(ApiError::BadRequest(format!(
            "writing too long (max {MAX_WRITING_CHARS} chars)"
        )));
    }

    let admission = match state.gate.admit(&agent.id, req.payment.as_ref()).await? {
        AdmissionOutcome::Admitted(admission) => admission,
        AdmissionOutcome::PaymentRequired { reason } => {
            return Ok(payment_required_response(&reason, state.gate.price_table()));
        }
        AdmissionOutcome::Replayed => return Err(ApiError::ReplayedTransaction),
    };

    let session_id = Uuid::new_v4().to_string();
    let payment_method = admission.method_name();

    // The UNIQUE insert on tx_hash is the real replay barrier: a request
    // that raced this one past verification loses here with a 409, before
    // any work unit exists for it.
    if let Admission::Paid(payment) = &admission {
        state
            .ledger
            .record_payment(&NewPayment {
                agent_id: Some(agent.id.clone()),
                session_id: session_id.clone(),
                tx_hash: payment.tx_hash.clone(),
                chain: "base".into(),
                method: payment.method.as_str().into(),
                amount: payment.amount.clone(),
            })
            .await?;
        state.ledger.update_payment_stats(&agent.id).await?;
    }

    let word_count = i64::try_from(req.writing.split_whitespace().count()).unwrap_or(i64::MAX);
    let full_session = req.duration_seconds >= FULL_SESSION_SECONDS;

    state
        .ledger
        .insert_session(&NewSession {
            id: session_id.clone(),
            agent_id: agent.id.clone(),
            word_count,
            duration_seconds: req.duration_seconds,
            full_session,
            payment_method: payment_method.into(),
        })
        .await?;

    tracing::info!(
        session_id = %session_id,
        agent_id = %agent.id,
        payment_method,
        full_session,
        "session accepted"
    );

    if full_session {
        let pipeline = state.pipeline.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            pipeline.dispatch(id).await;
        });
    }

    let free_sessions_remaining = state.ledger.free_sessions_remaining(&agent.id).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": "accepted",
        "payment_method": payment_method,
        "full_session": full_session,
        "free_sessions_remaining": free_sessions_remaining,
    }))
    .into_response())
}

/// GET /api/v1/sessions/{id} — public read of a session's status.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.ledger.find_session(&id).await? {
        Some(session) => Ok(Json(json!({
            "id": session.id,
            "status": "accepted",
            "word_count": session.word_count,
            "duration_seconds": session.duration_seconds,
            "full_session": session.full_session,
            "payment_method": session.payment_method,
            "created_at": session.created_at,
        }))),
        None => Err(ApiError::NotFound(format!("session {id} not found"))),
    }
}
