use std::sync::Arc;

use anky_core::{admission::AdmissionGate, ledger::PaymentLedger, limiter::RateLimiters};

use crate::pipeline::GenerationPipeline;

/// Shared application state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn PaymentLedger>,
    pub gate: Arc<AdmissionGate>,
    pub limiters: Arc<RateLimiters>,
    pub pipeline: Arc<dyn GenerationPipeline>,
}
