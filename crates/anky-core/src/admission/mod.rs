//! The admission gate.
//!
//! [`AdmissionGate`] is the single place where "is this metered action
//! allowed right now" is decided. It composes the free-session quota, the
//! replay check, and on-chain verification into one decision per request:
//!
//! - free quota first: a caller with free sessions remaining is never asked
//!   to pay; the quota decrement is a conditional ledger operation, so two
//!   racing requests cannot both consume the last session.
//! - otherwise a payment proof is required. A missing proof yields the
//!   deterministic payment-options outcome; a proof whose hash was seen
//!   before is a replay; anything else goes to the verifier.
//!
//! Outcomes are data, not errors — every denial carries its reason. Only a
//! ledger failure propagates as `Err`, since that is an infrastructure
//! problem rather than an admission decision.
//!
//! On paid admission the gate does **not** write the payment record; it
//! hands the verified proof to the caller, which persists it once the unit
//! of work exists. The UNIQUE constraint on the write remains the true
//! replay barrier for requests racing past verification together.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    chain::TxVerifier,
    config::{ChainConfig, PaymentsConfig},
    ledger::{LedgerError, PaymentLedger},
};

/// Accepted payment methods, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Usdc,
    AnkyToken,
}

impl PaymentMethodKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usdc => "usdc",
            Self::AnkyToken => "anky_token",
        }
    }
}

/// One accepted payment method: token identity, price, and where the
/// decimal conversion already happened. Constructed once from config so no
/// call site does ad hoc decimal math.
#[derive(Debug, Clone)]
pub struct PaymentMethod {
    pub kind: PaymentMethodKind,
    pub symbol: &'static str,
    pub decimals: u8,
    pub contract: String,
    pub price_base_units: u128,
}

/// The closed set of payment methods plus the treasury they pay into.
#[derive(Debug, Clone)]
pub struct PriceTable {
    treasury: String,
    chain_id: u64,
    usdc: PaymentMethod,
    anky_token: PaymentMethod,
}

impl PriceTable {
    #[must_use]
    pub fn new(payments: &PaymentsConfig, chain: &ChainConfig) -> Self {
        Self {
            treasury: payments.treasury_address.clone(),
            chain_id: chain.chain_id,
            usdc: PaymentMethod {
                kind: PaymentMethodKind::Usdc,
                symbol: "USDC",
                decimals: 6,
                contract: payments.usdc_contract.clone(),
                price_base_units: payments.usdc_price_base_units,
            },
            anky_token: PaymentMethod {
                kind: PaymentMethodKind::AnkyToken,
                symbol: "ANKY",
                decimals: 18,
                contract: payments.anky_token_contract.clone(),
                price_base_units: payments.anky_token_price_base_units,
            },
        }
    }

    #[must_use]
    pub fn treasury(&self) -> &str {
        &self.treasury
    }

    #[must_use]
    pub fn method(&self, kind: PaymentMethodKind) -> &PaymentMethod {
        match kind {
            PaymentMethodKind::Usdc => &self.usdc,
            PaymentMethodKind::AnkyToken => &self.anky_token,
        }
    }

    /// The `payment_options` array for 402 responses. Deterministic and
    /// complete: a caller can construct a transaction from this alone.
    #[must_use]
    pub fn payment_options(&self) -> Value {
        let option = |method: &PaymentMethod| {
            json!({
                "method": method.kind.as_str(),
                "token": method.symbol,
                "amount": method.price_base_units.to_string(),
                "recipient": self.treasury,
                "chain": self.chain_id,
                "decimals": method.decimals,
                "token_address": method.contract,
            })
        };

        json!([option(&self.usdc), option(&self.anky_token)])
    }
}

/// A caller-supplied payment proof. Untrusted until verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    pub chain: String,
    pub method: PaymentMethodKind,
}

impl PaymentProof {
    /// Shape check only (`0x` + 64 hex chars on the `base` chain); rejects
    /// garbage before any RPC round trip.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let hash = self.tx_hash.trim();
        self.chain == "base"
            && hash.len() == 66
            && hash.starts_with("0x")
            && hash[2..].chars().all(|c| c.is_ascii_hexdigit())
    }
}

/// A verified payment, attached to a paid admission for the caller to
/// persist once the unit of work exists.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub tx_hash: String,
    pub method: PaymentMethodKind,
    pub amount: String,
    pub from: Option<String>,
    pub block_number: Option<u64>,
}

/// A granted admission and the payment path that produced it.
#[derive(Debug)]
pub enum Admission {
    Free,
    Paid(VerifiedPayment),
}

impl Admission {
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid(payment) => payment.method.as_str(),
        }
    }
}

/// Per-request decision of the gate.
#[derive(Debug)]
pub enum AdmissionOutcome {
    Admitted(Admission),
    /// No usable payment: no free sessions and either no proof or a proof
    /// that failed verification. Carries the reason for the 402 body.
    PaymentRequired { reason: String },
    /// The submitted transaction hash was already used.
    Replayed,
}

/// Composes the ledger and the chain verifier into one admission decision.
///
/// Dependencies are injected at construction; the gate holds no mutable
/// state of its own and is safe to share across concurrent requests.
pub struct AdmissionGate {
    ledger: Arc<dyn PaymentLedger>,
    verifier: Arc<TxVerifier>,
    prices: PriceTable,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        verifier: Arc<TxVerifier>,
        prices: PriceTable,
    ) -> Self {
        Self { ledger, verifier, prices }
    }

    #[must_use]
    pub fn price_table(&self) -> &PriceTable {
        &self.prices
    }

    /// Decides whether `agent_id` may consume one metered session.
    ///
    /// The free branch and the payment branch are mutually exclusive: once
    /// the conditional decrement succeeds the caller is admitted free and
    /// the proof, if any, is ignored. A free session consumed here is not
    /// rolled back if downstream work later fails.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] only for ledger infrastructure failures;
    /// every admission-related denial is an [`AdmissionOutcome`].
    pub async fn admit(
        &self,
        agent_id: &str,
        payment: Option<&PaymentProof>,
    ) -> Result<AdmissionOutcome, LedgerError> {
        if self.ledger.has_free_session(agent_id).await?
            && self.ledger.decrement_free_session(agent_id).await?
        {
            tracing::info!(agent_id, "admitted on free session");
            return Ok(AdmissionOutcome::Admitted(Admission::Free));
        }

        let Some(proof) = payment else {
            return Ok(AdmissionOutcome::PaymentRequired {
                reason: "no free sessions remaining and no payment provided".to_string(),
            });
        };

        if !proof.is_well_formed() {
            tracing::info!(agent_id, "rejected malformed payment proof");
            return Ok(AdmissionOutcome::PaymentRequired {
                reason: "malformed payment proof: expected a 0x-prefixed 64-hex-char \
                         transaction hash on base"
                    .to_string(),
            });
        }

        // Fast path only; the UNIQUE insert at record time is the guarantee.
        if self.ledger.find_payment_by_tx_hash(&proof.tx_hash).await?.is_some() {
            tracing::warn!(agent_id, tx_hash = %proof.tx_hash, "replayed transaction hash");
            return Ok(AdmissionOutcome::Replayed);
        }

        let method = self.prices.method(proof.method);
        let result = self
            .verifier
            .verify(
                &proof.tx_hash,
                &self.prices.treasury,
                &method.contract,
                method.price_base_units,
            )
            .await;

        if !result.valid {
            let reason = result
                .reason
                .unwrap_or_else(|| "payment verification failed".to_string());
            tracing::info!(agent_id, tx_hash = %proof.tx_hash, reason = %reason, "payment rejected");
            return Ok(AdmissionOutcome::PaymentRequired { reason });
        }

        tracing::info!(
            agent_id,
            tx_hash = %proof.tx_hash,
            method = method.kind.as_str(),
            "admitted on verified payment"
        );

        Ok(AdmissionOutcome::Admitted(Admission::Paid(VerifiedPayment {
            tx_hash: proof.tx_hash.clone(),
            method: proof.method,
            amount: result.actual_amount.unwrap_or_default(),
            from: result.from,
            block_number: result.block_number,
        })))
    }
}
