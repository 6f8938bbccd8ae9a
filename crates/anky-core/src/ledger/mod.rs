//! The payment ledger collaborator.
//!
//! [`PaymentLedger`] is the gate's only view of persistence: free-session
//! quota accounting, replay-safe payment records, and the agent/session
//! rows the HTTP layer needs. The trait exists so tests and alternative
//! backends can substitute for the `SQLite` implementation.
//!
//! Two operations carry the concurrency guarantees the gate relies on:
//!
//! - [`decrement_free_session`](PaymentLedger::decrement_free_session) is a
//!   single conditional UPDATE (`... AND free_sessions_remaining > 0`) and
//!   reports whether a row changed. Two racing requests cannot both consume
//!   the last free session, and the counter never goes below zero.
//! - [`record_payment`](PaymentLedger::record_payment) inserts against a
//!   UNIQUE constraint on `tx_hash` and surfaces the violation as
//!   [`LedgerError::DuplicateTxHash`]. The insert is the replay guarantee;
//!   any earlier lookup is only a fast path.

mod sqlite;

pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use thiserror::Error;

/// Error types for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A payment record with this transaction hash already exists.
    #[error("transaction hash already used")]
    DuplicateTxHash,

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
                return LedgerError::DuplicateTxHash;
            }
        }
        LedgerError::Database(err.to_string())
    }
}

/// An agent row: quota state plus the API key it authenticates with.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub api_key: String,
    pub free_sessions_remaining: i64,
    pub total_sessions: i64,
    pub total_paid_sessions: i64,
    pub created_at: String,
}

/// Input for agent registration.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub api_key: String,
    pub free_sessions: i64,
}

/// A persisted payment. `tx_hash` is globally unique for the lifetime of
/// the system; that uniqueness is the replay-prevention anchor.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: String,
    pub agent_id: Option<String>,
    pub session_id: String,
    pub tx_hash: String,
    pub chain: String,
    pub method: String,
    pub amount: String,
    pub verified: bool,
    pub created_at: String,
}

/// Input for recording a verified payment against a completed unit of work.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub agent_id: Option<String>,
    pub session_id: String,
    pub tx_hash: String,
    pub chain: String,
    pub method: String,
    pub amount: String,
}

/// A billable unit of work.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub agent_id: String,
    pub word_count: i64,
    pub duration_seconds: f64,
    pub full_session: bool,
    pub payment_method: String,
    pub created_at: String,
}

/// Input for persisting a newly admitted session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub agent_id: String,
    pub word_count: i64,
    pub duration_seconds: f64,
    pub full_session: bool,
    pub payment_method: String,
}

/// Repository trait for quota, payment, agent, and session persistence.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn create_agent(&self, agent: &NewAgent) -> Result<(), LedgerError>;

    async fn find_agent_by_key(&self, api_key: &str) -> Result<Option<AgentRecord>, LedgerError>;

    /// Whether the agent still has free sessions. A cheap pre-check only;
    /// the decrement below is the authoritative operation.
    async fn has_free_session(&self, agent_id: &str) -> Result<bool, LedgerError>;

    /// Consumes one free session if any remain. Returns `true` when a
    /// session was actually consumed. Atomic at the storage layer.
    async fn decrement_free_session(&self, agent_id: &str) -> Result<bool, LedgerError>;

    async fn free_sessions_remaining(&self, agent_id: &str) -> Result<i64, LedgerError>;

    async fn find_payment_by_tx_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<PaymentRecord>, LedgerError>;

    /// Inserts a payment record.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateTxHash`] if the hash was already recorded —
    /// including by a request racing this one past verification.
    async fn record_payment(&self, payment: &NewPayment) -> Result<PaymentRecord, LedgerError>;

    /// Bumps the aggregate paid-session counters for an agent.
    async fn update_payment_stats(&self, agent_id: &str) -> Result<(), LedgerError>;

    async fn insert_session(&self, session: &NewSession) -> Result<(), LedgerError>;

    async fn find_session(&self, id: &str) -> Result<Option<SessionRecord>, LedgerError>;
}
