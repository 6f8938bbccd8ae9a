//! # Anky Core
//!
//! Core library for the Anky admission gate: the subsystem that decides
//! whether an agent (or any paying caller) may consume a metered, paid
//! session.
//!
//! This crate provides:
//!
//! - **[`limiter`]**: Fixed-window rate limiting per caller identity, with
//!   independent named classes for registration, session submission, and
//!   public reads.
//!
//! - **[`chain`]**: Read-only verification that a submitted transaction hash
//!   is a confirmed ERC-20 transfer of sufficient value to the treasury
//!   address on Base.
//!
//! - **[`ledger`]**: The payment ledger collaborator — free-session quota
//!   accounting and replay-safe payment records, behind a repository trait
//!   with a `SQLite` backend.
//!
//! - **[`admission`]**: The `AdmissionGate`, which composes the ledger and
//!   the verifier into a single pass / pay / payment-required decision per
//!   request.
//!
//! - **[`config`]**: Layered application configuration.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────┐
//! │ RateLimiter │ ─── Over limit ──► 429
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌───────────────┐
//! │ AdmissionGate │ ── free session? ──► admit "free" (quota decremented)
//! └──────┬────────┘
//!        │ no free sessions
//!        ▼
//!   payment proof? ── none ──► 402 with payment options
//!        │
//!        ▼
//!   replayed hash? ── yes ──► 409
//!        │
//!        ▼
//! ┌─────────────┐
//! │ TxVerifier  │ ── invalid ──► 402 with reason
//! └──────┬──────┘
//!        │ valid
//!        ▼
//!   admit as paid method, proof attached for downstream persistence
//! ```

pub mod admission;
pub mod chain;
pub mod config;
pub mod ledger;
pub mod limiter;
