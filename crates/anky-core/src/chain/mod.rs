//! On-chain payment verification.
//!
//! [`TxVerifier`] answers one question: does a submitted transaction hash
//! represent a confirmed ERC-20 transfer of at least a given amount, of a
//! given token, to the treasury address? It is stateless, read-only, and
//! idempotent: verifying the same hash twice against unchanged chain state
//! yields the same outcome (modulo the confirmation count growing).
//!
//! Verification never raises: every failure mode, including RPC transport
//! errors and the configured deadline, is folded into a
//! [`VerificationResult`] with `valid = false` and a reason. A hung RPC
//! endpoint therefore denies admission rather than stalling the request.

mod rpc;
mod verifier;

pub use rpc::{RpcClient, RpcError};
pub use verifier::{TxVerifier, VerificationResult, TRANSFER_TOPIC};
