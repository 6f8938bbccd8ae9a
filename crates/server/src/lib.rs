//! HTTP server for the Anky admission gate.
//!
//! Wires the core components into an axum application: per-route-class
//! rate limiting, API-key authentication, the session submission handler
//! that consumes the gate's decision, and the public read surface.

pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod router;
pub mod routes;
pub mod state;
