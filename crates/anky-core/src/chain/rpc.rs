use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors from the JSON-RPC transport.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u32,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

/// Minimal JSON-RPC 2.0 client over HTTP.
///
/// Built once per process and shared; `reqwest` pools connections
/// internally. Per-request deadlines come from the client-wide timeout,
/// and the verifier adds an overall bound on top.
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if the underlying HTTP client fails
    /// to build.
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("anky-gate/0.1.0")
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build rpc http client");
                RpcError::Transport(format!("http client build failed: {e}"))
            })?;

        Ok(Self { client, url: url.to_string() })
    }

    /// Performs one JSON-RPC call and returns the raw `result` value.
    ///
    /// A `null` result (e.g. an unknown transaction hash) is returned as
    /// `Value::Null`, not an error; the caller decides what absence means.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if the request exceeds the client deadline
    /// - [`RpcError::Transport`] for connection-level failures
    /// - [`RpcError::Rpc`] if the endpoint returns a JSON-RPC error object
    /// - [`RpcError::Malformed`] if the response body is not valid JSON-RPC
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = JsonRpcRequest { jsonrpc: "2.0", method, params, id: 1 };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else if e.is_connect() {
                    RpcError::Transport("connection refused or unreachable".to_string())
                } else {
                    RpcError::Transport("network error".to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Transport(format!(
                "rpc endpoint returned status {}",
                response.status().as_u16()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc(error.to_string()));
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Parses a `0x`-prefixed hex quantity into a `u64`.
pub(crate) fn parse_hex_u64(value: &str) -> Option<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).ok()
}
