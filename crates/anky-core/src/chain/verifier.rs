use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::{
    chain::rpc::{parse_hex_u64, RpcClient, RpcError},
    config::ChainConfig,
};

/// ERC-20 Transfer event topic: keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Outcome of verifying one transaction hash. Consumed once per request,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
    /// Transferred amount in token base units, for diagnostics and the
    /// payment record.
    pub actual_amount: Option<String>,
    /// Sender decoded from the transfer log, for attribution only; not a
    /// gating condition.
    pub from: Option<String>,
    pub block_number: Option<u64>,
}

impl VerificationResult {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            actual_amount: None,
            from: None,
            block_number: None,
        }
    }
}

/// Read-only verifier for token payments on the configured chain.
///
/// `verify` performs two RPC round trips (receipt, head height) under one
/// overall deadline and reduces every outcome, including transport
/// failures, to a [`VerificationResult`].
pub struct TxVerifier {
    rpc: RpcClient,
    min_confirmations: u64,
    deadline: Duration,
}

impl TxVerifier {
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &ChainConfig) -> Result<Self, RpcError> {
        let deadline = Duration::from_secs(config.rpc_timeout_seconds);

        Ok(Self {
            rpc: RpcClient::new(&config.rpc_url, deadline)?,
            min_confirmations: config.min_confirmations,
            deadline,
        })
    }

    /// Verifies that `tx_hash` is a confirmed transfer of at least
    /// `expected_amount` base units of the token at `token_address` to
    /// `expected_recipient`.
    ///
    /// Amounts compare with `>=`: overpayment passes, underpayment fails.
    /// A verification that outlives the configured deadline is denied, not
    /// retried.
    pub async fn verify(
        &self,
        tx_hash: &str,
        expected_recipient: &str,
        token_address: &str,
        expected_amount: u128,
    ) -> VerificationResult {
        let outcome = tokio::time::timeout(
            self.deadline,
            self.verify_inner(tx_hash, expected_recipient, token_address, expected_amount),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::info!(tx_hash, error = %e, "payment verification failed at the rpc layer");
                VerificationResult::rejected(format!("verification error: {e}"))
            }
            Err(_) => {
                tracing::warn!(tx_hash, "payment verification exceeded deadline");
                VerificationResult::rejected("verification timed out")
            }
        }
    }

    async fn verify_inner(
        &self,
        tx_hash: &str,
        expected_recipient: &str,
        token_address: &str,
        expected_amount: u128,
    ) -> Result<VerificationResult, RpcError> {
        let receipt = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        if receipt.is_null() {
            return Ok(VerificationResult::rejected("transaction not found"));
        }

        let status = receipt.get("status").and_then(Value::as_str).unwrap_or("0x0");
        if status != "0x1" {
            return Ok(VerificationResult::rejected("transaction failed on-chain"));
        }

        let receipt_block = receipt
            .get("blockNumber")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .unwrap_or(0);

        let head = self.rpc.call("eth_blockNumber", json!([])).await?;
        let current_block = head.as_str().and_then(parse_hex_u64).unwrap_or(0);

        let confirmations = current_block.saturating_sub(receipt_block);
        if confirmations < self.min_confirmations {
            return Ok(VerificationResult::rejected(format!(
                "insufficient confirmations (need >= {})",
                self.min_confirmations
            )));
        }

        let logs = receipt
            .get("logs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let token_lower = token_address.to_lowercase();
        let recipient_lower = expected_recipient.to_lowercase();

        let mut transfer_seen = false;
        let mut matching_log = None;

        for log in &logs {
            let address = log
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            let topics = log.get("topics").and_then(Value::as_array).cloned().unwrap_or_default();
            let topic0 = topics
                .first()
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();

            if address != token_lower || topic0 != TRANSFER_TOPIC {
                continue;
            }
            transfer_seen = true;

            let to = topics
                .get(2)
                .and_then(Value::as_str)
                .and_then(topic_to_address);
            if to.as_deref() == Some(recipient_lower.as_str()) {
                matching_log = Some(log.clone());
                break;
            }
        }

        let Some(log) = matching_log else {
            return Ok(VerificationResult::rejected(if transfer_seen {
                "no transfer to treasury address found"
            } else {
                "no token transfer found"
            }));
        };

        let data = log.get("data").and_then(Value::as_str).unwrap_or("0x0");
        let Some(actual_amount) = parse_amount(data) else {
            return Ok(VerificationResult::rejected("malformed transfer amount"));
        };

        if actual_amount < expected_amount {
            return Ok(VerificationResult::rejected(format!(
                "insufficient amount: got {actual_amount}, expected {expected_amount}"
            )));
        }

        let from = log
            .get("topics")
            .and_then(Value::as_array)
            .and_then(|topics| topics.get(1))
            .and_then(Value::as_str)
            .and_then(topic_to_address);

        tracing::info!(tx_hash, amount = actual_amount, confirmations, "payment verified");

        Ok(VerificationResult {
            valid: true,
            reason: None,
            actual_amount: Some(actual_amount.to_string()),
            from,
            block_number: Some(receipt_block),
        })
    }
}

/// Decodes an address from a 32-byte indexed topic (last 20 bytes).
fn topic_to_address(topic: &str) -> Option<String> {
    if topic.len() != 66 || !topic.starts_with("0x") {
        return None;
    }
    topic.get(26..).map(|tail| format!("0x{}", tail.to_lowercase()))
}

/// Decodes the transferred amount from a log data word.
///
/// Returns `None` for non-hex data or values wider than 128 bits; both
/// reject the payment rather than admitting on garbage.
fn parse_amount(data: &str) -> Option<u128> {
    let digits = data.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const TREASURY: &str = "0x644C2D1bD0Bfd9a74AeDa66aB46aD28a1cD265ca";
    const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    const SENDER: &str = "0x1111111111111111111111111111111111111111";
    const TX_HASH: &str =
        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn topic_for(address: &str) -> String {
        format!("0x{}{}", "0".repeat(24), address.trim_start_matches("0x").to_lowercase())
    }

    fn amount_word(amount: u128) -> String {
        format!("0x{amount:064x}")
    }

    fn transfer_receipt(block: u64, token: &str, recipient: &str, amount: u128) -> Value {
        json!({
            "status": "0x1",
            "blockNumber": format!("0x{block:x}"),
            "logs": [{
                "address": token.to_lowercase(),
                "topics": [TRANSFER_TOPIC, topic_for(SENDER), topic_for(recipient)],
                "data": amount_word(amount),
            }]
        })
    }

    async fn mock_chain(
        server: &mut mockito::Server,
        receipt: Value,
        head_block: u64,
    ) -> (mockito::Mock, mockito::Mock) {
        let receipt_mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_getTransactionReceipt"})))
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": receipt}).to_string())
            .expect_at_least(1)
            .create_async()
            .await;

        let head_mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_blockNumber"})))
            .with_status(200)
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": format!("0x{head_block:x}")})
                    .to_string(),
            )
            .expect_at_least(0)
            .create_async()
            .await;

        (receipt_mock, head_mock)
    }

    fn verifier_for(server: &mockito::Server) -> TxVerifier {
        let config = ChainConfig {
            rpc_url: server.url(),
            chain_id: 8453,
            min_confirmations: 2,
            rpc_timeout_seconds: 5,
        };
        TxVerifier::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_missing_receipt_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_chain(&mut server, Value::Null, 100).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("transaction not found"));
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let receipt = json!({"status": "0x0", "blockNumber": "0x10", "logs": []});
        let _mocks = mock_chain(&mut server, receipt, 100).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("transaction failed on-chain"));
    }

    #[tokio::test]
    async fn test_one_confirmation_is_insufficient_two_is_enough() {
        // Included one block ago: head - block = 1 < 2.
        let mut server = mockito::Server::new_async().await;
        let _mocks =
            mock_chain(&mut server, transfer_receipt(99, USDC, TREASURY, 333_000), 100).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("insufficient confirmations"));

        // Two blocks later the same transaction passes.
        let mut server = mockito::Server::new_async().await;
        let _mocks =
            mock_chain(&mut server, transfer_receipt(99, USDC, TREASURY, 333_000), 101).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;
        assert!(result.valid);
        assert_eq!(result.block_number, Some(99));
    }

    #[tokio::test]
    async fn test_no_token_transfer_in_logs() {
        let mut server = mockito::Server::new_async().await;
        let receipt = json!({
            "status": "0x1",
            "blockNumber": "0x10",
            "logs": [{
                "address": "0x2222222222222222222222222222222222222222",
                "topics": [TRANSFER_TOPIC, topic_for(SENDER), topic_for(TREASURY)],
                "data": amount_word(333_000),
            }]
        });
        let _mocks = mock_chain(&mut server, receipt, 100).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("no token transfer found"));
    }

    #[tokio::test]
    async fn test_transfer_to_wrong_recipient_is_rejected() {
        let other = "0x3333333333333333333333333333333333333333";
        let mut server = mockito::Server::new_async().await;
        let _mocks =
            mock_chain(&mut server, transfer_receipt(10, USDC, other, 500_000), 100).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert!(!result.valid);
        assert_eq!(result.reason.as_deref(), Some("no transfer to treasury address found"));
    }

    #[tokio::test]
    async fn test_amount_boundary() {
        for (amount, expected_valid) in [(332_999u128, false), (333_000, true), (500_000, true)] {
            let mut server = mockito::Server::new_async().await;
            let _mocks =
                mock_chain(&mut server, transfer_receipt(10, USDC, TREASURY, amount), 100).await;

            let verifier = verifier_for(&server);
            let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

            assert_eq!(result.valid, expected_valid, "amount {amount}");
            if expected_valid {
                assert_eq!(result.actual_amount.as_deref(), Some(amount.to_string().as_str()));
            } else {
                let reason = result.reason.unwrap();
                assert!(reason.contains("got 332999"), "reason was: {reason}");
                assert!(reason.contains("expected 333000"));
            }
        }
    }

    #[tokio::test]
    async fn test_sender_is_decoded_for_attribution() {
        let mut server = mockito::Server::new_async().await;
        let _mocks =
            mock_chain(&mut server, transfer_receipt(10, USDC, TREASURY, 333_000), 100).await;

        let verifier = verifier_for(&server);
        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert!(result.valid);
        assert_eq!(result.from.as_deref(), Some(SENDER));
    }

    #[tokio::test]
    async fn test_recipient_compare_is_case_insensitive() {
        let mut server = mockito::Server::new_async().await;
        let _mocks =
            mock_chain(&mut server, transfer_receipt(10, USDC, TREASURY, 333_000), 100).await;

        let verifier = verifier_for(&server);
        let result = verifier
            .verify(TX_HASH, &TREASURY.to_uppercase().replace("0X", "0x"), USDC, 333_000)
            .await;

        assert!(result.valid);
    }

    #[tokio::test]
    async fn test_verification_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let _mocks =
            mock_chain(&mut server, transfer_receipt(10, USDC, TREASURY, 333_000), 100).await;

        let verifier = verifier_for(&server);
        let first = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;
        let second = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert_eq!(first.valid, second.valid);
        assert_eq!(first.actual_amount, second.actual_amount);
        assert_eq!(first.block_number, second.block_number);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_denies_instead_of_erroring() {
        let config = ChainConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            chain_id: 8453,
            min_confirmations: 2,
            rpc_timeout_seconds: 2,
        };
        let verifier = TxVerifier::new(&config).unwrap();

        let result = verifier.verify(TX_HASH, TREASURY, USDC, 333_000).await;

        assert!(!result.valid);
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_topic_to_address() {
        let topic = topic_for(TREASURY);
        assert_eq!(topic_to_address(&topic).as_deref(), Some(TREASURY.to_lowercase().as_str()));
        assert_eq!(topic_to_address("0xshort"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(&amount_word(333_000)), Some(333_000));
        assert_eq!(parse_amount("0x0"), Some(0));
        assert_eq!(parse_amount(&format!("0x{}", "f".repeat(64))), None);
        assert_eq!(parse_amount("0xzz"), None);
    }
}
