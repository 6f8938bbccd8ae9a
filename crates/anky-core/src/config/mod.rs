//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file specified by `ANKY_CONFIG` env var
//! 3. **Environment variables**: `ANKY_*` env vars override specific fields
//!
//! Configuration is validated at load time; invalid values (empty treasury
//! address, zero prices, malformed RPC URLs) error out at startup instead
//! of failing on the first request.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Defaults to `3030`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum accepted request body size in bytes. Defaults to `256 KiB`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3030
}

fn default_max_body_bytes() -> usize {
    256 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Chain RPC settings for payment verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL for the payment chain. Must start with `http`.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Chain id advertised in payment options. Defaults to `8453` (Base).
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Blocks that must be mined on top of a payment transaction before it
    /// is accepted. Reorg-safety margin. Defaults to `2`.
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,

    /// Upper bound on a whole verification (both RPC round trips), in
    /// seconds. A verification that exceeds it is denied. Defaults to `10`.
    #[serde(default = "default_rpc_timeout_seconds")]
    pub rpc_timeout_seconds: u64,
}

fn default_rpc_url() -> String {
    "https://mainnet.base.org".to_string()
}

fn default_chain_id() -> u64 {
    8453
}

fn default_min_confirmations() -> u64 {
    2
}

fn default_rpc_timeout_seconds() -> u64 {
    10
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            min_confirmations: default_min_confirmations(),
            rpc_timeout_seconds: default_rpc_timeout_seconds(),
        }
    }
}

/// Accepted payment methods and the treasury they must pay into.
///
/// Amounts are raw token base units: the USDC price has 6 decimal places,
/// the ANKY token price 18.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Destination address payments must be sent to.
    #[serde(default)]
    pub treasury_address: String,

    /// USDC token contract on Base.
    #[serde(default = "default_usdc_contract")]
    pub usdc_contract: String,

    /// Session price in USDC base units (6 decimals). Defaults to `333000`.
    #[serde(default = "default_usdc_price")]
    pub usdc_price_base_units: u128,

    /// ANKY token contract address.
    #[serde(default)]
    pub anky_token_contract: String,

    /// Session price in ANKY token base units (18 decimals).
    #[serde(default = "default_anky_token_price")]
    pub anky_token_price_base_units: u128,
}

fn default_usdc_contract() -> String {
    "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string()
}

fn default_usdc_price() -> u128 {
    333_000
}

fn default_anky_token_price() -> u128 {
    100_000_000_000_000_000_000
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            treasury_address: String::new(),
            usdc_contract: default_usdc_contract(),
            usdc_price_base_units: default_usdc_price(),
            anky_token_contract: String::new(),
            anky_token_price_base_units: default_anky_token_price(),
        }
    }
}

/// Window length and cap for one rate-limit class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateClassConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// Per-class rate-limit windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Agent registration, keyed by IP. Defaults to 5/hour.
    #[serde(default = "default_agent_register_class")]
    pub agent_register: RateClassConfig,

    /// Metered session submission, keyed by agent id. Defaults to 20/hour.
    #[serde(default = "default_session_submit_class")]
    pub session_submit: RateClassConfig,

    /// Unauthenticated reads, keyed by IP. Defaults to 100/minute.
    #[serde(default = "default_public_read_class")]
    pub public_read: RateClassConfig,

    /// Interval between expired-window sweeps, in seconds. Defaults to `300`.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_agent_register_class() -> RateClassConfig {
    RateClassConfig { max_requests: 5, window_seconds: 3600 }
}

fn default_session_submit_class() -> RateClassConfig {
    RateClassConfig { max_requests: 20, window_seconds: 3600 }
}

fn default_public_read_class() -> RateClassConfig {
    RateClassConfig { max_requests: 100, window_seconds: 60 }
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            agent_register: default_agent_register_class(),
            session_submit: default_session_submit_class(),
            public_read: default_public_read_class(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// Ledger database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// `SQLite` connection URL. Defaults to `sqlite://anky.db?mode=rwc`.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    "sqlite://anky.db?mode=rwc".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { database_url: default_database_url() }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is unset. Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `pretty` or `json`. Defaults to `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from defaults, an optional TOML file named by
    /// `ANKY_CONFIG`, and `ANKY_*` environment overrides
    /// (e.g. `ANKY_CHAIN__RPC_URL`).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(path) = std::env::var("ANKY_CONFIG") {
            builder = builder.add_source(File::with_name(&path));
        }

        let config: Self = builder
            .add_source(Environment::with_prefix("ANKY").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::Message`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chain.rpc_url.starts_with("http") {
            return Err(ConfigError::Message(format!(
                "chain.rpc_url must be an http(s) URL, got '{}'",
                self.chain.rpc_url
            )));
        }

        if self.chain.rpc_timeout_seconds == 0 {
            return Err(ConfigError::Message("chain.rpc_timeout_seconds must be > 0".into()));
        }

        if !self.payments.treasury_address.is_empty()
            && !is_address(&self.payments.treasury_address)
        {
            return Err(ConfigError::Message(format!(
                "payments.treasury_address is not a valid address: '{}'",
                self.payments.treasury_address
            )));
        }

        if self.payments.usdc_price_base_units == 0 {
            return Err(ConfigError::Message("payments.usdc_price_base_units must be > 0".into()));
        }

        if self.payments.anky_token_price_base_units == 0 {
            return Err(ConfigError::Message(
                "payments.anky_token_price_base_units must be > 0".into(),
            ));
        }

        for (name, class) in [
            ("agent_register", &self.limits.agent_register),
            ("session_submit", &self.limits.session_submit),
            ("public_read", &self.limits.public_read),
        ] {
            if class.max_requests == 0 || class.window_seconds == 0 {
                return Err(ConfigError::Message(format!(
                    "limits.{name} must have max_requests > 0 and window_seconds > 0"
                )));
            }
        }

        Ok(())
    }
}

/// `0x`-prefixed 40-hex-char address check.
fn is_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain.chain_id, 8453);
        assert_eq!(config.chain.min_confirmations, 2);
        assert_eq!(config.payments.usdc_price_base_units, 333_000);
        assert_eq!(config.limits.agent_register.max_requests, 5);
        assert_eq!(config.limits.public_read.window_seconds, 60);
    }

    #[test]
    fn test_rejects_bad_rpc_url() {
        let mut config = AppConfig::default();
        config.chain.rpc_url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_treasury_address() {
        let mut config = AppConfig::default();
        config.payments.treasury_address = "0x1234".into();
        assert!(config.validate().is_err());

        config.payments.treasury_address =
            "0x644C2D1bD0Bfd9a74AeDa66aB46aD28a1cD265ca".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut config = AppConfig::default();
        config.limits.session_submit.window_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_price() {
        let mut config = AppConfig::default();
        config.payments.usdc_price_base_units = 0;
        assert!(config.validate().is_err());
    }
}
