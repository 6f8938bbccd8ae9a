pub mod auth;
pub mod rate_limiting;

pub use auth::{api_key_auth, AgentContext};
pub use rate_limiting::{agent_rate_limit, client_key, ip_rate_limit};
