use anyhow::Result;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use anky_core::{
    admission::{AdmissionGate, PriceTable},
    chain::TxVerifier,
    config::AppConfig,
    ledger::SqliteLedger,
    limiter::RateLimiters,
};
use server::{pipeline::LogOnlyPipeline, router, state::AppState};

/// Initializes the logging system based on the configuration.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,anky_core={level},server={level},anky_server={level}",
            level = config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config);

    if config.payments.treasury_address.is_empty() {
        warn!("payments.treasury_address is not configured; paid admissions will be rejected");
    }

    let ledger = Arc::new(
        SqliteLedger::connect(&config.ledger.database_url)
            .await
            .map_err(|e| anyhow::anyhow!("ledger initialization failed: {e}"))?,
    );

    let verifier = Arc::new(
        TxVerifier::new(&config.chain)
            .map_err(|e| anyhow::anyhow!("chain verifier initialization failed: {e}"))?,
    );

    let prices = PriceTable::new(&config.payments, &config.chain);
    let gate = Arc::new(AdmissionGate::new(ledger.clone(), verifier, prices));

    let limiters = Arc::new(RateLimiters::from_config(&config.limits));
    limiters.start_sweep_tasks();

    let state = AppState {
        ledger,
        gate,
        limiters,
        pipeline: Arc::new(LogOnlyPipeline),
    };

    let app = router::build_router(state, config.server.max_body_bytes);

    let bind = format!("{}:{}", config.server.bind_address, config.server.bind_port);
    let listener = TcpListener::bind(&bind).await?;
    info!(address = %bind, chain_id = config.chain.chain_id, "anky admission gate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
