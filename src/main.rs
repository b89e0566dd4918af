//! treasury-gate: entry point.
//!
//! Loads configuration, initialises structured logging, resolves treasury
//! secrets from the environment, starts the background timers and serves
//! the HTTP API until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use treasury_gate::api;
use treasury_gate::chain::alloy_client::AlloyConnector;
use treasury_gate::config::AppConfig;
use treasury_gate::context::{Collaborators, ServiceContext, TreasuryAddresses};
use treasury_gate::oracle::sources::ExchangeSource;
use treasury_gate::oracle::PriceSource;
use treasury_gate::treasury::{BalanceFallback, EtherscanBalance};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    // -- Secrets and collaborators ---------------------------------------

    let secrets = cfg.resolve_treasury()?;
    let connector = AlloyConnector::from_secret(&secrets.private_key)?;

    let request_timeout = Duration::from_secs(cfg.oracle.request_timeout_secs);
    let price_sources: Vec<Arc<dyn PriceSource>> =
        ExchangeSource::from_names(&cfg.oracle.sources, request_timeout)?
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn PriceSource>)
            .collect();

    let balance_fallback: Option<Arc<dyn BalanceFallback>> = match secrets.etherscan_api_key {
        Some(key) => Some(Arc::new(EtherscanBalance::new(
            key,
            Duration::from_secs(cfg.treasury.rpc_timeout_secs),
        )?)),
        None => {
            warn!("No Etherscan API key configured, balance fallback disabled");
            None
        }
    };

    if secrets.default_destination.is_none() {
        warn!("No default destination configured, every transfer must name one");
    }

    let endpoint_names: Vec<&str> = secrets.endpoints.iter().map(|e| e.name.as_str()).collect();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.server.port,
        profile = %cfg.accrual.profile,
        rpc_endpoints = ?endpoint_names,
        price_sources = ?cfg.oracle.sources,
        funding_floor_eth = %cfg.balance.funding_floor_eth,
        "treasury-gate starting up"
    );

    let addresses = TreasuryAddresses {
        fee_recipient: secrets.fee_recipient,
        default_destination: secrets.default_destination,
    };
    let collaborators = Collaborators {
        connector: Arc::new(connector),
        endpoints: secrets.endpoints,
        price_sources,
        balance_fallback,
    };

    let port = cfg.server.port;
    let ctx = Arc::new(ServiceContext::new(cfg, collaborators, addresses));
    info!(treasury = %ctx.selector.treasury_address(), "Treasury wallet loaded");

    // -- Run -------------------------------------------------------------

    let tasks = ctx.spawn_background();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received");
    };
    let served = api::serve(ctx.clone(), port, shutdown).await;

    for task in tasks {
        task.shutdown().await;
    }

    let snapshot = ctx.accrual.snapshot().await;
    info!(
        total_pnl = %snapshot.pnl_including_pending().round_dp(2),
        total_trades = snapshot.trades_including_pending(),
        "treasury-gate stopped"
    );
    served
}

/// Initialise the tracing subscriber.
///
/// Defaults to `treasury_gate=info`; override with `RUST_LOG`. Set
/// `TREASURY_LOG_JSON` for JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("treasury_gate=info"));

    let json_logging = std::env::var("TREASURY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
