//! Commerce Metering: per-tenant usage metering, plan enforcement and
//! subscription billing.
//!
//! Starts the HTTP API and the metrics exporter. Scheduled jobs are
//! triggered through `/v1/admin/jobs/*`.

use clap::Parser;
use commerce_api::{ApiServer, AppState};
use commerce_billing::notifier::LogTransport;
use commerce_billing::store::{MemoryRepository, RetryingRepository};
use commerce_billing::subscription::{PaymentReceipt, Subscription};
use commerce_billing::{ContractRegistry, Notifier, SubscriptionEngine, UsageRecord, UsageTracker};
use commerce_core::config::AppConfig;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "commerce-metering")]
#[command(about = "Usage metering and subscription billing for multi-tenant commerce")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "COMMERCE_METERING__NODE_ID")]
    node_id: Option<String>,

    /// Bind address (overrides config)
    #[arg(long, env = "COMMERCE_METERING__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "COMMERCE_METERING__API__HTTP_PORT")]
    http_port: Option<u16>,
}

/// Wire the engines against retrying in-memory stores.
fn build_state(config: &AppConfig) -> AppState {
    let tracker = UsageTracker::new(
        Arc::new(RetryingRepository::new(
            MemoryRepository::<UsageRecord>::new(),
            &config.storage,
        )),
        Arc::new(RetryingRepository::new(
            MemoryRepository::<UsageRecord>::new(),
            &config.storage,
        )),
    );
    let subscriptions = SubscriptionEngine::new(
        Arc::new(RetryingRepository::new(
            MemoryRepository::<Subscription>::new(),
            &config.storage,
        )),
        Arc::new(RetryingRepository::new(
            MemoryRepository::<PaymentReceipt>::new(),
            &config.storage,
        )),
        config.billing.clone(),
    );
    AppState::new(
        config.node_id.clone(),
        tracker,
        ContractRegistry::new(),
        subscriptions,
        Notifier::new(Arc::new(LogTransport)),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "commerce_metering=info,commerce_billing=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    serve(config).await
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    info!(
        node_id = %config.node_id,
        host = %config.api.host,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );

    let state = build_state(&config);
    let api_server = ApiServer::new(config, state);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Commerce Metering is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
