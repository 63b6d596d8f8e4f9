//! API server: REST routes plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::{billing_rest, usage_rest};
use axum::routing::{get, post, put};
use axum::Router;
use commerce_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full route table over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Tenant-scoped endpoints
        .route(
            "/v1/:tenant_id/webhooks/payments",
            post(billing_rest::payment_webhook),
        )
        .route("/v1/:tenant_id/billing", get(billing_rest::tenant_billing))
        // Admin endpoints
        .route("/v1/admin/billing", get(billing_rest::billing_overview))
        .route("/v1/admin/plans", get(billing_rest::list_plans))
        .route(
            "/v1/admin/contracts/:tenant_id",
            put(billing_rest::register_contract),
        )
        .route("/v1/admin/tenants/usage", get(usage_rest::tenant_usage))
        .route("/v1/admin/jobs/aggregate", post(usage_rest::run_aggregation))
        .route(
            "/v1/admin/jobs/limit-checks",
            post(usage_rest::run_limit_checks),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
