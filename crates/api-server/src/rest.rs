//! Shared REST state, error mapping and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use commerce_billing::{
    ContractRegistry, DailyAggregator, Notifier, SubscriptionEngine, UsageMonitor, UsageTracker,
};
use commerce_core::{MeteringError, MeteringResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: UsageTracker,
    pub registry: ContractRegistry,
    pub aggregator: Arc<DailyAggregator>,
    pub monitor: Arc<UsageMonitor>,
    pub subscriptions: Arc<SubscriptionEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the engines around a shared tracker and registry.
    pub fn new(
        node_id: impl Into<String>,
        tracker: UsageTracker,
        registry: ContractRegistry,
        subscriptions: SubscriptionEngine,
        notifier: Notifier,
    ) -> Self {
        Self {
            aggregator: Arc::new(DailyAggregator::new(tracker.clone())),
            monitor: Arc::new(UsageMonitor::new(tracker.clone(), registry.clone(), notifier)),
            subscriptions: Arc::new(subscriptions),
            tracker,
            registry,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// Maps engine errors onto HTTP responses.
pub struct ApiError(pub MeteringError);

impl From<MeteringError> for ApiError {
    fn from(e: MeteringError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self.0 {
            MeteringError::InvalidPlan(_) => (StatusCode::BAD_REQUEST, "invalid_plan"),
            MeteringError::MalformedWebhookPayload(_) => {
                (StatusCode::BAD_REQUEST, "malformed_webhook_payload")
            }
            MeteringError::Config(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            MeteringError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            MeteringError::PlanNotFound { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "plan_not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
        }
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Run engine work on the blocking pool. Store writes may sleep between
/// retries and must stay off the async workers.
pub async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> MeteringResult<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MeteringError::Internal(e.into()))?;
    Ok(result?)
}

/// GET /health: health check.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
