//! Payment webhook ingress, billing views and contract administration.

use axum::extract::{Path, State};
use axum::Json;
use commerce_billing::plans::{AdminContact, Plan, TenantContract};
use commerce_billing::subscription::{BillingStatus, TenantBillingHealth};
use commerce_billing::{PaymentReceipt, WebhookEvent};
use commerce_core::MeteringError;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::rest::{run_blocking, ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContractRequest {
    pub plan_id: String,
    #[serde(default)]
    pub admin_contact: AdminContact,
}

/// POST /v1/:tenant_id/webhooks/payments: apply a provider notification.
///
/// The body is read raw so the call can be metered by its byte size before
/// parsing. An empty body is treated as `{}`.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    body: String,
) -> Result<Json<PaymentReceipt>, ApiError> {
    metrics::counter!("api.webhooks.received").increment(1);

    let tracker = state.tracker.clone();
    let engine = state.subscriptions.clone();
    let tenant = tenant_id.clone();
    let receipt = run_blocking(move || {
        tracker.record_api_call(&tenant, &body, 1, 0, 0.0);
        let payload: Value = if body.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&body)
                .map_err(|e| MeteringError::MalformedWebhookPayload(e.to_string()))?
        };
        let event = WebhookEvent::from_payload(&payload)?;
        engine.handle_webhook(&tenant, &event)
    })
    .await?;

    info!(
        tenant_id = %tenant_id,
        transaction_id = %receipt.transaction_id,
        status = %receipt.status,
        "Payment webhook processed"
    );
    Ok(Json(receipt))
}

/// GET /v1/:tenant_id/billing
pub async fn tenant_billing(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<BillingStatus>, ApiError> {
    let engine = state.subscriptions.clone();
    let status = run_blocking(move || engine.billing_status(&tenant_id)).await?;
    Ok(Json(status))
}

/// GET /v1/admin/billing
pub async fn billing_overview(
    State(state): State<AppState>,
) -> Result<Json<Vec<TenantBillingHealth>>, ApiError> {
    let engine = state.subscriptions.clone();
    let overview = run_blocking(move || engine.billing_overview()).await?;
    Ok(Json(overview))
}

/// PUT /v1/admin/contracts/:tenant_id
pub async fn register_contract(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<RegisterContractRequest>,
) -> Result<Json<TenantContract>, ApiError> {
    metrics::counter!("api.contracts.registered").increment(1);
    let contract = state
        .registry
        .register_contract(&tenant_id, &req.plan_id, req.admin_contact)?;
    Ok(Json(contract))
}

/// GET /v1/admin/plans
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<Plan>> {
    Json(state.registry.list_plans())
}
