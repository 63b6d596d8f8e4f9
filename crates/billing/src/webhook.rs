//! Payment-provider webhook normalization.
//!
//! Providers send `{ type|action, data: { id, status, amount|transaction_amount,
//! currency|currency_id } }` with fields that are frequently missing or
//! oddly typed. Everything is reduced to a [`WebhookEvent`]; only a body
//! that is not a JSON object is rejected.

use commerce_core::{MeteringError, MeteringResult};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Status assumed when the provider omits one.
pub const DEFAULT_STATUS: &str = "pending";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub notification_type: String,
    pub resource_id: String,
    /// Provider status, verbatim.
    pub status: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub plan_id: Option<String>,
}

impl WebhookEvent {
    pub fn from_payload(payload: &Value) -> MeteringResult<Self> {
        let root = payload.as_object().ok_or_else(|| {
            MeteringError::MalformedWebhookPayload("body must be a JSON object".into())
        })?;
        let empty = Map::new();
        let data = root.get("data").and_then(Value::as_object).unwrap_or(&empty);

        let notification_type = text(root, "type")
            .or_else(|| text(root, "action"))
            .unwrap_or_else(|| "payment".to_string());
        let resource_id = text(data, "id").unwrap_or_else(|| "unknown".to_string());

        let status = match text(data, "status").or_else(|| text(root, "status")) {
            Some(status) => status,
            None => {
                warn!(
                    resource_id = %resource_id,
                    notification_type = %notification_type,
                    "Webhook without status, assuming pending"
                );
                DEFAULT_STATUS.to_string()
            }
        };

        let amount = number(data, "transaction_amount").or_else(|| number(data, "amount"));
        let currency = text(data, "currency_id").or_else(|| text(data, "currency"));
        let plan_id = text(data, "planId")
            .or_else(|| text(data, "plan_id"))
            .or_else(|| text(root, "planId"));

        Ok(Self {
            notification_type,
            resource_id,
            status,
            amount,
            currency,
            plan_id,
        })
    }

    /// Plan/subscription lifecycle notifications, as opposed to payments.
    pub fn is_subscription(&self) -> bool {
        self.notification_type.starts_with("subscription")
    }
}

/// Non-empty string, or a number rendered as text (providers send numeric ids).
fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
