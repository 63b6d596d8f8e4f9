//! Subscription payment state machine.
//!
//! Each tenant has one subscription whose status moves on payment-provider
//! notifications:
//!
//! ```text
//! (none)    -> active
//! active    -> active | pending | retrying | suspended
//! pending   -> active | pending | retrying | suspended
//! retrying  -> active | retrying | suspended
//! suspended -> active            (approval only)
//! ```
//!
//! [`transition`] is the pure step function. [`SubscriptionEngine`] loads,
//! applies and persists it under a per-tenant lock and appends one
//! [`PaymentReceipt`] per processed notification.
//!
//! Redeliveries are not deduplicated: the provider delivers at least once
//! and a repeated failure counts as another failed attempt.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use commerce_core::config::BillingConfig;
use commerce_core::MeteringResult;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{MemoryRepository, Record, Repository};
use crate::webhook::WebhookEvent;

pub const SUSPENDED_PAYMENT_FAILED: &str = "payment_failed";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Pending,
    Retrying,
    Suspended,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Suspended => "suspended",
        }
    }

    /// Map a status declared by a subscription notification. Unknown
    /// values map to `None`.
    pub fn from_declared(declared: &str) -> Option<Self> {
        match declared.trim().to_ascii_lowercase().as_str() {
            "active" | "authorized" | "approved" => Some(Self::Active),
            "pending" | "in_process" | "paused" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "suspended" | "cancelled" | "canceled" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// How a payment notification's raw status is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Approved,
    Pending,
    /// Everything else, including unknown strings.
    Failed,
}

impl PaymentOutcome {
    pub fn classify(raw_status: &str) -> Self {
        match raw_status.trim().to_ascii_lowercase().as_str() {
            "approved" | "authorized" => Self::Approved,
            "in_process" | "pending" => Self::Pending,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// `"{tenantId}#subscription"`.
    pub transaction_id: String,
    pub tenant_id: String,
    pub status: SubscriptionStatus,
    pub retry_attempts: u32,
    pub next_billing_at: Option<DateTime<Utc>>,
    pub suspended_reason: Option<String>,
    pub plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Initial state for a tenant never seen before.
    pub fn open(tenant_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: subscription_key(tenant_id),
            tenant_id: tenant_id.to_string(),
            status: SubscriptionStatus::Active,
            retry_attempts: 0,
            next_billing_at: None,
            suspended_reason: None,
            plan_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for Subscription {
    fn key(&self) -> String {
        self.transaction_id.clone()
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// Audit entry for one processed notification. Duplicates are expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub id: Uuid,
    pub transaction_id: String,
    pub tenant_id: String,
    pub resource_id: String,
    /// Provider status string, verbatim.
    pub status: String,
    pub amount: Option<f64>,
    pub currency: String,
    pub received_at: DateTime<Utc>,
    pub notification_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl Record for PaymentReceipt {
    fn key(&self) -> String {
        self.id.to_string()
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStatus {
    pub tenant_id: String,
    pub subscription: Option<Subscription>,
    pub recent_payments: Vec<PaymentReceipt>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantBillingHealth {
    pub tenant_id: String,
    pub subscription: Subscription,
    pub last_payment: Option<PaymentReceipt>,
    /// `"suspended"` or `"ok"`.
    pub billing_health: String,
}

pub fn subscription_key(tenant_id: &str) -> String {
    format!("{tenant_id}#subscription")
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Apply one payment notification to a tenant's subscription.
pub fn transition(
    current: Option<Subscription>,
    tenant_id: &str,
    outcome: PaymentOutcome,
    policy: &BillingConfig,
    now: DateTime<Utc>,
) -> Subscription {
    let mut sub = current.unwrap_or_else(|| Subscription::open(tenant_id, now));

    match outcome {
        PaymentOutcome::Approved => {
            sub.retry_attempts = 0;
            sub.status = SubscriptionStatus::Active;
            sub.suspended_reason = None;
            sub.next_billing_at = Some(now + Duration::days(policy.billing_cycle_days));
        }
        PaymentOutcome::Pending => {
            if matches!(
                sub.status,
                SubscriptionStatus::Active | SubscriptionStatus::Pending
            ) {
                sub.status = SubscriptionStatus::Pending;
            }
        }
        PaymentOutcome::Failed => {
            sub.retry_attempts = sub.retry_attempts.saturating_add(1);
            if sub.status == SubscriptionStatus::Suspended
                || sub.retry_attempts >= policy.max_payment_retries
            {
                sub.status = SubscriptionStatus::Suspended;
                if sub.suspended_reason.is_none() {
                    sub.suspended_reason = Some(SUSPENDED_PAYMENT_FAILED.to_string());
                }
            } else {
                sub.status = SubscriptionStatus::Retrying;
            }
        }
    }

    sub.updated_at = now;
    sub
}

/// Apply a subscription lifecycle notification: the declared status is
/// taken as-is and the retry counter is left alone. Unknown declarations
/// leave the status unchanged.
pub fn apply_declared_status(
    current: Option<Subscription>,
    tenant_id: &str,
    declared: &str,
    plan_id: Option<&str>,
    now: DateTime<Utc>,
) -> Subscription {
    let mut sub = current.unwrap_or_else(|| Subscription::open(tenant_id, now));

    match SubscriptionStatus::from_declared(declared) {
        Some(status) => {
            sub.status = status;
            sub.suspended_reason = match status {
                SubscriptionStatus::Suspended => Some(declared.trim().to_ascii_lowercase()),
                _ => None,
            };
        }
        None => {
            warn!(tenant_id = %tenant_id, declared = %declared, "Unknown subscription status, ignoring");
        }
    }
    if let Some(plan_id) = plan_id {
        sub.plan_id = Some(plan_id.to_string());
    }

    sub.updated_at = now;
    sub
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SubscriptionEngine {
    subscriptions: Arc<dyn Repository<Subscription>>,
    receipts: Arc<dyn Repository<PaymentReceipt>>,
    policy: BillingConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubscriptionEngine {
    pub fn new(
        subscriptions: Arc<dyn Repository<Subscription>>,
        receipts: Arc<dyn Repository<PaymentReceipt>>,
        policy: BillingConfig,
    ) -> Self {
        info!(
            max_payment_retries = policy.max_payment_retries,
            billing_cycle_days = policy.billing_cycle_days,
            "SubscriptionEngine initialized"
        );
        Self {
            subscriptions,
            receipts,
            policy,
            locks: DashMap::new(),
        }
    }

    pub fn in_memory(policy: BillingConfig) -> Self {
        Self::new(
            Arc::new(MemoryRepository::<Subscription>::new()),
            Arc::new(MemoryRepository::<PaymentReceipt>::new()),
            policy,
        )
    }

    /// Run a payment notification through the state machine.
    pub fn process_payment_status(
        &self,
        tenant_id: &str,
        resource_id: &str,
        raw_status: &str,
        amount: Option<f64>,
        currency: Option<&str>,
    ) -> MeteringResult<PaymentReceipt> {
        self.process_payment(tenant_id, resource_id, raw_status, amount, currency, "payment")
    }

    /// Dispatch a normalized webhook to the payment or subscription path.
    pub fn handle_webhook(
        &self,
        tenant_id: &str,
        event: &WebhookEvent,
    ) -> MeteringResult<PaymentReceipt> {
        if !event.is_subscription() {
            return self.process_payment(
                tenant_id,
                &event.resource_id,
                &event.status,
                event.amount,
                event.currency.as_deref(),
                &event.notification_type,
            );
        }

        let receipt = self.build_receipt(
            tenant_id,
            &event.resource_id,
            &event.status,
            event.amount,
            event.currency.as_deref(),
            &event.notification_type,
            event.plan_id.clone(),
        );
        let plan_id = event.plan_id.as_deref();
        self.apply(tenant_id, receipt, |current, now| {
            apply_declared_status(current, tenant_id, &event.status, plan_id, now)
        })
    }

    pub fn get_subscription(&self, tenant_id: &str) -> MeteringResult<Option<Subscription>> {
        self.subscriptions.get(&subscription_key(tenant_id))
    }

    /// Receipts for a tenant, oldest first.
    pub fn list_payments(&self, tenant_id: &str) -> MeteringResult<Vec<PaymentReceipt>> {
        let mut payments = self.receipts.scan_tenant(tenant_id)?;
        payments.sort_by_key(|p| p.received_at);
        Ok(payments)
    }

    /// Current subscription plus the most recent receipts.
    pub fn billing_status(&self, tenant_id: &str) -> MeteringResult<BillingStatus> {
        let payments = self.list_payments(tenant_id)?;
        let skip = payments.len().saturating_sub(self.policy.recent_payments_limit);
        Ok(BillingStatus {
            tenant_id: tenant_id.to_string(),
            subscription: self.get_subscription(tenant_id)?,
            recent_payments: payments.into_iter().skip(skip).collect(),
        })
    }

    /// Billing health for every tenant with a subscription, by tenant id.
    pub fn billing_overview(&self) -> MeteringResult<Vec<TenantBillingHealth>> {
        let mut subscriptions = self.subscriptions.scan(&|_| true)?;
        subscriptions.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));

        subscriptions
            .into_iter()
            .map(|subscription| {
                let last_payment = self.list_payments(&subscription.tenant_id)?.pop();
                let billing_health = if subscription.status == SubscriptionStatus::Suspended {
                    "suspended"
                } else {
                    "ok"
                };
                Ok(TenantBillingHealth {
                    tenant_id: subscription.tenant_id.clone(),
                    billing_health: billing_health.to_string(),
                    last_payment,
                    subscription,
                })
            })
            .collect()
    }

    fn process_payment(
        &self,
        tenant_id: &str,
        resource_id: &str,
        raw_status: &str,
        amount: Option<f64>,
        currency: Option<&str>,
        notification_type: &str,
    ) -> MeteringResult<PaymentReceipt> {
        let outcome = PaymentOutcome::classify(raw_status);
        let receipt = self.build_receipt(
            tenant_id,
            resource_id,
            raw_status,
            amount,
            currency,
            notification_type,
            None,
        );
        self.apply(tenant_id, receipt, |current, now| {
            transition(current, tenant_id, outcome, &self.policy, now)
        })
    }

    /// Load, transform and persist one tenant's subscription while holding
    /// that tenant's lock. The receipt is written before the subscription,
    /// so a failed receipt write leaves the subscription untouched.
    fn apply<F>(
        &self,
        tenant_id: &str,
        receipt: PaymentReceipt,
        step: F,
    ) -> MeteringResult<PaymentReceipt>
    where
        F: FnOnce(Option<Subscription>, DateTime<Utc>) -> Subscription,
    {
        let lock = self.tenant_lock(tenant_id);
        let result = {
            let _guard = lock.lock();
            self.apply_locked(tenant_id, receipt, step)
        };
        drop(lock);
        self.release_lock(tenant_id);
        result
    }

    fn apply_locked<F>(
        &self,
        tenant_id: &str,
        receipt: PaymentReceipt,
        step: F,
    ) -> MeteringResult<PaymentReceipt>
    where
        F: FnOnce(Option<Subscription>, DateTime<Utc>) -> Subscription,
    {
        let current = self.get_subscription(tenant_id)?;
        let previous = current.as_ref().map(|s| s.status);
        let next = step(current, receipt.received_at);

        self.receipts.put(receipt.clone())?;
        self.subscriptions.put(next.clone())?;

        metrics::counter!("subscription.transitions", "status" => next.status.as_str())
            .increment(1);
        if previous != Some(next.status) {
            info!(
                tenant_id = %tenant_id,
                from = previous.map(|s| s.as_str()).unwrap_or("none"),
                to = next.status.as_str(),
                retry_attempts = next.retry_attempts,
                "Subscription status changed"
            );
        }
        Ok(receipt)
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(tenant_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop the tenant's lock entry once no caller holds or waits on it.
    fn release_lock(&self, tenant_id: &str) {
        self.locks
            .remove_if(tenant_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn build_receipt(
        &self,
        tenant_id: &str,
        resource_id: &str,
        raw_status: &str,
        amount: Option<f64>,
        currency: Option<&str>,
        notification_type: &str,
        plan_id: Option<String>,
    ) -> PaymentReceipt {
        let transaction_id = if resource_id.starts_with(tenant_id) {
            resource_id.to_string()
        } else {
            format!("{tenant_id}#{resource_id}")
        };
        PaymentReceipt {
            id: Uuid::new_v4(),
            transaction_id,
            tenant_id: tenant_id.to_string(),
            resource_id: resource_id.to_string(),
            status: raw_status.to_string(),
            amount,
            currency: currency
                .filter(|c| !c.is_empty())
                .unwrap_or(self.policy.default_currency.as_str())
                .to_string(),
            received_at: Utc::now(),
            notification_type: notification_type.to_string(),
            plan_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use commerce_core::MeteringError;
    use serde_json::json;

    fn policy() -> BillingConfig {
        BillingConfig::default()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_event_opens_active_subscription() {
        let sub = Subscription::open("t-001", now());
        assert_eq!(sub.transaction_id, "t-001#subscription");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.retry_attempts, 0);
        assert!(sub.next_billing_at.is_none());
    }

    #[test]
    fn test_outcome_classification_is_case_insensitive() {
        assert_eq!(PaymentOutcome::classify("APPROVED"), PaymentOutcome::Approved);
        assert_eq!(PaymentOutcome::classify("Authorized"), PaymentOutcome::Approved);
        assert_eq!(PaymentOutcome::classify("In_Process"), PaymentOutcome::Pending);
        assert_eq!(PaymentOutcome::classify("pending"), PaymentOutcome::Pending);
        assert_eq!(PaymentOutcome::classify("rejected"), PaymentOutcome::Failed);
        assert_eq!(PaymentOutcome::classify("cancelled"), PaymentOutcome::Failed);
        assert_eq!(PaymentOutcome::classify("???"), PaymentOutcome::Failed);
    }

    #[test]
    fn test_three_failures_suspend() {
        let p = policy();
        let first = transition(None, "t-001", PaymentOutcome::Failed, &p, now());
        assert_eq!((first.status, first.retry_attempts), (SubscriptionStatus::Retrying, 1));

        let second = transition(Some(first), "t-001", PaymentOutcome::Failed, &p, now());
        assert_eq!((second.status, second.retry_attempts), (SubscriptionStatus::Retrying, 2));
        assert!(second.suspended_reason.is_none());

        let third = transition(Some(second), "t-001", PaymentOutcome::Failed, &p, now());
        assert_eq!((third.status, third.retry_attempts), (SubscriptionStatus::Suspended, 3));
        assert_eq!(third.suspended_reason.as_deref(), Some(SUSPENDED_PAYMENT_FAILED));
    }

    #[test]
    fn test_approval_resets_and_schedules_next_billing() {
        let p = policy();
        let mut sub = None;
        for _ in 0..5 {
            sub = Some(transition(sub, "t-001", PaymentOutcome::Failed, &p, now()));
        }
        assert_eq!(sub.as_ref().unwrap().retry_attempts, 5);

        let recovered = transition(sub, "t-001", PaymentOutcome::Approved, &p, now());
        assert_eq!(recovered.status, SubscriptionStatus::Active);
        assert_eq!(recovered.retry_attempts, 0);
        assert!(recovered.suspended_reason.is_none());
        assert_eq!(recovered.next_billing_at, Some(now() + Duration::days(30)));
    }

    #[test]
    fn test_pending_leaves_retry_counter_untouched() {
        let p = policy();
        let active = transition(None, "t-001", PaymentOutcome::Pending, &p, now());
        assert_eq!((active.status, active.retry_attempts), (SubscriptionStatus::Pending, 0));

        let retrying = transition(Some(active), "t-001", PaymentOutcome::Failed, &p, now());
        let still = transition(Some(retrying), "t-001", PaymentOutcome::Pending, &p, now());
        assert_eq!((still.status, still.retry_attempts), (SubscriptionStatus::Retrying, 1));
    }

    #[test]
    fn test_suspension_only_lifted_by_approval() {
        let p = policy();
        let mut sub = None;
        for _ in 0..3 {
            sub = Some(transition(sub, "t-001", PaymentOutcome::Failed, &p, now()));
        }
        let pending = transition(sub, "t-001", PaymentOutcome::Pending, &p, now());
        assert_eq!(pending.status, SubscriptionStatus::Suspended);

        let failed = transition(Some(pending), "t-001", PaymentOutcome::Failed, &p, now());
        assert_eq!((failed.status, failed.retry_attempts), (SubscriptionStatus::Suspended, 4));

        let approved = transition(Some(failed), "t-001", PaymentOutcome::Approved, &p, now());
        assert_eq!(approved.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_declared_status_bypasses_retry_counter() {
        let p = policy();
        let retrying = transition(None, "t-001", PaymentOutcome::Failed, &p, now());

        let cancelled =
            apply_declared_status(Some(retrying), "t-001", "cancelled", Some("growth"), now());
        assert_eq!(cancelled.status, SubscriptionStatus::Suspended);
        assert_eq!(cancelled.suspended_reason.as_deref(), Some("cancelled"));
        assert_eq!(cancelled.retry_attempts, 1);
        assert_eq!(cancelled.plan_id.as_deref(), Some("growth"));

        let unknown = apply_declared_status(Some(cancelled), "t-001", "frozen", None, now());
        assert_eq!(unknown.status, SubscriptionStatus::Suspended);

        let active = apply_declared_status(Some(unknown), "t-001", "authorized", None, now());
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert_eq!(active.retry_attempts, 1);
        assert!(active.suspended_reason.is_none());
    }

    #[test]
    fn test_engine_appends_one_receipt_per_call() {
        let engine = SubscriptionEngine::in_memory(policy());
        for status in ["approved", "pending", "rejected", "mystery", "rejected"] {
            engine
                .process_payment_status("t-001", "pay-1", status, Some(10.0), None)
                .unwrap();
        }

        let payments = engine.list_payments("t-001").unwrap();
        assert_eq!(payments.len(), 5);
        assert_eq!(payments[3].status, "mystery");
        assert_eq!(payments[0].transaction_id, "t-001#pay-1");
        assert_eq!(payments[0].currency, "USD");

        let sub = engine.get_subscription("t-001").unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Suspended);
        assert_eq!(sub.retry_attempts, 3);
    }

    #[test]
    fn test_receipt_keeps_raw_status_and_tenant_prefixed_id() {
        let engine = SubscriptionEngine::in_memory(policy());
        let receipt = engine
            .process_payment_status("t-001", "t-001#order-9", "REJECTED", Some(5.5), Some("BRL"))
            .unwrap();

        assert_eq!(receipt.transaction_id, "t-001#order-9");
        assert_eq!(receipt.status, "REJECTED");
        assert_eq!(receipt.currency, "BRL");
        assert_eq!(receipt.notification_type, "payment");
    }

    #[test]
    fn test_redelivered_failures_are_counted_again() {
        let engine = SubscriptionEngine::in_memory(policy());
        for _ in 0..3 {
            engine
                .process_payment_status("t-001", "pay-7", "rejected", None, None)
                .unwrap();
        }
        let sub = engine.get_subscription("t-001").unwrap().unwrap();
        assert_eq!(sub.retry_attempts, 3);
        assert_eq!(sub.status, SubscriptionStatus::Suspended);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let engine = Arc::new(SubscriptionEngine::in_memory(BillingConfig {
            max_payment_retries: 1000,
            ..BillingConfig::default()
        }));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        engine
                            .process_payment_status("t-001", &format!("pay-{i}-{j}"), "rejected", None, None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let sub = engine.get_subscription("t-001").unwrap().unwrap();
        assert_eq!(sub.retry_attempts, 200);
        assert_eq!(engine.list_payments("t-001").unwrap().len(), 200);
    }

    #[test]
    fn test_webhook_dispatch() {
        let engine = SubscriptionEngine::in_memory(policy());
        let payment = WebhookEvent::from_payload(&json!({
            "action": "payment.updated",
            "data": {"id": "pay-1", "status": "rejected"}
        }))
        .unwrap();
        let receipt = engine.handle_webhook("t-001", &payment).unwrap();
        assert_eq!(receipt.notification_type, "payment.updated");
        assert_eq!(engine.list_payments("t-001").unwrap()[0].notification_type, "payment.updated");

        let lifecycle = WebhookEvent::from_payload(&json!({
            "type": "subscription_preapproval",
            "data": {"id": "sub-1", "status": "authorized", "planId": "enterprise"}
        }))
        .unwrap();
        let receipt = engine.handle_webhook("t-001", &lifecycle).unwrap();
        assert_eq!(receipt.plan_id.as_deref(), Some("enterprise"));

        let sub = engine.get_subscription("t-001").unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.retry_attempts, 1);
        assert_eq!(sub.plan_id.as_deref(), Some("enterprise"));
        assert_eq!(engine.list_payments("t-001").unwrap().len(), 2);
    }

    #[test]
    fn test_billing_views() {
        let engine = SubscriptionEngine::in_memory(BillingConfig {
            recent_payments_limit: 2,
            ..BillingConfig::default()
        });
        for _ in 0..3 {
            engine
                .process_payment_status("t-bad", "pay", "rejected", None, None)
                .unwrap();
        }
        engine
            .process_payment_status("t-good", "pay", "approved", Some(99.0), None)
            .unwrap();

        let status = engine.billing_status("t-bad").unwrap();
        assert_eq!(status.recent_payments.len(), 2);
        assert_eq!(
            status.subscription.unwrap().status,
            SubscriptionStatus::Suspended
        );
        assert!(engine.billing_status("t-new").unwrap().subscription.is_none());

        let overview = engine.billing_overview().unwrap();
        let health: Vec<(&str, &str)> = overview
            .iter()
            .map(|t| (t.tenant_id.as_str(), t.billing_health.as_str()))
            .collect();
        assert_eq!(health, vec![("t-bad", "suspended"), ("t-good", "ok")]);
        assert_eq!(overview[1].last_payment.as_ref().unwrap().amount, Some(99.0));
    }

    #[test]
    fn test_storage_failure_is_propagated() {
        let subscriptions = Arc::new(MemoryRepository::<Subscription>::new());
        let receipts = Arc::new(MemoryRepository::<PaymentReceipt>::new());
        let engine = SubscriptionEngine::new(subscriptions.clone(), receipts.clone(), policy());
        subscriptions.set_online(false);

        let err = engine
            .process_payment_status("t-001", "pay-1", "rejected", None, None)
            .unwrap_err();
        assert!(matches!(err, MeteringError::StorageUnavailable(_)));
        assert!(receipts.is_empty());
    }

    #[test]
    fn test_failed_receipt_write_leaves_subscription_unchanged() {
        let subscriptions = Arc::new(MemoryRepository::<Subscription>::new());
        let receipts = Arc::new(MemoryRepository::<PaymentReceipt>::new());
        let engine = SubscriptionEngine::new(subscriptions.clone(), receipts.clone(), policy());
        engine
            .process_payment_status("t-001", "pay-0", "approved", None, None)
            .unwrap();
        let before = engine.get_subscription("t-001").unwrap().unwrap();

        receipts.set_online(false);
        for _ in 0..3 {
            let err = engine
                .process_payment_status("t-001", "pay-1", "rejected", None, None)
                .unwrap_err();
            assert!(matches!(err, MeteringError::StorageUnavailable(_)));
        }
        let lifecycle = WebhookEvent::from_payload(&json!({
            "type": "subscription_preapproval",
            "data": {"id": "sub-1", "status": "cancelled"}
        }))
        .unwrap();
        assert!(engine.handle_webhook("t-001", &lifecycle).is_err());

        assert_eq!(engine.get_subscription("t-001").unwrap().unwrap(), before);
        receipts.set_online(true);
        assert_eq!(engine.list_payments("t-001").unwrap().len(), 1);
    }

    #[test]
    fn test_idle_tenant_locks_are_released() {
        let engine = SubscriptionEngine::in_memory(policy());
        for tenant in ["t-001", "t-002", "t-003"] {
            engine
                .process_payment_status(tenant, "pay-1", "rejected", None, None)
                .unwrap();
        }
        assert_eq!(engine.lock_entries(), 0);
    }
}
