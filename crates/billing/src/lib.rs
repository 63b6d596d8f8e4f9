//! Usage metering, aggregation, plan enforcement and subscription billing.
//!
//! Raw usage events are rolled into daily per-tenant aggregates, checked
//! against contracted plan limits, and turned into alerts. Payment-provider
//! webhooks drive a per-tenant subscription state machine. Records live
//! behind the [`store::Repository`] trait; the in-memory implementation is
//! used for development and tests.

pub mod aggregation;
pub mod metering;
pub mod monitor;
pub mod notifier;
pub mod plans;
pub mod reporting;
pub mod store;
pub mod subscription;
pub mod webhook;

pub use aggregation::DailyAggregator;
pub use metering::{UsageRecord, UsageSample, UsageTracker};
pub use monitor::{AlertEvent, LimitCheckReport, UsageMonitor};
pub use notifier::{Notification, NotificationTransport, Notifier};
pub use plans::{AdminContact, ContractRegistry, Plan, TenantContract};
pub use subscription::{PaymentReceipt, Subscription, SubscriptionEngine, SubscriptionStatus};
pub use webhook::WebhookEvent;
