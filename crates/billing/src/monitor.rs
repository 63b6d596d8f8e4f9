//! Usage monitor: compares a period's aggregates with each tenant's plan
//! limits and raises at most one alert per metric.

use chrono::{DateTime, NaiveDate, Utc};
use commerce_core::types::period_for_date;
use commerce_core::{MeteringResult, Metric};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::metering::{UsageRecord, UsageTracker};
use crate::notifier::{Notification, Notifier};
use crate::plans::{ContractRegistry, TenantContract};

/// Usage-to-limit ratios that trigger alerts, ascending.
pub const ALERT_THRESHOLDS: [f64; 2] = [0.8, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn for_threshold(threshold: f64) -> Self {
        if threshold >= 1.0 {
            Self::Critical
        } else {
            Self::Warning
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub tenant_id: String,
    pub metric: Metric,
    pub value: f64,
    pub limit: f64,
    pub threshold: f64,
    pub period: String,
    pub severity: Severity,
}

/// Result of one scheduled limit-check run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheckReport {
    pub period: String,
    pub evaluated_tenants: usize,
    pub alerts: Vec<AlertEvent>,
    pub notifications: Vec<Notification>,
    pub checked_at: DateTime<Utc>,
}

/// Highest threshold met by `ratio`, if any.
pub fn highest_threshold(ratio: f64) -> Option<f64> {
    ALERT_THRESHOLDS
        .iter()
        .fold(None, |met, &t| if ratio >= t { Some(t) } else { met })
}

pub struct UsageMonitor {
    tracker: UsageTracker,
    registry: ContractRegistry,
    notifier: Notifier,
}

impl UsageMonitor {
    pub fn new(tracker: UsageTracker, registry: ContractRegistry, notifier: Notifier) -> Self {
        Self {
            tracker,
            registry,
            notifier,
        }
    }

    /// Check one aggregate against a contract. Notifications go out before
    /// each alert is built; the ones accepted by the transport are appended
    /// to `sent`.
    pub fn evaluate_usage_thresholds(
        &self,
        record: &UsageRecord,
        contract: &TenantContract,
        sent: &mut Vec<Notification>,
    ) -> MeteringResult<Vec<AlertEvent>> {
        let plan = self.registry.resolve_plan(contract)?;
        let mut alerts = Vec::new();

        for metric in Metric::METERED {
            let limit = plan.limit(metric);
            if limit <= 0.0 {
                continue;
            }
            let value = record.usage.get(metric);
            if value <= 0.0 {
                continue;
            }
            let Some(threshold) = highest_threshold(value / limit) else {
                continue;
            };
            let severity = Severity::for_threshold(threshold);

            sent.extend(self.notifier.notify_threshold(
                &contract.admin_contact,
                metric,
                value,
                limit,
                threshold,
            ));
            metrics::counter!("monitor.alerts", "severity" => severity.as_str()).increment(1);
            alerts.push(AlertEvent {
                tenant_id: record.tenant_id.clone(),
                metric,
                value,
                limit,
                threshold,
                period: record.period.clone(),
                severity,
            });
        }
        Ok(alerts)
    }

    /// Evaluate every tenant aggregate of `for_date` (default: today, UTC).
    /// Tenants without a contract are skipped and not counted.
    pub fn run_limit_checks(&self, for_date: Option<NaiveDate>) -> LimitCheckReport {
        let date = for_date.unwrap_or_else(|| Utc::now().date_naive());
        let period = period_for_date(date);

        let mut evaluated = 0;
        let mut alerts = Vec::new();
        let mut notifications = Vec::new();

        for record in self.tracker.latest_aggregates(Some(&period)) {
            let Some(contract) = self.registry.get_tenant_contract(&record.tenant_id) else {
                debug!(tenant_id = %record.tenant_id, "No contract, skipping limit check");
                continue;
            };
            evaluated += 1;
            match self.evaluate_usage_thresholds(&record, &contract, &mut notifications) {
                Ok(found) => alerts.extend(found),
                Err(e) => {
                    error!(tenant_id = %record.tenant_id, error = %e, "Contract plan missing from catalog");
                }
            }
        }

        info!(
            period = %period,
            evaluated_tenants = evaluated,
            alerts = alerts.len(),
            notifications = notifications.len(),
            "Limit checks completed"
        );

        LimitCheckReport {
            period,
            evaluated_tenants: evaluated,
            alerts,
            notifications,
            checked_at: Utc::now(),
        }
    }
}
