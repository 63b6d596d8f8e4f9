//! Daily aggregation job: rolls one period's raw usage events into a
//! single aggregate record per tenant.
//!
//! Safe to re-run: every run appends fresh aggregates and readers take the
//! most recently created row per (tenant, period). At most one run per
//! period is expected at a time; the scheduler guarantees that, not this
//! code.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use commerce_core::types::{parse_period, period_for_date};
use commerce_core::{MeteringResult, UsageTotals};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::metering::{UsageRecord, UsageTracker};

/// Outcome of one scheduled aggregation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSummary {
    pub period: String,
    pub tenants: usize,
    pub message: String,
}

pub struct DailyAggregator {
    tracker: UsageTracker,
}

impl DailyAggregator {
    pub fn new(tracker: UsageTracker) -> Self {
        Self { tracker }
    }

    /// Sum the raw events of `for_date` (default: today, UTC) per tenant,
    /// store one aggregate per tenant and return them ordered by tenant id.
    /// A period without raw events yields no aggregates.
    pub fn aggregate_daily_usage(&self, for_date: Option<NaiveDate>) -> Vec<UsageRecord> {
        let date = for_date.unwrap_or_else(|| Utc::now().date_naive());
        let period = period_for_date(date);

        let mut totals: BTreeMap<String, UsageTotals> = BTreeMap::new();
        for event in self.tracker.get_raw_events(Some(&period)) {
            totals
                .entry(event.tenant_id.clone())
                .or_default()
                .accumulate(&event.usage);
        }

        let created_at = Utc::now();
        let aggregates: Vec<UsageRecord> = totals
            .into_iter()
            .map(|(tenant_id, usage)| UsageRecord {
                id: Uuid::new_v4(),
                tenant_id,
                period: period.clone(),
                usage,
                created_at,
                metadata: BTreeMap::new(),
            })
            .collect();

        for record in &aggregates {
            self.tracker.append_aggregate(record.clone());
        }

        metrics::counter!("aggregation.records_produced").increment(aggregates.len() as u64);
        info!(
            period = %period,
            tenants = aggregates.len(),
            "Daily usage aggregated"
        );
        aggregates
    }

    /// Scheduler entry point. `period` is an optional `YYYY-MM-DD` label.
    pub fn run_daily_aggregation(&self, period: Option<&str>) -> MeteringResult<AggregationSummary> {
        let for_date = period.map(parse_period).transpose()?;
        let date = for_date.unwrap_or_else(|| Utc::now().date_naive());
        let aggregates = self.aggregate_daily_usage(Some(date));

        let period = period_for_date(date);
        let tenants = aggregates
            .iter()
            .map(|r| r.tenant_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        Ok(AggregationSummary {
            message: format!("Aggregated {tenants} tenants for period {period}"),
            period,
            tenants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::UsageSample;
    use chrono::TimeZone;
    use commerce_core::{MeteringError, Metric};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn seed(tracker: &UsageTracker) {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let sample = |requests, orders, gmv, bytes| UsageSample {
            requests,
            orders,
            gmv,
            bytes_consumed: bytes,
            timestamp: Some(ts),
            ..Default::default()
        };
        tracker.record_usage("t-001", sample(1, 1, 100.25, 10));
        tracker.record_usage("t-001", sample(2, 0, 0.5, 20));
        tracker.record_usage("t-002", sample(5, 2, 300.0, 0));
        // different day, must not leak into the rollup
        tracker.record_usage(
            "t-001",
            UsageSample::requests(100).at(ts + chrono::Duration::days(1)),
        );
    }

    #[test]
    fn test_daily_aggregation_rolls_up_usage() {
        let tracker = UsageTracker::in_memory();
        seed(&tracker);
        let aggregator = DailyAggregator::new(tracker.clone());

        let aggregates = aggregator.aggregate_daily_usage(Some(day()));
        assert_eq!(aggregates.len(), 2);

        let t1 = &aggregates[0];
        assert_eq!(t1.tenant_id, "t-001");
        assert_eq!(t1.period, "2024-06-01");
        assert_eq!(t1.usage.get(Metric::Requests), 3.0);
        assert_eq!(t1.usage.get(Metric::Orders), 1.0);
        assert_eq!(t1.usage.get(Metric::Gmv), 100.75);
        assert_eq!(t1.usage.get(Metric::Bytes), 30.0);

        assert_eq!(tracker.get_aggregates(Some("2024-06-01")), aggregates);
    }

    #[test]
    fn test_aggregate_equals_sum_of_raw_events() {
        let tracker = UsageTracker::in_memory();
        seed(&tracker);
        let aggregates = DailyAggregator::new(tracker.clone()).aggregate_daily_usage(Some(day()));

        for aggregate in &aggregates {
            for metric in Metric::ALL {
                let expected: f64 = tracker
                    .get_raw_events(Some("2024-06-01"))
                    .iter()
                    .filter(|e| e.tenant_id == aggregate.tenant_id)
                    .map(|e| e.usage.get(metric))
                    .sum();
                assert_eq!(aggregate.usage.get(metric), expected);
            }
        }
    }

    #[test]
    fn test_empty_period_produces_no_aggregates() {
        let tracker = UsageTracker::in_memory();
        let aggregator = DailyAggregator::new(tracker.clone());

        assert!(aggregator.aggregate_daily_usage(Some(day())).is_empty());
        assert!(tracker.get_aggregates(None).is_empty());
    }

    #[test]
    fn test_rerun_appends_value_identical_rollup() {
        let tracker = UsageTracker::in_memory();
        seed(&tracker);
        let aggregator = DailyAggregator::new(tracker.clone());

        let first = aggregator.aggregate_daily_usage(Some(day()));
        let second = aggregator.aggregate_daily_usage(Some(day()));

        assert_eq!(tracker.get_aggregates(Some("2024-06-01")).len(), 4);
        let latest = tracker.latest_aggregates(Some("2024-06-01"));
        assert_eq!(latest.len(), 2);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.usage, b.usage);
        }
    }

    #[test]
    fn test_run_reports_summary_and_validates_period() {
        let tracker = UsageTracker::in_memory();
        seed(&tracker);
        let aggregator = DailyAggregator::new(tracker);

        let summary = aggregator.run_daily_aggregation(Some("2024-06-01")).unwrap();
        assert_eq!(summary.tenants, 2);
        assert_eq!(summary.message, "Aggregated 2 tenants for period 2024-06-01");

        assert!(matches!(
            aggregator.run_daily_aggregation(Some("yesterday")),
            Err(MeteringError::Config(_))
        ));
    }
}
