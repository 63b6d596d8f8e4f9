//! Admin usage report over the daily rollups: date range and metric
//! filters, newest-first ordering and pagination.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use commerce_core::types::parse_period;
use commerce_core::Metric;
use serde::{Deserialize, Serialize};

use crate::metering::UsageTracker;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Metric subset; empty or unknown names select every metric.
    #[serde(default)]
    pub metrics: Vec<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReportItem {
    pub tenant_id: String,
    pub period: String,
    pub usage: BTreeMap<Metric, f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageFilters {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub items: Vec<UsageReportItem>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub available_metrics: Vec<Metric>,
    /// Per-metric sum over the returned page.
    pub summary: BTreeMap<Metric, f64>,
    pub filters: UsageFilters,
}

impl UsageQuery {
    /// Requested metrics in the order asked for, duplicates dropped.
    fn selected_metrics(&self) -> Vec<Metric> {
        let mut chosen: Vec<Metric> = Vec::new();
        for metric in self.metrics.iter().filter_map(|name| Metric::parse(name.trim())) {
            if !chosen.contains(&metric) {
                chosen.push(metric);
            }
        }
        if chosen.is_empty() {
            Metric::ALL.to_vec()
        } else {
            chosen
        }
    }
}

pub fn usage_report(tracker: &UsageTracker, query: &UsageQuery) -> UsageReport {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let metrics = query.selected_metrics();

    let mut records: Vec<_> = tracker
        .latest_aggregates(None)
        .into_iter()
        .filter(|r| {
            let Ok(day) = parse_period(&r.period) else {
                return false;
            };
            query.start_date.map_or(true, |start| day >= start)
                && query.end_date.map_or(true, |end| day <= end)
        })
        .collect();
    records.sort_by(|a, b| {
        (b.period.as_str(), b.tenant_id.as_str()).cmp(&(a.period.as_str(), a.tenant_id.as_str()))
    });
    let total = records.len();

    let mut summary: BTreeMap<Metric, f64> = metrics.iter().map(|&m| (m, 0.0)).collect();
    let items = records
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .map(|record| {
            let usage: BTreeMap<Metric, f64> = metrics
                .iter()
                .map(|&m| (m, record.usage.get(m)))
                .collect();
            for (metric, value) in &usage {
                *summary.entry(*metric).or_default() += value;
            }
            UsageReportItem {
                tenant_id: record.tenant_id,
                period: record.period,
                usage,
                created_at: record.created_at,
            }
        })
        .collect();

    UsageReport {
        items,
        page,
        page_size,
        total,
        available_metrics: metrics,
        summary,
        filters: UsageFilters {
            start_date: query.start_date,
            end_date: query.end_date,
        },
    }
}
