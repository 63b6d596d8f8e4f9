//! Admin usage report and scheduler job triggers.

use axum::extract::{Query, State};
use axum::Json;
use commerce_billing::aggregation::AggregationSummary;
use commerce_billing::reporting::{usage_report, UsageQuery, UsageReport};
use commerce_billing::LimitCheckReport;
use commerce_core::types::parse_period;
use serde::Deserialize;

use crate::rest::{run_blocking, ApiError, AppState};

/// Raw query string for the usage report; dates arrive as text so a bad
/// value maps to a 400 with our own error body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Comma-separated metric names.
    pub metrics: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl UsageParams {
    fn into_query(self) -> Result<UsageQuery, ApiError> {
        let date = |raw: Option<String>| {
            raw.filter(|s| !s.trim().is_empty())
                .map(|s| parse_period(s.trim()))
                .transpose()
        };
        Ok(UsageQuery {
            start_date: date(self.start_date)?,
            end_date: date(self.end_date)?,
            metrics: self
                .metrics
                .map(|m| {
                    m.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            page: self.page,
            page_size: self.page_size,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JobRequest {
    pub period: Option<String>,
}

/// GET /v1/admin/tenants/usage
pub async fn tenant_usage(
    State(state): State<AppState>,
    Query(params): Query<UsageParams>,
) -> Result<Json<UsageReport>, ApiError> {
    let query = params.into_query()?;
    let tracker = state.tracker.clone();
    let report = run_blocking(move || Ok(usage_report(&tracker, &query))).await?;
    Ok(Json(report))
}

/// POST /v1/admin/jobs/aggregate
pub async fn run_aggregation(
    State(state): State<AppState>,
    body: Option<Json<JobRequest>>,
) -> Result<Json<AggregationSummary>, ApiError> {
    metrics::counter!("api.jobs.triggered", "job" => "aggregate").increment(1);
    let period = body.and_then(|Json(b)| b.period);
    let aggregator = state.aggregator.clone();
    let summary =
        run_blocking(move || aggregator.run_daily_aggregation(period.as_deref())).await?;
    Ok(Json(summary))
}

/// POST /v1/admin/jobs/limit-checks
pub async fn run_limit_checks(
    State(state): State<AppState>,
    body: Option<Json<JobRequest>>,
) -> Result<Json<LimitCheckReport>, ApiError> {
    metrics::counter!("api.jobs.triggered", "job" => "limit_checks").increment(1);
    let for_date = body
        .and_then(|Json(b)| b.period)
        .map(|p| parse_period(&p))
        .transpose()?;
    let monitor = state.monitor.clone();
    let report = run_blocking(move || Ok(monitor.run_limit_checks(for_date))).await?;
    Ok(Json(report))
}
