//! Shared metering types: metric names, per-metric usage totals, and the
//! calendar-day period used as the aggregation bucket.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeteringError, MeteringResult};

/// Format of a period label (`YYYY-MM-DD`).
pub const PERIOD_FORMAT: &str = "%Y-%m-%d";

/// A usage dimension tracked for every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Requests,
    Orders,
    Gmv,
    Bytes,
}

impl Metric {
    /// Every tracked metric, in storage order.
    pub const ALL: [Metric; 4] = [Self::Requests, Self::Orders, Self::Gmv, Self::Bytes];

    /// Metrics that plans put limits on. `bytes` is tracked but never enforced.
    pub const METERED: [Metric; 3] = [Self::Requests, Self::Orders, Self::Gmv];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Orders => "orders",
            Self::Gmv => "gmv",
            Self::Bytes => "bytes",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "requests" => Some(Self::Requests),
            "orders" => Some(Self::Orders),
            "gmv" => Some(Self::Gmv),
            "bytes" => Some(Self::Bytes),
            _ => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-metric counters of one usage record. Serializes as a mapping with
/// the fixed keys `requests`, `orders`, `gmv` and `bytes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    #[serde(default)]
    pub requests: f64,
    #[serde(default)]
    pub orders: f64,
    #[serde(default)]
    pub gmv: f64,
    #[serde(default)]
    pub bytes: f64,
}

impl UsageTotals {
    pub fn new(requests: u64, orders: u64, gmv: f64, bytes: u64) -> Self {
        Self {
            requests: requests as f64,
            orders: orders as f64,
            gmv,
            bytes: bytes as f64,
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Requests => self.requests,
            Metric::Orders => self.orders,
            Metric::Gmv => self.gmv,
            Metric::Bytes => self.bytes,
        }
    }

    /// Add another record's counters into this one, metric by metric.
    pub fn accumulate(&mut self, other: &UsageTotals) {
        self.requests += other.requests;
        self.orders += other.orders;
        self.gmv += other.gmv;
        self.bytes += other.bytes;
    }
}

/// Period label for the UTC calendar date of `ts`.
pub fn period_of(ts: DateTime<Utc>) -> String {
    ts.format(PERIOD_FORMAT).to_string()
}

/// Period label for a calendar date.
pub fn period_for_date(date: NaiveDate) -> String {
    date.format(PERIOD_FORMAT).to_string()
}

/// Today's period in UTC.
pub fn today_period() -> String {
    period_of(Utc::now())
}

/// Parse a `YYYY-MM-DD` label back into a date.
pub fn parse_period(label: &str) -> MeteringResult<NaiveDate> {
    NaiveDate::parse_from_str(label.trim(), PERIOD_FORMAT).map_err(|e| {
        MeteringError::Config(format!("invalid period '{label}', expected YYYY-MM-DD: {e}"))
    })
}
