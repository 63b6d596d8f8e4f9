//! Usage tracker: records one raw usage event per tracked API call and
//! keeps the daily per-tenant rollups produced by the aggregator.
//!
//! Both collections live behind [`Repository`] handles. Storage failures
//! never reach the caller: writes are dropped and reads come back empty,
//! so ingestion keeps working in a degraded, lossy mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use commerce_core::types::period_of;
use commerce_core::UsageTotals;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{MemoryRepository, Record, Repository};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A raw usage event or a daily aggregate, depending on the collection it
/// is stored in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    pub tenant_id: String,
    /// UTC calendar day, `YYYY-MM-DD`.
    pub period: String,
    pub usage: UsageTotals,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Record for UsageRecord {
    fn key(&self) -> String {
        self.id.to_string()
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// Side effects of one API invocation. Every field is optional; the
/// timestamp defaults to now.
#[derive(Debug, Clone, Default)]
pub struct UsageSample {
    pub requests: u64,
    pub orders: u64,
    pub gmv: f64,
    pub bytes_consumed: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl UsageSample {
    pub fn requests(requests: u64) -> Self {
        Self {
            requests,
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub type UsageRepository = Arc<dyn Repository<UsageRecord>>;

/// Append-only raw event log plus the aggregate rollup collection.
#[derive(Clone)]
pub struct UsageTracker {
    raw_events: UsageRepository,
    aggregates: UsageRepository,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl UsageTracker {
    pub fn new(raw_events: UsageRepository, aggregates: UsageRepository) -> Self {
        Self {
            raw_events,
            aggregates,
        }
    }

    /// Tracker backed by two fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryRepository::<UsageRecord>::new()),
            Arc::new(MemoryRepository::<UsageRecord>::new()),
        )
    }

    /// Record one raw usage event and return it. Exactly one new row is
    /// appended per call; events are never merged.
    pub fn record_usage(&self, tenant_id: &str, sample: UsageSample) -> UsageRecord {
        let ts = sample.timestamp.unwrap_or_else(Utc::now);
        let record = UsageRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            period: period_of(ts),
            usage: UsageTotals::new(
                sample.requests,
                sample.orders,
                sample.gmv,
                sample.bytes_consumed,
            ),
            created_at: ts,
            metadata: sample.metadata,
        };

        match self.raw_events.put(record.clone()) {
            Ok(()) => {
                metrics::counter!("metering.raw_events_recorded").increment(1);
                debug!(tenant_id = %tenant_id, period = %record.period, "Usage event recorded");
            }
            Err(e) => {
                metrics::counter!("metering.store_errors", "collection" => "raw").increment(1);
                warn!(tenant_id = %tenant_id, error = %e, "Dropping usage event, store unavailable");
            }
        }
        record
    }

    /// Per-request helper: one event whose `bytes` is the request body size.
    pub fn record_api_call(
        &self,
        tenant_id: &str,
        body: &str,
        requests: u64,
        orders: u64,
        gmv: f64,
    ) -> UsageRecord {
        self.record_usage(
            tenant_id,
            UsageSample {
                requests,
                orders,
                gmv,
                bytes_consumed: body.len() as u64,
                ..Default::default()
            },
        )
    }

    /// Raw events, optionally restricted to one period, in insertion order.
    pub fn get_raw_events(&self, period: Option<&str>) -> Vec<UsageRecord> {
        scan_period(&self.raw_events, period, "raw")
    }

    pub fn append_aggregate(&self, record: UsageRecord) {
        if let Err(e) = self.aggregates.put(record.clone()) {
            metrics::counter!("metering.store_errors", "collection" => "aggregate").increment(1);
            warn!(
                tenant_id = %record.tenant_id,
                period = %record.period,
                error = %e,
                "Dropping aggregate, store unavailable"
            );
        }
    }

    /// Every stored aggregate row, including superseded re-runs.
    pub fn get_aggregates(&self, period: Option<&str>) -> Vec<UsageRecord> {
        scan_period(&self.aggregates, period, "aggregate")
    }

    /// One aggregate per (tenant, period): the most recently created row.
    pub fn latest_aggregates(&self, period: Option<&str>) -> Vec<UsageRecord> {
        latest_per_key(self.get_aggregates(period))
    }
}

fn scan_period(repo: &UsageRepository, period: Option<&str>, collection: &str) -> Vec<UsageRecord> {
    let result = match period {
        Some(p) => repo.scan(&|r: &UsageRecord| r.period == p),
        None => repo.scan(&|_| true),
    };
    result.unwrap_or_else(|e| {
        metrics::counter!("metering.store_errors", "collection" => collection.to_string())
            .increment(1);
        warn!(collection, error = %e, "Usage scan failed, treating as empty");
        Vec::new()
    })
}

/// Keeps the last-created row for each (tenant, period); on equal
/// timestamps the later row in store order wins.
fn latest_per_key(rows: Vec<UsageRecord>) -> Vec<UsageRecord> {
    let mut chosen: HashMap<(String, String), usize> = HashMap::new();
    for (pos, row) in rows.iter().enumerate() {
        let key = (row.tenant_id.clone(), row.period.clone());
        let newer = match chosen.get(&key) {
            Some(&prev) => rows[prev].created_at <= row.created_at,
            None => true,
        };
        if newer {
            chosen.insert(key, pos);
        }
    }
    let mut keep: Vec<usize> = chosen.into_values().collect();
    keep.sort_unstable();
    keep.into_iter().map(|pos| rows[pos].clone()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
