//! Usage record store. Raw intervals go in, normalized usage lines come out.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quota_core::{QuotaError, QuotaResult, UsageType};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::interval::UsageInterval;
use crate::record::UsageRecord;

type RecordKey = (UsageType, u64, Option<u64>, i64, i64);

/// Storage boundary consumed by the parsers and the rating engine.
pub trait UsageStore: Send + Sync {
    /// Intervals of `usage_type` owned by the account that overlap `[start, end]`,
    /// ordered by creation time.
    fn list_records(
        &self,
        account_id: u64,
        usage_type: UsageType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<Vec<UsageInterval>>;

    /// Appends a raw interval and returns it with its id assigned.
    fn record_interval(&self, interval: UsageInterval) -> QuotaResult<UsageInterval>;

    /// Records the removal time of the active interval of a resource.
    fn mark_removed(
        &self,
        usage_type: UsageType,
        resource_id: u64,
        removed_at: DateTime<Utc>,
    ) -> QuotaResult<()>;

    /// Deletes every interval of the resource and returns how many were removed.
    fn remove_by_resource_id(&self, usage_type: UsageType, resource_id: u64) -> QuotaResult<usize>;

    /// Persists a normalized line. A line with the same usage type, account,
    /// resource and window replaces the earlier one and keeps its id.
    fn persist(&self, record: UsageRecord) -> QuotaResult<UsageRecord>;

    /// Normalized lines of the account overlapping `[start, end]`, chronologically.
    fn list_usage(
        &self,
        account_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<Vec<UsageRecord>>;
}

/// In-memory usage store backed by `DashMap`.
pub struct InMemoryUsageStore {
    intervals: DashMap<u64, UsageInterval>,
    records: DashMap<u64, UsageRecord>,
    record_index: DashMap<RecordKey, u64>,
    next_interval_id: AtomicU64,
    next_record_id: AtomicU64,
}

impl Default for InMemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self {
            intervals: DashMap::new(),
            records: DashMap::new(),
            record_index: DashMap::new(),
            next_interval_id: AtomicU64::new(1),
            next_record_id: AtomicU64::new(1),
        }
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl UsageStore for InMemoryUsageStore {
    fn list_records(
        &self,
        account_id: u64,
        usage_type: UsageType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<Vec<UsageInterval>> {
        let mut found: Vec<UsageInterval> = self
            .intervals
            .iter()
            .filter(|e| {
                let i = e.value();
                i.account_id == account_id && i.usage_type == usage_type && i.overlaps(start, end)
            })
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|i| (i.created_at, i.id));
        Ok(found)
    }

    fn record_interval(&self, mut interval: UsageInterval) -> QuotaResult<UsageInterval> {
        if let Some(removed) = interval.removed_at {
            if removed < interval.created_at {
                return Err(QuotaError::Validation(format!(
                    "usage interval of resource [{}] is removed at [{}] before its creation at [{}]",
                    interval.resource_id, removed, interval.created_at
                )));
            }
        }
        interval.id = self.next_interval_id.fetch_add(1, Ordering::SeqCst);
        trace!(interval_id = interval.id, resource_id = interval.resource_id, "Recording usage interval");
        self.intervals.insert(interval.id, interval.clone());
        Ok(interval)
    }

    fn mark_removed(
        &self,
        usage_type: UsageType,
        resource_id: u64,
        removed_at: DateTime<Utc>,
    ) -> QuotaResult<()> {
        let mut seen = false;
        for mut entry in self.intervals.iter_mut() {
            let interval = entry.value_mut();
            if interval.usage_type != usage_type || interval.resource_id != resource_id {
                continue;
            }
            seen = true;
            if interval.removed_at.is_some() {
                continue;
            }
            if removed_at < interval.created_at {
                return Err(QuotaError::Validation(format!(
                    "removal at [{}] precedes creation at [{}] for resource [{}]",
                    removed_at, interval.created_at, resource_id
                )));
            }
            interval.removed_at = Some(removed_at);
            debug!(resource_id, %usage_type, %removed_at, "Recorded resource removal");
            return Ok(());
        }

        let reason = if seen { "is already removed" } else { "has no usage interval" };
        Err(QuotaError::Validation(format!(
            "resource [{}] of type [{}] {}",
            resource_id, usage_type, reason
        )))
    }

    fn remove_by_resource_id(&self, usage_type: UsageType, resource_id: u64) -> QuotaResult<usize> {
        let before = self.intervals.len();
        self.intervals
            .retain(|_, i| !(i.usage_type == usage_type && i.resource_id == resource_id));
        let removed = before - self.intervals.len();
        trace!(resource_id, removed, "Deleted usage intervals of resource");
        Ok(removed)
    }

    fn persist(&self, mut record: UsageRecord) -> QuotaResult<UsageRecord> {
        let key = record.natural_key();
        let id = *self
            .record_index
            .entry(key)
            .or_insert_with(|| self.next_record_id.fetch_add(1, Ordering::SeqCst));
        record.id = id;
        self.records.insert(id, record.clone());
        Ok(record)
    }

    fn list_usage(
        &self,
        account_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<Vec<UsageRecord>> {
        let mut found: Vec<UsageRecord> = self
            .records
            .iter()
            .filter(|e| e.value().account_id == account_id && e.value().overlaps(start, end))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|r| (r.start_date, r.id));
        Ok(found)
    }
}
