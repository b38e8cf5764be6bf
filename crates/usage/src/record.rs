use chrono::{DateTime, Utc};
use quota_core::UsageType;
use serde::{Deserialize, Serialize};

/// A normalized usage line, produced by a parser for one reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Assigned by the store on persist.
    #[serde(default)]
    pub id: u64,
    pub zone_id: u64,
    pub account_id: u64,
    pub domain_id: u64,
    pub description: String,
    /// Human readable usage, e.g. `"1.000000 Hrs"`.
    pub usage_display: String,
    pub usage_type: UsageType,
    /// Usage in the unit the type is metered in (hours for interval types).
    pub raw_usage: f64,
    pub vm_id: Option<u64>,
    pub offering_id: Option<u64>,
    pub resource_id: Option<u64>,
    pub size: Option<u64>,
    pub virtual_size: Option<u64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl UsageRecord {
    /// Key under which a re-parsed line replaces an earlier one.
    pub fn natural_key(&self) -> (UsageType, u64, Option<u64>, i64, i64) {
        (
            self.usage_type,
            self.account_id,
            self.resource_id,
            self.start_date.timestamp_millis(),
            self.end_date.timestamp_millis(),
        )
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_date <= end && self.end_date >= start
    }

    /// Whether the line belongs to the window `[start, end)`. Contiguous
    /// windows share their boundary, so each line belongs to exactly one.
    pub fn starts_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_date >= start && self.start_date < end
    }
}

impl std::fmt::Display for UsageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{\"id\":{},\"usageType\":\"{}\",\"accountId\":{},\"rawUsage\":{},\"startDate\":\"{}\",\"endDate\":\"{}\"}}",
            self.id,
            self.usage_type,
            self.account_id,
            self.raw_usage,
            self.start_date.to_rfc3339(),
            self.end_date.to_rfc3339()
        )
    }
}
