//! Raw usage intervals as written by the resource event listeners.

use chrono::{DateTime, Utc};
use quota_core::UsageType;
use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: f64 = 1000.0 * 60.0 * 60.0;

/// Lifetime of one metered resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageInterval {
    /// Assigned by the store on insert.
    #[serde(default)]
    pub id: u64,
    pub resource_id: u64,
    pub usage_type: UsageType,
    pub account_id: u64,
    pub domain_id: u64,
    pub zone_id: u64,
    pub offering_id: Option<u64>,
    pub vm_id: Option<u64>,
    /// Quantity metered for the resource (bytes for storage types).
    pub size: u64,
    #[serde(default)]
    pub protected_size: u64,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl UsageInterval {
    pub fn new(
        resource_id: u64,
        usage_type: UsageType,
        account_id: u64,
        domain_id: u64,
        zone_id: u64,
        size: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            resource_id,
            usage_type,
            account_id,
            domain_id,
            zone_id,
            offering_id: None,
            vm_id: None,
            size,
            protected_size: 0,
            created_at,
            removed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Whether any instant of the interval falls inside `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.created_at <= end && self.removed_at.map_or(true, |removed| removed >= start)
    }

    /// Billable hours of a closed interval, counting the boundary instant.
    /// `None` while the resource is still active or when the interval is inverted.
    pub fn duration_hours(&self) -> Option<f64> {
        let removed = self.removed_at?;
        let millis = (removed - self.created_at).num_milliseconds() + 1;
        (millis > 0).then(|| millis as f64 / MILLIS_PER_HOUR)
    }
}
