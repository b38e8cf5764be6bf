//! Output boundary for finalized periods.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quota_core::{QuotaError, QuotaResult, UsageType};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::engine::FinalizedPeriod;

/// Persists finalized periods, keyed by account and period.
pub trait BillingRecordWriter: Send + Sync {
    /// Stores `period`, replacing an earlier write for the same account and window.
    fn write(&self, period: &FinalizedPeriod) -> QuotaResult<()>;
}

/// Quota used by one account, per usage type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatement {
    pub account_id: u64,
    pub periods: usize,
    pub by_usage_type: BTreeMap<UsageType, Decimal>,
    pub total: Decimal,
}

type PeriodKey = (u64, DateTime<Utc>, DateTime<Utc>);

#[derive(Default)]
pub struct InMemoryBillingWriter {
    periods: DashMap<PeriodKey, FinalizedPeriod>,
}

impl InMemoryBillingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: u64, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<FinalizedPeriod> {
        self.periods
            .get(&(account_id, start, end))
            .map(|p| p.value().clone())
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn statement(&self, account_id: u64) -> QuotaResult<QuotaStatement> {
        let overflow = || QuotaError::Validation(format!("quota statement of account [{}] overflows", account_id));
        let mut by_usage_type: BTreeMap<UsageType, Decimal> = BTreeMap::new();
        let mut periods = 0;
        let mut total = Decimal::ZERO;
        for entry in self.periods.iter().filter(|e| e.key().0 == account_id) {
            periods += 1;
            for line in &entry.value().lines {
                let used = by_usage_type.entry(line.usage_type).or_insert(Decimal::ZERO);
                *used = used.checked_add(line.quota_used).ok_or_else(overflow)?;
                total = total.checked_add(line.quota_used).ok_or_else(overflow)?;
            }
        }
        Ok(QuotaStatement {
            account_id,
            periods,
            by_usage_type,
            total,
        })
    }
}

impl BillingRecordWriter for InMemoryBillingWriter {
    fn write(&self, period: &FinalizedPeriod) -> QuotaResult<()> {
        let key = (period.account_id, period.start, period.end);
        let replaced = self.periods.insert(key, period.clone()).is_some();
        info!(
            account_id = period.account_id,
            lines = period.lines.len(),
            total = %period.total_quota_used,
            replaced,
            "Wrote quota period"
        );
        Ok(())
    }
}
