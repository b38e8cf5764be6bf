//! Tariff catalogue with append-only version history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quota_core::{QuotaError, QuotaResult, UsageType};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::tariff::{ProcessingPeriod, QuotaTariff};

/// Storage boundary for tariffs, consumed by the aggregation engine.
pub trait TariffStore: Send + Sync {
    /// Tariffs of the usage type effective at `as_of`, most recent version first.
    /// An unknown usage-type code yields an empty list.
    fn find_tariffs_for_type(&self, usage_type_code: i32, as_of: DateTime<Utc>) -> QuotaResult<Vec<QuotaTariff>>;

    /// Validates and stores a new tariff as version 1.
    fn create_tariff(&self, tariff: QuotaTariff) -> QuotaResult<QuotaTariff>;

    /// Stores `replacement` as the next version of `old_id` and closes the
    /// old version's effective range. The old version is kept.
    fn supersede_tariff(&self, old_id: u64, replacement: QuotaTariff) -> QuotaResult<QuotaTariff>;

    /// Every version of the tariffs of the given usage types.
    fn list_tariffs(&self, usage_types: &[UsageType]) -> QuotaResult<Vec<QuotaTariff>>;

    /// The current (not superseded) version of a named tariff.
    fn find_by_name(&self, name: &str) -> QuotaResult<Option<QuotaTariff>>;

    /// Current MONTHLY tariffs executing on or before `day` of the month.
    fn list_monthly_due(&self, day: u32) -> QuotaResult<Vec<QuotaTariff>>;
}

/// Filters `tariffs` down to those of `usage_type` effective at `as_of`,
/// ordered by version descending, then most recently effective.
pub fn select_effective<'a>(
    tariffs: impl IntoIterator<Item = &'a QuotaTariff>,
    usage_type: UsageType,
    as_of: DateTime<Utc>,
) -> Vec<QuotaTariff> {
    let mut selected: Vec<QuotaTariff> = tariffs
        .into_iter()
        .filter(|t| t.usage_type() == Some(usage_type) && t.is_effective_at(as_of))
        .cloned()
        .collect();
    selected.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then(b.effective_on.cmp(&a.effective_on))
            .then(b.id.cmp(&a.id))
    });
    selected
}

/// In-memory tariff store backed by `DashMap`.
pub struct InMemoryTariffStore {
    tariffs: DashMap<u64, QuotaTariff>,
    next_id: AtomicU64,
}

impl Default for InMemoryTariffStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTariffStore {
    pub fn new() -> Self {
        Self {
            tariffs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn get(&self, id: u64) -> Option<QuotaTariff> {
        self.tariffs.get(&id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tariffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tariffs.is_empty()
    }

    fn insert_new(&self, mut tariff: QuotaTariff, version: u32) -> QuotaTariff {
        tariff.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tariff.uuid = Uuid::new_v4();
        tariff.version = version;
        tariff.removed = None;
        self.tariffs.insert(tariff.id, tariff.clone());
        tariff
    }

    fn current_named(&self, name: &str) -> Option<QuotaTariff> {
        self.tariffs
            .iter()
            .filter(|e| e.value().name == name && e.value().removed.is_none())
            .max_by_key(|e| e.value().version)
            .map(|e| e.value().clone())
    }
}

impl TariffStore for InMemoryTariffStore {
    fn find_tariffs_for_type(&self, usage_type_code: i32, as_of: DateTime<Utc>) -> QuotaResult<Vec<QuotaTariff>> {
        let Some(usage_type) = UsageType::from_code(usage_type_code) else {
            debug!(usage_type_code, "Unknown usage type; no tariffs to return");
            return Ok(Vec::new());
        };
        let all: Vec<QuotaTariff> = self.tariffs.iter().map(|e| e.value().clone()).collect();
        Ok(select_effective(&all, usage_type, as_of))
    }

    fn create_tariff(&self, tariff: QuotaTariff) -> QuotaResult<QuotaTariff> {
        tariff.validate()?;
        if self.current_named(&tariff.name).is_some() {
            return Err(QuotaError::Validation(format!(
                "a tariff named [{}] already exists",
                tariff.name
            )));
        }
        let stored = self.insert_new(tariff, 1);
        info!(tariff = %stored, "Created quota tariff");
        Ok(stored)
    }

    fn supersede_tariff(&self, old_id: u64, mut replacement: QuotaTariff) -> QuotaResult<QuotaTariff> {
        let mut old = self
            .tariffs
            .get_mut(&old_id)
            .ok_or_else(|| QuotaError::Validation(format!("tariff [{}] does not exist", old_id)))?;

        if old.removed.is_some() {
            return Err(QuotaError::Validation(format!(
                "tariff [{}] was already superseded",
                old_id
            )));
        }
        if replacement.usage_type() != old.usage_type() {
            return Err(QuotaError::Validation(format!(
                "the usage type of tariff [{}] cannot be changed",
                old.name
            )));
        }
        if replacement.effective_on < old.effective_on {
            return Err(QuotaError::Validation(format!(
                "the new version of tariff [{}] must not take effect before [{}]",
                old.name, old.effective_on
            )));
        }
        replacement.name = old.name.clone();
        replacement.validate()?;

        let version = old.version + 1;
        let closes_at = replacement.effective_on;
        old.end_date = Some(old.end_date.map_or(closes_at, |end| end.min(closes_at)));
        old.removed = Some(Utc::now());
        drop(old);

        let stored = self.insert_new(replacement, version);
        info!(old_id, tariff = %stored, "Superseded quota tariff");
        Ok(stored)
    }

    fn list_tariffs(&self, usage_types: &[UsageType]) -> QuotaResult<Vec<QuotaTariff>> {
        let mut found: Vec<QuotaTariff> = self
            .tariffs
            .iter()
            .filter(|e| {
                e.value()
                    .usage_type()
                    .is_some_and(|t| usage_types.contains(&t))
            })
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    fn find_by_name(&self, name: &str) -> QuotaResult<Option<QuotaTariff>> {
        Ok(self.current_named(name))
    }

    fn list_monthly_due(&self, day: u32) -> QuotaResult<Vec<QuotaTariff>> {
        let mut due: Vec<QuotaTariff> = self
            .tariffs
            .iter()
            .filter(|e| {
                let t = e.value();
                t.removed.is_none()
                    && t.processing_period() == ProcessingPeriod::Monthly
                    && t.execute_on().is_some_and(|d| u32::from(d) <= day)
            })
            .map(|e| e.value().clone())
            .collect();
        due.sort_by_key(|t| t.id);
        Ok(due)
    }
}
