//! Usage parsers: turn raw usage intervals into normalized usage records
//! for one reporting window.

use chrono::{DateTime, Utc};
use quota_core::{Account, QuotaError, QuotaResult, UsageType};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::interval::UsageInterval;
use crate::record::UsageRecord;
use crate::store::UsageStore;

const MILLIS_PER_HOUR: f64 = 1000.0 * 60.0 * 60.0;

/// Result of parsing one usage type for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseOutcome {
    pub usage_type: UsageType,
    pub parsed: usize,
    pub skipped: usize,
}

/// Converts one usage type's raw intervals into normalized records.
pub trait UsageParser: Send + Sync {
    fn usage_type(&self) -> UsageType;

    fn parse(
        &self,
        account: &Account,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<ParseOutcome>;
}

/// An interval clipped to a reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub hours: f64,
}

/// Clips `[created, removed]` to `[start, end]` and measures it in hours.
///
/// The duration counts the boundary instant: `removed - created + 1` ms.
pub fn clip_interval(
    created: DateTime<Utc>,
    removed: Option<DateTime<Utc>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QuotaResult<ClippedInterval> {
    let clipped_start = created.max(start);
    let clipped_end = match removed {
        Some(removed) if removed <= end => removed,
        _ => end,
    };

    if clipped_end < clipped_start {
        return Err(QuotaError::DataGap(format!(
            "interval ends at [{}] before it starts at [{}]",
            clipped_end, clipped_start
        )));
    }

    let millis = (clipped_end - clipped_start).num_milliseconds() + 1;
    Ok(ClippedInterval {
        start: clipped_start,
        end: clipped_end,
        hours: millis as f64 / MILLIS_PER_HOUR,
    })
}

/// Display form of a usage in hours, six decimal places.
pub fn format_usage_hours(hours: f64) -> String {
    format!("{:.6} Hrs", hours)
}

type Describe = fn(&UsageInterval) -> String;

fn describe_backup_object(interval: &UsageInterval) -> String {
    format!(
        "Backup object usage for backup with ID: {}, backup offering: {}, and VM: {}",
        interval.resource_id,
        display_id(interval.offering_id),
        display_id(interval.vm_id)
    )
}

fn describe_volume(interval: &UsageInterval) -> String {
    format!(
        "Volume Id: {} usage time (Disk offering: {})",
        interval.resource_id,
        display_id(interval.offering_id)
    )
}

fn display_id(id: Option<u64>) -> String {
    id.map_or_else(|| "none".to_string(), |id| id.to_string())
}

/// Parser for any usage type metered as resource lifetime intervals.
pub struct IntervalUsageParser {
    store: Arc<dyn UsageStore>,
    usage_type: UsageType,
    describe: Describe,
    clamp_to_now: bool,
}

impl IntervalUsageParser {
    /// Backup objects: size and protected size of each backup.
    pub fn backup_objects(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            usage_type: UsageType::BackupObject,
            describe: describe_backup_object,
            clamp_to_now: true,
        }
    }

    /// Allocated volumes.
    pub fn volumes(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            usage_type: UsageType::Volume,
            describe: describe_volume,
            clamp_to_now: true,
        }
    }

    /// Keep windows ending in the future as they are instead of ending them now.
    pub fn without_clamp(mut self) -> Self {
        self.clamp_to_now = false;
        self
    }

    fn to_record(&self, account: &Account, interval: &UsageInterval, clipped: ClippedInterval) -> UsageRecord {
        UsageRecord {
            id: 0,
            zone_id: interval.zone_id,
            account_id: account.id,
            domain_id: account.domain_id,
            description: (self.describe)(interval),
            usage_display: format_usage_hours(clipped.hours),
            usage_type: self.usage_type,
            raw_usage: clipped.hours,
            vm_id: interval.vm_id,
            offering_id: interval.offering_id,
            resource_id: Some(interval.resource_id),
            size: Some(interval.size),
            virtual_size: (interval.protected_size > 0).then_some(interval.protected_size),
            start_date: clipped.start,
            end_date: clipped.end,
        }
    }
}

impl UsageParser for IntervalUsageParser {
    fn usage_type(&self) -> UsageType {
        self.usage_type
    }

    fn parse(
        &self,
        account: &Account,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<ParseOutcome> {
        debug!(account = %account, usage_type = %self.usage_type, "Parsing usage intervals");

        let now = Utc::now();
        let end = if self.clamp_to_now && end > now { now } else { end };

        let intervals = self
            .store
            .list_records(account.id, self.usage_type, start, end)?;

        let mut outcome = ParseOutcome {
            usage_type: self.usage_type,
            parsed: 0,
            skipped: 0,
        };

        if intervals.is_empty() {
            debug!(
                account = %account,
                usage_type = %self.usage_type,
                %start,
                %end,
                "No usage intervals for account in period"
            );
            return Ok(outcome);
        }

        for interval in &intervals {
            let clipped = match clip_interval(interval.created_at, interval.removed_at, start, end) {
                Ok(clipped) => clipped,
                Err(e) => {
                    warn!(
                        interval_id = interval.id,
                        resource_id = interval.resource_id,
                        error = %e,
                        "Skipping usage interval"
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };

            let record = self.to_record(account, interval, clipped);
            self.store.persist(record)?;
            outcome.parsed += 1;
        }

        metrics::counter!("usage.lines_parsed").increment(outcome.parsed as u64);
        debug!(
            account = %account,
            usage_type = %self.usage_type,
            parsed = outcome.parsed,
            skipped = outcome.skipped,
            "Finished parsing usage intervals"
        );

        Ok(outcome)
    }
}

/// Runs every registered parser for an account.
#[derive(Default)]
pub struct UsageParsing {
    parsers: Vec<Box<dyn UsageParser>>,
}

impl UsageParsing {
    pub fn new() -> Self {
        Self::default()
    }

    /// The parsers shipped with the usage server.
    pub fn with_defaults(store: Arc<dyn UsageStore>, clamp_to_now: bool) -> Self {
        let mut backups = IntervalUsageParser::backup_objects(store.clone());
        let mut volumes = IntervalUsageParser::volumes(store);
        if !clamp_to_now {
            backups = backups.without_clamp();
            volumes = volumes.without_clamp();
        }
        Self::new().register(Box::new(backups)).register(Box::new(volumes))
    }

    pub fn register(mut self, parser: Box<dyn UsageParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn parse_account(
        &self,
        account: &Account,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<Vec<ParseOutcome>> {
        self.parsers
            .iter()
            .map(|parser| parser.parse(account, start, end))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUsageStore;
    use chrono::{Duration, TimeZone};
    use quota_core::AccountType;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn account() -> Account {
        Account::new(10, "admin", AccountType::Normal, 1)
    }

    fn backup_object(created: DateTime<Utc>, removed: Option<DateTime<Utc>>) -> UsageInterval {
        let mut interval = UsageInterval::new(42, UsageType::BackupObject, 10, 1, 3, 100, created);
        interval.protected_size = 50;
        interval.offering_id = Some(8);
        interval.vm_id = Some(9);
        interval.removed_at = removed;
        interval
    }

    #[test]
    fn test_clip_inside_window() {
        let created = t0() + Duration::minutes(10);
        let removed = created + Duration::minutes(90);
        let clipped = clip_interval(created, Some(removed), t0(), t0() + Duration::days(1)).unwrap();
        assert_eq!(clipped.start, created);
        assert_eq!(clipped.end, removed);
        assert!((clipped.hours - 5_400_001.0 / 3_600_000.0).abs() < 1e-12);
    }

    #[test]
    fn test_clip_to_window_bounds() {
        let start = t0();
        let end = t0() + Duration::hours(4);

        let early = clip_interval(start - Duration::hours(5), Some(start + Duration::hours(1)), start, end).unwrap();
        assert_eq!(early.start, start);

        let open = clip_interval(start + Duration::hours(1), None, start, end).unwrap();
        assert_eq!(open.end, end);

        let late = clip_interval(start, Some(end + Duration::hours(3)), start, end).unwrap();
        assert_eq!(late.end, end);
        assert_eq!(format_usage_hours(late.hours), "4.000000 Hrs");
    }

    #[test]
    fn test_inverted_interval_is_a_data_gap() {
        let result = clip_interval(t0(), Some(t0() - Duration::hours(1)), t0() - Duration::days(1), t0());
        assert!(matches!(result, Err(QuotaError::DataGap(_))));
    }

    #[test]
    fn test_backup_object_line() {
        let store = Arc::new(InMemoryUsageStore::new());
        store
            .record_interval(backup_object(t0(), Some(t0() + Duration::milliseconds(3_600_000))))
            .unwrap();

        let parser = IntervalUsageParser::backup_objects(store.clone());
        let outcome = parser
            .parse(&account(), t0(), t0() + Duration::milliseconds(7_200_000))
            .unwrap();
        assert_eq!(outcome.parsed, 1);

        let lines = store.list_usage(10, t0(), t0() + Duration::hours(2)).unwrap();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.usage_type, UsageType::BackupObject);
        assert_eq!(line.usage_display, "1.000000 Hrs");
        assert_eq!(line.size, Some(100));
        assert_eq!(line.virtual_size, Some(50));
        assert_eq!(line.zone_id, 3);
        assert_eq!(
            line.description,
            "Backup object usage for backup with ID: 42, backup offering: 8, and VM: 9"
        );
    }

    #[test]
    fn test_empty_window_is_success() {
        let store = Arc::new(InMemoryUsageStore::new());
        let parser = IntervalUsageParser::volumes(store.clone());
        let outcome = parser.parse(&account(), t0(), t0() + Duration::hours(1)).unwrap();
        assert_eq!(outcome.parsed, 0);
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_future_end_is_clamped_to_now() {
        let store = Arc::new(InMemoryUsageStore::new());
        let created = Utc::now() - Duration::hours(1);
        let mut interval = UsageInterval::new(1, UsageType::Volume, 10, 1, 1, 1 << 30, created);
        interval.offering_id = Some(2);
        store.record_interval(interval).unwrap();

        let parser = IntervalUsageParser::volumes(store.clone());
        parser
            .parse(&account(), created, Utc::now() + Duration::days(10))
            .unwrap();

        let lines = store
            .list_usage(10, created, Utc::now() + Duration::days(10))
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].raw_usage < 1.1);
    }

    #[test]
    fn test_parsing_runs_all_parsers() {
        let store = Arc::new(InMemoryUsageStore::new());
        store
            .record_interval(backup_object(t0(), Some(t0() + Duration::hours(1))))
            .unwrap();
        let volume = UsageInterval::new(5, UsageType::Volume, 10, 1, 1, 1 << 30, t0());
        store.record_interval(volume).unwrap();

        let parsing = UsageParsing::with_defaults(store.clone(), false);
        let outcomes = parsing
            .parse_account(&account(), t0(), t0() + Duration::hours(2))
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.parsed == 1));
        assert_eq!(store.record_count(), 2);
    }
}
