//! Quota aggregation engine.
//!
//! One `PeriodAggregation` per (account, period) moves through
//! `Pending -> Accumulating -> Finalized`. Usage records and tariff history
//! are fetched once up front; records are then rated in chronological
//! order so rules can read the running totals of the period.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use quota_core::{Account, QuotaError, QuotaResult, UsageType};
use quota_usage::{UsageRecord, UsageStore};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::preset::{AppliedTariff, InventoryLookup, PresetVariableBuilder, ProcessedData};
use crate::rule::{EvaluationContext, RuleEvaluator};
use crate::tariff::{ProcessingPeriod, QuotaTariff};
use crate::tariff_store::{select_effective, TariffStore};
use crate::units;
use crate::writer::BillingRecordWriter;

// ---------------------------------------------------------------------------
// Period state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodState {
    Pending,
    Accumulating,
    Finalized,
}

/// Quota charged by one tariff for one usage line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaUsageDetail {
    pub tariff_id: u64,
    pub tariff_value: Decimal,
    pub quota_used: Decimal,
}

/// Billed quota for one usage record, or for a monthly batch of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaUsageLine {
    pub account_id: u64,
    pub domain_id: u64,
    pub zone_id: u64,
    /// `None` for lines billed by a MONTHLY tariff over several records.
    pub usage_record_id: Option<u64>,
    pub usage_type: UsageType,
    pub quota_used: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub details: Vec<QuotaUsageDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub usage_record_id: u64,
    pub reason: String,
}

/// Immutable outcome of one period, handed to the billing writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedPeriod {
    pub account_id: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub processed: ProcessedData,
    pub lines: Vec<QuotaUsageLine>,
    pub skipped: Vec<SkippedRecord>,
    pub total_quota_used: Decimal,
}

/// Mutable aggregate of one account's period.
#[derive(Debug)]
pub struct PeriodAggregation {
    account_id: u64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    state: PeriodState,
    processed: ProcessedData,
    lines: Vec<QuotaUsageLine>,
    skipped: Vec<SkippedRecord>,
    total_quota_used: Decimal,
}

impl PeriodAggregation {
    pub fn new(account_id: u64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            account_id,
            start,
            end,
            state: PeriodState::Pending,
            processed: ProcessedData::default(),
            lines: Vec::new(),
            skipped: Vec::new(),
            total_quota_used: Decimal::ZERO,
        }
    }

    pub fn state(&self) -> PeriodState {
        self.state
    }

    pub fn processed(&self) -> &ProcessedData {
        &self.processed
    }

    fn expect_state(&self, expected: PeriodState, action: &str) -> QuotaResult<()> {
        if self.state != expected {
            return Err(QuotaError::InvalidState(format!(
                "cannot {} period of account [{}] in state {:?}",
                action, self.account_id, self.state
            )));
        }
        Ok(())
    }

    pub fn begin(&mut self) -> QuotaResult<()> {
        self.expect_state(PeriodState::Pending, "begin")?;
        if self.end < self.start {
            return Err(QuotaError::Validation(format!(
                "period end [{}] is before its start [{}]",
                self.end, self.start
            )));
        }
        self.processed = ProcessedData::new(self.start, self.end);
        self.state = PeriodState::Accumulating;
        Ok(())
    }

    /// Adds `usage` to the period and charges every applied tariff for
    /// `charged` units.
    pub fn accumulate(&mut self, usage: f64, charged: f64, applied: &[AppliedTariff]) -> QuotaResult<()> {
        self.charge(usage, charged, applied, None)
    }

    pub fn add_line(&mut self, line: QuotaUsageLine) -> QuotaResult<()> {
        self.expect_state(PeriodState::Accumulating, "bill")?;
        self.total_quota_used = self.checked_total(&line)?;
        self.lines.push(line);
        Ok(())
    }

    /// `accumulate` and `add_line` for one record. Nothing is applied unless
    /// every sum fits.
    pub fn charge(
        &mut self,
        usage: f64,
        charged: f64,
        applied: &[AppliedTariff],
        line: Option<QuotaUsageLine>,
    ) -> QuotaResult<()> {
        self.expect_state(PeriodState::Accumulating, "accumulate")?;
        let amount = units::decimal_from_f64(charged)?;
        let total = match &line {
            Some(line) => self.checked_total(line)?,
            None => self.total_quota_used,
        };

        let mut aggregated = self.processed.aggregated_tariffs_value();
        for tariff in applied {
            aggregated = tariff
                .value
                .checked_mul(amount)
                .and_then(|charge| aggregated.checked_add(charge))
                .ok_or_else(|| QuotaError::Validation(format!("charge of tariff [{}] overflows", tariff.id)))?;
        }
        for tariff in applied {
            self.processed.push_tariff(tariff.clone());
        }
        self.processed.set_aggregated_tariffs_value(aggregated);
        self.processed.add_usage_value(usage);
        if let Some(line) = line {
            self.lines.push(line);
        }
        self.total_quota_used = total;
        Ok(())
    }

    fn checked_total(&self, line: &QuotaUsageLine) -> QuotaResult<Decimal> {
        self.total_quota_used.checked_add(line.quota_used).ok_or_else(|| {
            QuotaError::Validation(format!(
                "quota used by account [{}] overflows at line [{}]",
                self.account_id, line.quota_used
            ))
        })
    }

    pub fn skip(&mut self, usage_record_id: u64, reason: impl Into<String>) -> QuotaResult<()> {
        self.expect_state(PeriodState::Accumulating, "skip a record of")?;
        self.skipped.push(SkippedRecord {
            usage_record_id,
            reason: reason.into(),
        });
        Ok(())
    }

    pub fn finalize(mut self) -> QuotaResult<FinalizedPeriod> {
        self.expect_state(PeriodState::Accumulating, "finalize")?;
        self.state = PeriodState::Finalized;
        Ok(FinalizedPeriod {
            account_id: self.account_id,
            start: self.start,
            end: self.end,
            processed: self.processed,
            lines: self.lines,
            skipped: self.skipped,
            total_quota_used: self.total_quota_used,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One execution of the MONTHLY tariffs of a usage type on their `executeOn`
/// day. The billing cycle is `[cycle_start, execute_at)`, one month long.
#[derive(Debug)]
struct MonthlyRun {
    usage_type: UsageType,
    day: u8,
    cycle_start: DateTime<Utc>,
    execute_at: DateTime<Utc>,
    records: Vec<UsageRecord>,
}

pub struct QuotaAggregationEngine {
    usage: Arc<dyn UsageStore>,
    tariffs: Arc<dyn TariffStore>,
    presets: PresetVariableBuilder,
    rules: Arc<RuleEvaluator>,
    writer: Arc<dyn BillingRecordWriter>,
}

impl QuotaAggregationEngine {
    pub fn new(
        usage: Arc<dyn UsageStore>,
        tariffs: Arc<dyn TariffStore>,
        inventory: Arc<dyn InventoryLookup>,
        rules: Arc<RuleEvaluator>,
        writer: Arc<dyn BillingRecordWriter>,
    ) -> Self {
        Self {
            usage,
            tariffs,
            presets: PresetVariableBuilder::new(inventory),
            rules,
            writer,
        }
    }

    /// Rates the account's usage lines starting in `[start, end)` without
    /// writing anything. MONTHLY tariffs whose `executeOn` instant falls in
    /// the window bill the whole cycle ending at that instant.
    pub fn compute_period(
        &self,
        account: &Account,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<FinalizedPeriod> {
        self.compute_period_until(account, start, end, &AtomicBool::new(false))
    }

    /// Like `compute_period`, stopping with `Cancelled` once `cancel` is set.
    pub fn compute_period_until(
        &self,
        account: &Account,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> QuotaResult<FinalizedPeriod> {
        let mut period = PeriodAggregation::new(account.id, start, end);

        if !account.quota_enabled {
            info!(account = %account, "Quota is disabled for the account; nothing to rate");
            period.begin()?;
            return period.finalize();
        }

        let records = self.usage_starting_within(account.id, start, end)?;

        let mut history: HashMap<UsageType, Vec<QuotaTariff>> = HashMap::new();
        for tariff in self.tariffs.list_tariffs(&UsageType::ALL)? {
            if let Some(usage_type) = tariff.usage_type() {
                history.entry(usage_type).or_default().push(tariff);
            }
        }
        let monthly = self.plan_monthly_runs(account.id, start, end, &history)?;

        debug!(
            account = %account,
            records = records.len(),
            monthly_runs = monthly.len(),
            tariffs = history.values().map(Vec::len).sum::<usize>(),
            "Aggregating quota period"
        );

        period.begin()?;

        for record in &records {
            check_cancelled(cancel, account)?;

            if record.end_date < record.start_date {
                warn!(record = %record, "Usage record ends before it starts; skipping it");
                metrics::counter!("quota.records_skipped").increment(1);
                period.skip(record.id, "record ends before it starts")?;
                continue;
            }

            let type_history = history.get(&record.usage_type).map(Vec::as_slice).unwrap_or(&[]);
            let tariffs: Vec<QuotaTariff> = latest_per_name(
                select_effective(type_history, record.usage_type, record.start_date)
                    .into_iter()
                    .filter(|t| t.processing_period() == ProcessingPeriod::ByEntry)
                    .collect(),
            );

            match self.rate(account, record, Some(record.id), record.raw_usage, &tariffs, &mut period) {
                Ok(()) => metrics::counter!("quota.records_rated").increment(1),
                Err(QuotaError::Validation(reason)) => {
                    warn!(record = %record, reason = %reason, "Usage record could not be rated; skipping it");
                    metrics::counter!("quota.records_skipped").increment(1);
                    period.skip(record.id, reason)?;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        for run in &monthly {
            check_cancelled(cancel, account)?;
            match self.rate_monthly(account, run, &history, &mut period) {
                Ok(()) => {}
                Err(QuotaError::Validation(reason)) => {
                    warn!(
                        account = %account,
                        usage_type = %run.usage_type,
                        execute_at = %run.execute_at,
                        reason = %reason,
                        "Monthly usage cycle could not be rated"
                    );
                    metrics::counter!("quota.records_skipped").increment(run.records.len() as u64);
                }
                Err(err) => return Err(err),
            }
        }

        let finalized = period.finalize()?;
        info!(
            account = %account,
            lines = finalized.lines.len(),
            skipped = finalized.skipped.len(),
            total = %finalized.total_quota_used,
            "Quota period finalized"
        );
        Ok(finalized)
    }

    /// Computes the period and commits it to the billing writer.
    pub fn aggregate_account(
        &self,
        account: &Account,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> QuotaResult<FinalizedPeriod> {
        let finalized = self.compute_period_until(account, start, end, cancel)?;
        self.writer.write(&finalized)?;
        Ok(finalized)
    }

    /// Evaluates `tariffs` for one record (or monthly batch), accumulates the
    /// applied ones and bills the line. `usage` is what the record adds to
    /// the period's usage value.
    fn rate(
        &self,
        account: &Account,
        record: &UsageRecord,
        usage_record_id: Option<u64>,
        usage: f64,
        tariffs: &[QuotaTariff],
        period: &mut PeriodAggregation,
    ) -> QuotaResult<()> {
        if tariffs.is_empty() {
            debug!(record = %record, "No tariff applies to the usage record; it is zero-rated");
            return period.accumulate(usage, record.raw_usage, &[]);
        }

        let context = if tariffs.iter().any(QuotaTariff::has_activation_rule) {
            let presets = self.presets.build(account, record, period.processed());
            Some(EvaluationContext::from_presets(&presets)?)
        } else {
            None
        };

        let hours_in_month = units::hours_in_month(record.start_date);
        let unit = record.usage_type.unit();
        let mut applied = Vec::new();
        let mut details = Vec::new();
        let mut tariffs_value = Decimal::ZERO;

        for tariff in tariffs {
            let value = match self.rules.tariff_value(tariff, context.as_ref()) {
                Ok(value) => value,
                Err(err) if err.is_recoverable() => {
                    warn!(tariff = %tariff, record = %record, error = %err, "Activation rule failed; tariff not applied");
                    metrics::counter!("quota.rule_failures").increment(1);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if value.is_zero() {
                continue;
            }

            details.push(QuotaUsageDetail {
                tariff_id: tariff.id,
                tariff_value: value,
                quota_used: units::quota_used(unit, record.raw_usage, record.size, value, hours_in_month)?,
            });
            applied.push(AppliedTariff {
                id: tariff.uuid.to_string(),
                value,
            });
            tariffs_value = tariffs_value
                .checked_add(value)
                .ok_or_else(|| QuotaError::Validation(format!("tariff values of record [{}] overflow", record.id)))?;
        }

        let quota_used = units::quota_used(unit, record.raw_usage, record.size, tariffs_value, hours_in_month)?;
        let line = (!applied.is_empty() && !quota_used.is_zero()).then(|| QuotaUsageLine {
            account_id: account.id,
            domain_id: record.domain_id,
            zone_id: record.zone_id,
            usage_record_id,
            usage_type: record.usage_type,
            quota_used,
            start_date: record.start_date,
            end_date: record.end_date,
            details,
        });
        period.charge(usage, record.raw_usage, &applied, line)
    }

    /// Usage lines of the account starting in `[start, end)`, chronologically.
    fn usage_starting_within(
        &self,
        account_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QuotaResult<Vec<UsageRecord>> {
        let mut records: Vec<UsageRecord> = self
            .usage
            .list_usage(account_id, start, end)?
            .into_iter()
            .filter(|r| r.starts_within(start, end))
            .collect();
        records.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Finds the MONTHLY executions due in `[start, end)` and loads the usage
    /// of each one's billing cycle up front.
    fn plan_monthly_runs(
        &self,
        account_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        history: &HashMap<UsageType, Vec<QuotaTariff>>,
    ) -> QuotaResult<Vec<MonthlyRun>> {
        let mut cycles: HashMap<(DateTime<Utc>, DateTime<Utc>), Vec<UsageRecord>> = HashMap::new();
        let mut runs = Vec::new();

        for (usage_type, tariffs) in history {
            let days: BTreeSet<u8> = tariffs
                .iter()
                .filter(|t| t.processing_period() == ProcessingPeriod::Monthly)
                .filter_map(QuotaTariff::execute_on)
                .collect();

            for day in days {
                for (cycle_start, execute_at) in monthly_executions(start, end, day) {
                    let cycle = match cycles.entry((cycle_start, execute_at)) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            entry.insert(self.usage_starting_within(account_id, cycle_start, execute_at)?)
                        }
                    };
                    let records: Vec<UsageRecord> = cycle
                        .iter()
                        .filter(|r| r.usage_type == *usage_type && r.end_date >= r.start_date)
                        .cloned()
                        .collect();
                    if records.is_empty() {
                        continue;
                    }
                    runs.push(MonthlyRun {
                        usage_type: *usage_type,
                        day,
                        cycle_start,
                        execute_at,
                        records,
                    });
                }
            }
        }

        runs.sort_by_key(|r| (r.execute_at, r.usage_type, r.day));
        Ok(runs)
    }

    fn rate_monthly(
        &self,
        account: &Account,
        run: &MonthlyRun,
        history: &HashMap<UsageType, Vec<QuotaTariff>>,
        period: &mut PeriodAggregation,
    ) -> QuotaResult<()> {
        let (Some(first), Some(last)) = (run.records.first(), run.records.last()) else {
            return Ok(());
        };

        let candidates = history
            .get(&run.usage_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(|t| {
                t.processing_period() == ProcessingPeriod::Monthly
                    && t.execute_on() == Some(run.day)
                    && t.overlaps_period(run.cycle_start, run.execute_at)
            });
        let due = latest_per_name(select_effective(candidates, run.usage_type, run.execute_at));
        if due.is_empty() {
            return Ok(());
        }

        let mut synthetic = first.clone();
        synthetic.id = 0;
        synthetic.resource_id = None;
        synthetic.raw_usage = run.records.iter().map(|r| r.raw_usage).sum();
        synthetic.size = run.records.iter().filter_map(|r| r.size).max();
        synthetic.start_date = first.start_date;
        synthetic.end_date = run.records.iter().map(|r| r.end_date).max().unwrap_or(last.end_date);
        synthetic.description = format!(
            "Monthly {} usage of {} records from {} to {}",
            run.usage_type,
            run.records.len(),
            run.cycle_start.date_naive(),
            run.execute_at.date_naive()
        );

        info!(
            account = %account,
            usage_type = %run.usage_type,
            execute_at = %run.execute_at,
            records = run.records.len(),
            tariffs = due.len(),
            "Rating monthly usage cycle"
        );
        // Usage of the cycle was counted record by record in its own periods.
        self.rate(account, &synthetic, None, 0.0, &due, period)
    }
}

/// `executeOn` instants of `day` inside `[start, end)`, each paired with the
/// start of the cycle it closes (the same day one month earlier).
fn monthly_executions(start: DateTime<Utc>, end: DateTime<Utc>, day: u8) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut executions = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());
    while (year, month) <= (end.year(), end.month()) {
        let (prev_year, prev_month) = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
        let execute_at = Utc.with_ymd_and_hms(year, month, u32::from(day), 0, 0, 0).single();
        let cycle_start = Utc
            .with_ymd_and_hms(prev_year, prev_month, u32::from(day), 0, 0, 0)
            .single();
        if let (Some(cycle_start), Some(execute_at)) = (cycle_start, execute_at) {
            if execute_at >= start && execute_at < end {
                executions.push((cycle_start, execute_at));
            }
        }
        (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    }
    executions
}

fn check_cancelled(cancel: &AtomicBool, account: &Account) -> QuotaResult<()> {
    if cancel.load(Ordering::SeqCst) {
        warn!(account = %account, "Quota aggregation cancelled; period left uncommitted");
        return Err(QuotaError::Cancelled(format!("aggregation of account [{}]", account.id)));
    }
    Ok(())
}

/// Keeps the highest version of each tariff name.
fn latest_per_name(mut tariffs: Vec<QuotaTariff>) -> Vec<QuotaTariff> {
    tariffs.sort_by(|a, b| b.version.cmp(&a.version).then(b.effective_on.cmp(&a.effective_on)));
    let mut seen = HashSet::new();
    let mut kept: Vec<QuotaTariff> = tariffs
        .into_iter()
        .filter(|t| {
            if seen.insert(t.name.clone()) {
                true
            } else {
                warn!(tariff = %t, "Several versions of the tariff are effective; using the most recent one");
                false
            }
        })
        .collect();
    kept.sort_by_key(|t| t.id);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::Inventory;
    use crate::tariff_store::InMemoryTariffStore;
    use crate::writer::InMemoryBillingWriter;
    use chrono::Duration;
    use quota_core::AccountType;
    use quota_usage::InMemoryUsageStore;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn tariff(id: u64, name: &str, version: u32) -> QuotaTariff {
        let mut tariff = QuotaTariff::new(name, UsageType::Volume, dec!(1), t0());
        tariff.id = id;
        tariff.version = version;
        tariff
    }

    #[test]
    fn test_latest_per_name() {
        let kept = latest_per_name(vec![tariff(1, "a", 1), tariff(4, "b", 1), tariff(3, "a", 2)]);
        let ids: Vec<u64> = kept.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_overflowing_charge_leaves_period_untouched() {
        let mut period = PeriodAggregation::new(1, t0(), t0() + Duration::days(1));
        period.begin().unwrap();
        let applied = vec![
            AppliedTariff { id: "a".into(), value: dec!(1) },
            AppliedTariff { id: "b".into(), value: Decimal::MAX },
        ];
        assert!(matches!(period.accumulate(1.0, 2.0, &applied), Err(QuotaError::Validation(_))));
        assert!(period.processed().tariffs().is_empty());
        assert_eq!(period.processed().usage_value(), 0.0);
    }

    fn line(quota_used: Decimal) -> QuotaUsageLine {
        QuotaUsageLine {
            account_id: 1,
            domain_id: 1,
            zone_id: 1,
            usage_record_id: Some(1),
            usage_type: UsageType::Volume,
            quota_used,
            start_date: t0(),
            end_date: t0() + Duration::hours(1),
            details: Vec::new(),
        }
    }

    #[test]
    fn test_overflowing_line_keeps_running_total() {
        let mut period = PeriodAggregation::new(1, t0(), t0() + Duration::days(1));
        period.begin().unwrap();
        period.add_line(line(Decimal::MAX)).unwrap();

        let applied = vec![AppliedTariff { id: "a".into(), value: dec!(1) }];
        let err = period.charge(1.0, 1.0, &applied, Some(line(dec!(1)))).unwrap_err();
        assert!(matches!(err, QuotaError::Validation(_)));
        assert!(matches!(period.add_line(line(dec!(1))), Err(QuotaError::Validation(_))));
        assert!(period.processed().tariffs().is_empty());

        let finalized = period.finalize().unwrap();
        assert_eq!(finalized.lines.len(), 1);
        assert_eq!(finalized.total_quota_used, Decimal::MAX);
    }

    #[test]
    fn test_monthly_executions_close_one_month_cycles() {
        let day = |m: u32, d: u32| Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap();

        assert_eq!(monthly_executions(day(3, 1), day(4, 1), 10), vec![(day(2, 10), day(3, 10))]);
        assert_eq!(monthly_executions(day(3, 10), day(3, 11), 10), vec![(day(2, 10), day(3, 10))]);
        // The window end belongs to the next window.
        assert!(monthly_executions(day(3, 9), day(3, 10), 10).is_empty());
        assert!(monthly_executions(day(3, 11), day(3, 12), 10).is_empty());

        let january = monthly_executions(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), day(3, 1), 1);
        assert_eq!(
            january,
            vec![
                (Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(), day(1, 1)),
                (day(1, 1), day(2, 1)),
            ]
        );
    }

    #[test]
    fn test_unrateable_record_is_skipped() {
        let usage = Arc::new(InMemoryUsageStore::new());
        let tariffs = Arc::new(InMemoryTariffStore::new());
        tariffs
            .create_tariff(QuotaTariff::new("huge", UsageType::Volume, Decimal::MAX, t0()))
            .unwrap();
        let engine = QuotaAggregationEngine::new(
            usage.clone(),
            tariffs,
            Arc::new(Inventory::new()),
            Arc::new(RuleEvaluator::default()),
            Arc::new(InMemoryBillingWriter::new()),
        );

        let record = usage
            .persist(UsageRecord {
                id: 0,
                zone_id: 1,
                account_id: 1,
                domain_id: 1,
                description: "volume".into(),
                usage_display: "2.000000 Hrs".into(),
                usage_type: UsageType::Volume,
                raw_usage: 2.0,
                vm_id: None,
                offering_id: None,
                resource_id: Some(7),
                size: Some(1 << 40),
                virtual_size: None,
                start_date: t0(),
                end_date: t0() + Duration::hours(2),
            })
            .unwrap();

        let account = Account::new(1, "owner", AccountType::Normal, 1);
        let period = engine.compute_period(&account, t0(), t0() + Duration::days(1)).unwrap();
        assert_eq!(period.skipped.len(), 1);
        assert_eq!(period.skipped[0].usage_record_id, record.id);
        assert!(period.lines.is_empty());
    }
}
