//! Integration tests for the usage-to-quota flow: parse raw intervals,
//! rate the normalized records and commit the finalized period.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use quota_core::{Account, AccountType, QuotaError, QuotaResult, UsageType};
    use quota_rating::engine::PeriodAggregation;
    use quota_rating::preset::{DomainInfo, Inventory};
    use quota_rating::{
        BillingRecordWriter, FinalizedPeriod, InMemoryBillingWriter, InMemoryTariffStore, PeriodState, QuotaAggregationEngine,
        QuotaTariff, RuleEvaluator, TariffStore,
    };
    use quota_usage::{IntervalUsageParser, InMemoryUsageStore, UsageInterval, UsageParser, UsageRecord, UsageStore};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn march_end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap()
    }

    fn account() -> Account {
        Account::new(10, "alice", AccountType::Normal, 1)
    }

    struct Fixture {
        usage: Arc<InMemoryUsageStore>,
        tariffs: Arc<InMemoryTariffStore>,
        writer: Arc<InMemoryBillingWriter>,
        engine: QuotaAggregationEngine,
    }

    fn fixture_with(tariffs: Arc<dyn TariffStore>, own: Arc<InMemoryTariffStore>) -> Fixture {
        let usage = Arc::new(InMemoryUsageStore::new());
        let writer = Arc::new(InMemoryBillingWriter::new());
        let inventory = Inventory::new();
        inventory.add_domain(1, DomainInfo { uuid: "d-1".into(), name: "ROOT".into(), path: "/".into() });
        let engine = QuotaAggregationEngine::new(
            usage.clone(),
            tariffs,
            Arc::new(inventory),
            Arc::new(RuleEvaluator::default()),
            writer.clone(),
        );
        Fixture {
            usage,
            tariffs: own,
            writer,
            engine,
        }
    }

    fn fixture() -> Fixture {
        let tariffs = Arc::new(InMemoryTariffStore::new());
        fixture_with(tariffs.clone(), tariffs)
    }

    fn record(usage_type: UsageType, resource_id: u64, hours: f64, start: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            id: 0,
            zone_id: 1,
            account_id: 10,
            domain_id: 1,
            description: format!("{} usage", usage_type),
            usage_display: format!("{:.6} Hrs", hours),
            usage_type,
            raw_usage: hours,
            vm_id: None,
            offering_id: None,
            resource_id: Some(resource_id),
            size: Some(1 << 30),
            virtual_size: None,
            start_date: start,
            end_date: start + Duration::seconds((hours * 3600.0) as i64),
        }
    }

    #[test]
    fn test_flat_tariff_aggregates_usage() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vm", UsageType::RunningVm, dec!(0.05), t0()))
            .unwrap();
        f.usage.persist(record(UsageType::RunningVm, 1, 2.5, t0() + Duration::hours(1))).unwrap();

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(0.125));
        assert_eq!(period.processed.usage_value(), 2.5);
        assert_eq!(period.processed.tariffs().len(), 1);
        assert_eq!(period.lines.len(), 1);
        assert!(period.lines[0].quota_used > Decimal::ZERO);
        assert_eq!(period.lines[0].details.len(), 1);
        assert!(period.skipped.is_empty());
    }

    #[test]
    fn test_running_totals_feed_later_rules() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("base", UsageType::RunningVm, dec!(1), t0()))
            .unwrap();
        f.tariffs
            .create_tariff(
                QuotaTariff::new("surcharge", UsageType::RunningVm, dec!(0), t0())
                    .with_activation_rule("processedData.aggregatedTariffsValue >= 2 ? 5 : false"),
            )
            .unwrap();
        for hour in 0..3 {
            f.usage
                .persist(record(UsageType::RunningVm, hour + 1, 1.0, t0() + Duration::hours(hour as i64 * 2)))
                .unwrap();
        }

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(8));
        assert_eq!(period.processed.usage_value(), 3.0);
        assert_eq!(period.lines.len(), 3);
        assert_eq!(period.lines[0].details.len(), 1);
        assert_eq!(period.lines[2].details.len(), 2);
    }

    #[test]
    fn test_rule_failure_skips_only_that_tariff() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("flat", UsageType::Volume, dec!(2), t0()))
            .unwrap();
        f.tariffs
            .create_tariff(
                QuotaTariff::new("broken", UsageType::Volume, dec!(100), t0()).with_activation_rule("vm.cpu > 1"),
            )
            .unwrap();
        f.usage.persist(record(UsageType::Volume, 1, 1.0, t0())).unwrap();

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(2));
        assert_eq!(period.lines.len(), 1);
        assert_eq!(period.lines[0].details.len(), 1);
    }

    #[test]
    fn test_rules_read_inventory_and_record() {
        let f = fixture();
        f.tariffs
            .create_tariff(
                QuotaTariff::new("root-only", UsageType::Volume, dec!(3), t0())
                    .with_activation_rule("domain.path == '/' && usageRecord.size >= 1073741824"),
            )
            .unwrap();
        f.usage.persist(record(UsageType::Volume, 1, 1.0, t0())).unwrap();

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(3));
    }

    #[test]
    fn test_recomputing_is_idempotent() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vol", UsageType::Volume, dec!(0.5), t0()))
            .unwrap();
        f.usage.persist(record(UsageType::Volume, 1, 4.0, t0())).unwrap();
        f.usage.persist(record(UsageType::Volume, 2, 1.5, t0() + Duration::days(2))).unwrap();

        let first = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        let second = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(first, second);

        let cancel = AtomicBool::new(false);
        f.engine.aggregate_account(&account(), t0(), march_end(), &cancel).unwrap();
        let statement = f.writer.statement(10).unwrap();
        f.engine.aggregate_account(&account(), t0(), march_end(), &cancel).unwrap();
        assert_eq!(f.writer.len(), 1);
        assert_eq!(f.writer.statement(10).unwrap(), statement);
        assert_eq!(statement.periods, 1);
        assert_eq!(statement.total, first.total_quota_used);
        assert_eq!(statement.by_usage_type.get(&UsageType::Volume), Some(&first.total_quota_used));
    }

    #[test]
    fn test_superseded_tariff_prices_by_record_date() {
        let f = fixture();
        let v1 = f
            .tariffs
            .create_tariff(QuotaTariff::new("vm", UsageType::RunningVm, dec!(1), t0()))
            .unwrap();
        f.tariffs
            .supersede_tariff(v1.id, QuotaTariff::new("vm", UsageType::RunningVm, dec!(3), t0() + Duration::days(10)))
            .unwrap();
        f.usage.persist(record(UsageType::RunningVm, 1, 1.0, t0() + Duration::days(1))).unwrap();
        f.usage.persist(record(UsageType::RunningVm, 1, 1.0, t0() + Duration::days(11))).unwrap();

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(4));
    }

    /// A store returning every version as effective, as a misconfigured
    /// catalogue would.
    struct OverlappingVersions(Vec<QuotaTariff>);

    impl TariffStore for OverlappingVersions {
        fn find_tariffs_for_type(&self, _: i32, _: DateTime<Utc>) -> QuotaResult<Vec<QuotaTariff>> {
            Ok(self.0.clone())
        }
        fn create_tariff(&self, tariff: QuotaTariff) -> QuotaResult<QuotaTariff> {
            Ok(tariff)
        }
        fn supersede_tariff(&self, _: u64, tariff: QuotaTariff) -> QuotaResult<QuotaTariff> {
            Ok(tariff)
        }
        fn list_tariffs(&self, _: &[UsageType]) -> QuotaResult<Vec<QuotaTariff>> {
            Ok(self.0.clone())
        }
        fn find_by_name(&self, _: &str) -> QuotaResult<Option<QuotaTariff>> {
            Ok(None)
        }
        fn list_monthly_due(&self, _: u32) -> QuotaResult<Vec<QuotaTariff>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_highest_version_wins_on_overlap() {
        let mut v1 = QuotaTariff::new("vm", UsageType::RunningVm, dec!(1), t0());
        v1.id = 1;
        v1.version = 1;
        let mut v2 = QuotaTariff::new("vm", UsageType::RunningVm, dec!(7), t0());
        v2.id = 2;
        v2.version = 2;
        let mut other = QuotaTariff::new("other", UsageType::RunningVm, dec!(2), t0());
        other.id = 3;
        other.version = 1;

        let f = fixture_with(
            Arc::new(OverlappingVersions(vec![v1, v2, other])),
            Arc::new(InMemoryTariffStore::new()),
        );
        f.usage.persist(record(UsageType::RunningVm, 1, 1.0, t0())).unwrap();

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(9));
        let ids: Vec<u64> = period.lines[0].details.iter().map(|d| d.tariff_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_monthly_tariff_bills_the_cycle_once() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("monthly", UsageType::Volume, dec!(10), t0()).monthly(5).unwrap())
            .unwrap();
        let february = Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap();
        f.usage.persist(record(UsageType::Volume, 1, 2.0, february)).unwrap();
        f.usage.persist(record(UsageType::Volume, 2, 1.0, t0() + Duration::days(1))).unwrap();
        f.usage.persist(record(UsageType::Volume, 3, 2.0, t0() + Duration::days(12))).unwrap();

        // Executes on March 5th over [February 5th, March 5th).
        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.lines.len(), 1);
        assert_eq!(period.lines[0].usage_record_id, None);
        assert_eq!(period.lines[0].start_date, february);
        assert_eq!(period.processed.aggregated_tariffs_value(), dec!(30));
        assert_eq!(period.processed.usage_value(), 3.0);

        let late = f
            .engine
            .compute_period(&account(), t0() + Duration::days(10), march_end())
            .unwrap();
        assert!(late.lines.is_empty());
        assert_eq!(late.processed.usage_value(), 2.0);
    }

    /// Parses then aggregates one day at a time, the way the batch runs,
    /// from March `first_day` for `days` windows.
    fn run_daily(f: &Fixture, first_day: i64, days: i64) -> Vec<FinalizedPeriod> {
        let parser = IntervalUsageParser::volumes(f.usage.clone());
        let cancel = AtomicBool::new(false);
        (first_day - 1..first_day - 1 + days)
            .map(|day| {
                let start = t0() + Duration::days(day);
                let end = start + Duration::days(1);
                parser.parse(&account(), start, end).unwrap();
                f.engine.aggregate_account(&account(), start, end, &cancel).unwrap()
            })
            .collect()
    }

    fn gib_volume(f: &Fixture) {
        f.usage
            .record_interval(UsageInterval::new(7, UsageType::Volume, 10, 1, 1, 1 << 30, t0()))
            .unwrap();
    }

    #[test]
    fn test_daily_windows_bill_each_entry_once() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vol", UsageType::Volume, dec!(744), t0()))
            .unwrap();
        gib_volume(&f);

        let periods = run_daily(&f, 1, 3);
        let mut ids = Vec::new();
        for period in &periods {
            assert_eq!(period.lines.len(), 1);
            assert_eq!(period.lines[0].start_date, period.start);
            assert_eq!(period.lines[0].quota_used.round(), dec!(24));
            assert_eq!(period.processed.usage_value().round(), 24.0);
            ids.push(period.lines[0].usage_record_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert_eq!(f.writer.len(), 3);
        assert_eq!(f.writer.statement(10).unwrap().total.round(), dec!(72));
    }

    #[test]
    fn test_daily_windows_bill_monthly_tariff_once() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vol-monthly", UsageType::Volume, dec!(720), t0()).monthly(10).unwrap())
            .unwrap();
        gib_volume(&f);

        let periods = run_daily(&f, 1, 18);
        let billed: Vec<&FinalizedPeriod> = periods.iter().filter(|p| !p.lines.is_empty()).collect();
        assert_eq!(billed.len(), 1);
        assert_eq!(billed[0].start, t0() + Duration::days(9));
        assert_eq!(billed[0].lines.len(), 1);

        // Nine days of one GiB from March 1st to 10th, at 720 over March's 744 hours.
        let line = &billed[0].lines[0];
        assert_eq!(line.usage_record_id, None);
        assert_eq!(line.start_date, t0());
        assert_eq!(line.quota_used.round(), dec!(209));
        assert_eq!(f.writer.len(), 18);
        assert_eq!(f.writer.statement(10).unwrap().total, line.quota_used);
    }

    #[test]
    fn test_inverted_record_is_skipped() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vol", UsageType::Volume, dec!(1), t0()))
            .unwrap();
        let mut broken = record(UsageType::Volume, 1, 1.0, t0() + Duration::days(2));
        broken.end_date = broken.start_date - Duration::hours(1);
        let broken = f.usage.persist(broken).unwrap();
        f.usage.persist(record(UsageType::Volume, 2, 1.0, t0())).unwrap();

        let period = f.engine.compute_period(&account(), t0(), march_end()).unwrap();
        assert_eq!(period.skipped.len(), 1);
        assert_eq!(period.skipped[0].usage_record_id, broken.id);
        assert_eq!(period.lines.len(), 1);
    }

    #[test]
    fn test_cancelled_period_is_not_committed() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vol", UsageType::Volume, dec!(1), t0()))
            .unwrap();
        f.usage.persist(record(UsageType::Volume, 1, 1.0, t0())).unwrap();

        let cancel = AtomicBool::new(true);
        let result = f.engine.aggregate_account(&account(), t0(), march_end(), &cancel);
        assert!(matches!(result, Err(QuotaError::Cancelled(_))));
        assert!(f.writer.is_empty());

        let rerun = f
            .engine
            .aggregate_account(&account(), t0(), march_end(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(rerun.lines.len(), 1);
        assert_eq!(f.writer.len(), 1);
    }

    #[test]
    fn test_quota_disabled_account_is_not_rated() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("vol", UsageType::Volume, dec!(1), t0()))
            .unwrap();
        f.usage.persist(record(UsageType::Volume, 1, 1.0, t0())).unwrap();

        let mut disabled = account();
        disabled.quota_enabled = false;
        let period = f.engine.compute_period(&disabled, t0(), march_end()).unwrap();
        assert!(period.lines.is_empty());
        assert_eq!(period.total_quota_used, Decimal::ZERO);
    }

    #[test]
    fn test_period_state_machine() {
        let mut period = PeriodAggregation::new(10, t0(), march_end());
        assert_eq!(period.state(), PeriodState::Pending);
        assert!(matches!(period.accumulate(1.0, 1.0, &[]), Err(QuotaError::InvalidState(_))));

        period.begin().unwrap();
        assert_eq!(period.state(), PeriodState::Accumulating);
        assert!(matches!(period.begin(), Err(QuotaError::InvalidState(_))));
        period.accumulate(1.5, 1.5, &[]).unwrap();

        let finalized = period.finalize().unwrap();
        assert_eq!(finalized.processed.usage_value(), 1.5);
        assert_eq!(finalized.processed.start_date(), Some(t0()));

        let unstarted = PeriodAggregation::new(10, t0(), march_end());
        assert!(matches!(unstarted.finalize(), Err(QuotaError::InvalidState(_))));
    }

    #[test]
    fn test_backup_object_parse_then_rate() {
        let f = fixture();
        f.tariffs
            .create_tariff(QuotaTariff::new("backup", UsageType::BackupObject, dec!(744), t0()))
            .unwrap();

        let mut interval = UsageInterval::new(42, UsageType::BackupObject, 10, 1, 1, 1 << 30, t0());
        interval.removed_at = Some(t0() + Duration::milliseconds(3_600_000));
        f.usage.record_interval(interval).unwrap();

        let parser = IntervalUsageParser::backup_objects(f.usage.clone());
        let outcome = parser.parse(&account(), t0(), t0() + Duration::hours(2)).unwrap();
        assert_eq!(outcome.parsed, 1);

        let records = f.usage.list_usage(10, t0(), t0() + Duration::hours(2)).unwrap();
        assert_eq!(records[0].usage_display, "1.000000 Hrs");

        let period = f
            .engine
            .aggregate_account(&account(), t0(), t0() + Duration::hours(2), &AtomicBool::new(false))
            .unwrap();
        // 744 per GiB-month over the 744 hours of March: one GiB for one hour costs 1.
        assert_eq!(period.lines.len(), 1);
        assert_eq!(period.lines[0].quota_used.round_dp(4), dec!(1.0000));
        assert_eq!(f.writer.statement(10).unwrap().total, period.total_quota_used);
        f.writer.write(&period).unwrap();
        assert_eq!(f.writer.len(), 1);
    }
}
