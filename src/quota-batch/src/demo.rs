//! Sample catalogue and usage loaded by `--demo`.

use chrono::{DateTime, Duration, Utc};
use quota_core::{Account, AccountType, QuotaResult, UsageType};
use quota_rating::preset::{DomainInfo, Inventory, ResourceInfo, ZoneInfo};
use quota_rating::{QuotaTariff, TariffStore};
use quota_usage::{UsageInterval, UsageStore};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

pub fn seed_demo_inventory(inventory: &Inventory) {
    inventory.add_domain(
        1,
        DomainInfo {
            uuid: "9f7e0f2c-2f67-4b43-9b4b-1f0b4c3c7d01".into(),
            name: "ROOT".into(),
            path: "/".into(),
        },
    );
    inventory.add_zone(
        1,
        ZoneInfo {
            uuid: "4d2b9a1e-58a3-4f57-a1c0-0f6a3c2b9e10".into(),
            name: "zone-1".into(),
        },
    );
    let mut tags = BTreeMap::new();
    tags.insert("tier".to_string(), "gold".to_string());
    inventory.add_resource(
        UsageType::Volume,
        201,
        ResourceInfo {
            uuid: "c1a9d9d4-7f0e-4a6e-9a53-0a4f2b7d5e61".into(),
            name: "data-disk".into(),
            tags,
        },
    );
}

pub fn seed_demo_tariffs(store: &dyn TariffStore, since: DateTime<Utc>) -> QuotaResult<()> {
    store.create_tariff(QuotaTariff::new("volume-gb-month", UsageType::Volume, Decimal::new(10, 2), since))?;
    store.create_tariff(
        QuotaTariff::new("gold-volumes", UsageType::Volume, Decimal::new(5, 2), since)
            .with_activation_rule("value.tags['tier'] == 'gold'"),
    )?;
    store.create_tariff(QuotaTariff::new("backup-gb-month", UsageType::BackupObject, Decimal::new(2, 2), since))?;
    store.create_tariff(
        QuotaTariff::new("backup-monthly-fee", UsageType::BackupObject, Decimal::ONE, since).monthly(1)?,
    )?;
    store.create_tariff(QuotaTariff::new("vm-hours", UsageType::RunningVm, Decimal::new(720, 1), since))?;
    info!("Seeded demo tariffs");
    Ok(())
}

pub fn seed_demo_usage(store: &dyn UsageStore, since: DateTime<Utc>) -> QuotaResult<Vec<Account>> {
    let accounts = vec![
        Account::new(1, "admin", AccountType::Admin, 1),
        Account::new(2, "alice", AccountType::Normal, 1),
        Account::new(3, "bob", AccountType::Normal, 1),
    ];

    for account in &accounts {
        let offset = Duration::hours(account.id as i64);
        let mut volume = UsageInterval::new(
            200 + account.id,
            UsageType::Volume,
            account.id,
            account.domain_id,
            1,
            (10 * account.id) << 30,
            since + offset,
        );
        volume.offering_id = Some(3);
        store.record_interval(volume)?;

        let mut backup = UsageInterval::new(
            300 + account.id,
            UsageType::BackupObject,
            account.id,
            account.domain_id,
            1,
            5 << 30,
            since,
        );
        backup.protected_size = 2 << 30;
        backup.vm_id = Some(400 + account.id);
        backup.removed_at = Some(since + Duration::hours(12) + offset);
        store.record_interval(backup)?;
    }

    info!(accounts = accounts.len(), "Seeded demo usage");
    Ok(accounts)
}
