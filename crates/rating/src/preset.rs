//! Preset variables: the read-only context activation rules are evaluated against.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quota_core::{Account, QuotaResult, UsageType};
use quota_usage::UsageRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Paths whose members are free-form keys rather than a fixed schema.
pub const OPEN_MAP_PATHS: &[&str] = &["value.tags"];

// ---------------------------------------------------------------------------
// Context schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountVariables {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainVariables {
    pub id: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneVariables {
    pub id: String,
    pub name: String,
}

/// The metered resource itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceValue {
    pub id: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub virtual_size: Option<u64>,
    pub offering_id: Option<String>,
    pub vm_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageRecordVariables {
    pub usage_type: String,
    pub raw_usage: f64,
    pub size: Option<u64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// A tariff applied so far in the period, as seen by rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTariff {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
}

/// Which `ProcessedData` fields have been set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulatedFields(u8);

impl PopulatedFields {
    pub const START_DATE: Self = Self(1);
    pub const END_DATE: Self = Self(1 << 1);
    pub const USAGE_VALUE: Self = Self(1 << 2);
    pub const AGGREGATED_TARIFFS_VALUE: Self = Self(1 << 3);
    pub const TARIFFS: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Running aggregate of one billing period.
///
/// Fields are only ever set; the populated set drives `Display`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessedData {
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    usage_value: Option<f64>,
    #[serde(with = "rust_decimal::serde::float_option")]
    aggregated_tariffs_value: Option<Decimal>,
    tariffs: Option<Vec<AppliedTariff>>,
    #[serde(skip)]
    populated: PopulatedFields,
}

impl ProcessedData {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        let mut data = Self::default();
        data.set_start_date(start_date);
        data.set_end_date(end_date);
        data
    }

    pub fn set_start_date(&mut self, start_date: DateTime<Utc>) {
        self.start_date = Some(start_date);
        self.populated.insert(PopulatedFields::START_DATE);
    }

    pub fn set_end_date(&mut self, end_date: DateTime<Utc>) {
        self.end_date = Some(end_date);
        self.populated.insert(PopulatedFields::END_DATE);
    }

    pub fn set_usage_value(&mut self, usage_value: f64) {
        self.usage_value = Some(usage_value);
        self.populated.insert(PopulatedFields::USAGE_VALUE);
    }

    pub fn set_aggregated_tariffs_value(&mut self, value: Decimal) {
        self.aggregated_tariffs_value = Some(value);
        self.populated.insert(PopulatedFields::AGGREGATED_TARIFFS_VALUE);
    }

    pub fn set_tariffs(&mut self, tariffs: Vec<AppliedTariff>) {
        self.tariffs = Some(tariffs);
        self.populated.insert(PopulatedFields::TARIFFS);
    }

    pub fn add_usage_value(&mut self, hours: f64) {
        let total = self.usage_value() + hours;
        self.set_usage_value(total);
    }

    pub fn push_tariff(&mut self, tariff: AppliedTariff) {
        let mut tariffs = self.tariffs.take().unwrap_or_default();
        tariffs.push(tariff);
        self.set_tariffs(tariffs);
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn usage_value(&self) -> f64 {
        self.usage_value.unwrap_or(0.0)
    }

    pub fn aggregated_tariffs_value(&self) -> Decimal {
        self.aggregated_tariffs_value.unwrap_or(Decimal::ZERO)
    }

    pub fn tariffs(&self) -> &[AppliedTariff] {
        self.tariffs.as_deref().unwrap_or(&[])
    }

    pub fn populated(&self) -> PopulatedFields {
        self.populated
    }
}

impl std::fmt::Display for ProcessedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields = serde_json::Map::new();
        let set = self.populated;
        if let Some(start) = self.start_date.filter(|_| set.contains(PopulatedFields::START_DATE)) {
            fields.insert("startDate".into(), Value::String(start.to_rfc3339()));
        }
        if let Some(end) = self.end_date.filter(|_| set.contains(PopulatedFields::END_DATE)) {
            fields.insert("endDate".into(), Value::String(end.to_rfc3339()));
        }
        if let Some(usage) = self.usage_value.filter(|_| set.contains(PopulatedFields::USAGE_VALUE)) {
            fields.insert("usageValue".into(), serde_json::json!(usage));
        }
        if let Some(value) = self
            .aggregated_tariffs_value
            .filter(|_| set.contains(PopulatedFields::AGGREGATED_TARIFFS_VALUE))
        {
            fields.insert("aggregatedTariffsValue".into(), Value::String(value.normalize().to_string()));
        }
        if let Some(tariffs) = self.tariffs.as_ref().filter(|_| set.contains(PopulatedFields::TARIFFS)) {
            let list = tariffs
                .iter()
                .map(|t| serde_json::json!({ "id": t.id, "value": t.value.normalize().to_string() }))
                .collect();
            fields.insert("tariffs".into(), Value::Array(list));
        }
        write!(f, "{}", Value::Object(fields))
    }
}

/// Everything an activation rule may reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresetVariables {
    pub account: AccountVariables,
    pub domain: DomainVariables,
    pub zone: ZoneVariables,
    pub resource_type: String,
    pub value: ResourceValue,
    pub usage_record: UsageRecordVariables,
    pub processed_data: ProcessedData,
}

impl PresetVariables {
    pub fn to_json(&self) -> QuotaResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Every dotted path of the fixed schema, including intermediate objects.
    /// Array paths describe their element shape.
    pub fn schema_paths() -> BTreeSet<String> {
        let mut sample = Self::default();
        sample.processed_data.set_tariffs(vec![AppliedTariff::default()]);

        let mut paths = BTreeSet::new();
        if let Ok(Value::Object(root)) = serde_json::to_value(&sample) {
            for (key, value) in root {
                collect_paths(&key, &value, &mut paths);
            }
        }
        paths
    }
}

fn collect_paths(prefix: &str, value: &Value, paths: &mut BTreeSet<String>) {
    paths.insert(prefix.to_string());
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect_paths(&format!("{}.{}", prefix, key), child, paths);
            }
        }
        Value::Array(items) => {
            if let Some(Value::Object(map)) = items.first() {
                for (key, child) in map {
                    collect_paths(&format!("{}.{}", prefix, key), child, paths);
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainInfo {
    pub uuid: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneInfo {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceInfo {
    pub uuid: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

/// Descriptions of the entities usage records point at.
pub trait InventoryLookup: Send + Sync {
    fn domain(&self, domain_id: u64) -> Option<DomainInfo>;
    fn zone(&self, zone_id: u64) -> Option<ZoneInfo>;
    fn resource(&self, usage_type: UsageType, resource_id: u64) -> Option<ResourceInfo>;
}

/// In-memory inventory.
#[derive(Default)]
pub struct Inventory {
    domains: DashMap<u64, DomainInfo>,
    zones: DashMap<u64, ZoneInfo>,
    resources: DashMap<(UsageType, u64), ResourceInfo>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&self, domain_id: u64, info: DomainInfo) {
        self.domains.insert(domain_id, info);
    }

    pub fn add_zone(&self, zone_id: u64, info: ZoneInfo) {
        self.zones.insert(zone_id, info);
    }

    pub fn add_resource(&self, usage_type: UsageType, resource_id: u64, info: ResourceInfo) {
        self.resources.insert((usage_type, resource_id), info);
    }
}

impl InventoryLookup for Inventory {
    fn domain(&self, domain_id: u64) -> Option<DomainInfo> {
        self.domains.get(&domain_id).map(|d| d.value().clone())
    }

    fn zone(&self, zone_id: u64) -> Option<ZoneInfo> {
        self.zones.get(&zone_id).map(|z| z.value().clone())
    }

    fn resource(&self, usage_type: UsageType, resource_id: u64) -> Option<ResourceInfo> {
        self.resources
            .get(&(usage_type, resource_id))
            .map(|r| r.value().clone())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a fresh `PresetVariables` for each evaluation.
pub struct PresetVariableBuilder {
    inventory: Arc<dyn InventoryLookup>,
}

impl PresetVariableBuilder {
    pub fn new(inventory: Arc<dyn InventoryLookup>) -> Self {
        Self { inventory }
    }

    pub fn build(&self, account: &Account, record: &UsageRecord, processed: &ProcessedData) -> PresetVariables {
        let domain = match self.inventory.domain(record.domain_id) {
            Some(d) => DomainVariables {
                id: d.uuid,
                name: d.name,
                path: d.path,
            },
            None => {
                debug!(domain_id = record.domain_id, "Domain not in inventory; exposing its id only");
                DomainVariables {
                    id: record.domain_id.to_string(),
                    ..Default::default()
                }
            }
        };

        let zone = match self.inventory.zone(record.zone_id) {
            Some(z) => ZoneVariables { id: z.uuid, name: z.name },
            None => ZoneVariables {
                id: record.zone_id.to_string(),
                ..Default::default()
            },
        };

        let resource = record
            .resource_id
            .and_then(|id| self.inventory.resource(record.usage_type, id));
        let value = ResourceValue {
            id: resource
                .as_ref()
                .map(|r| r.uuid.clone())
                .or_else(|| record.resource_id.map(|id| id.to_string())),
            name: resource.as_ref().map(|r| r.name.clone()),
            size: record.size,
            virtual_size: record.virtual_size,
            offering_id: record.offering_id.map(|id| id.to_string()),
            vm_id: record.vm_id.map(|id| id.to_string()),
            tags: resource.map(|r| r.tags).unwrap_or_default(),
        };

        PresetVariables {
            account: AccountVariables {
                id: account.uuid.to_string(),
                name: account.name.clone(),
                account_type: account.account_type.to_string(),
            },
            domain,
            zone,
            resource_type: record.usage_type.quota_name().to_string(),
            value,
            usage_record: UsageRecordVariables {
                usage_type: record.usage_type.quota_name().to_string(),
                raw_usage: record.raw_usage,
                size: record.size,
                start_date: Some(record.start_date),
                end_date: Some(record.end_date),
            },
            processed_data: processed.clone(),
        }
    }
}
