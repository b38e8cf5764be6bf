//! Quota tariffs: priced rules attached to a usage type.

use chrono::{DateTime, Utc};
use quota_core::{QuotaError, QuotaResult, UsageType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Highest day of the month a MONTHLY tariff may execute on.
pub const MAX_EXECUTE_ON_DAY: i32 = 28;

/// When a tariff is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingPeriod {
    /// Every usage record is rated on its own.
    ByEntry,
    /// Usage of the month is batched and rated once, on the tariff's execute-on day.
    Monthly,
}

impl ProcessingPeriod {
    pub const ALL: [ProcessingPeriod; 2] = [Self::ByEntry, Self::Monthly];

    fn as_str(self) -> &'static str {
        match self {
            Self::ByEntry => "BY_ENTRY",
            Self::Monthly => "MONTHLY",
        }
    }
}

impl std::fmt::Display for ProcessingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingPeriod {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                QuotaError::Validation(format!(
                    "Invalid value [{}]; it must be one of the following values [BY_ENTRY, MONTHLY].",
                    s
                ))
            })
    }
}

/// A priced rule applied to a unit of metered usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaTariff {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    usage_type: Option<UsageType>,
    usage_name: String,
    usage_unit: String,
    usage_discriminator: String,
    pub currency_value: Decimal,
    pub activation_rule: Option<String>,
    processing_period: ProcessingPeriod,
    execute_on: Option<u8>,
    pub effective_on: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub removed: Option<DateTime<Utc>>,
    pub version: u32,
}

impl Default for QuotaTariff {
    fn default() -> Self {
        Self {
            id: 0,
            uuid: Uuid::nil(),
            name: String::new(),
            description: None,
            usage_type: None,
            usage_name: String::new(),
            usage_unit: String::new(),
            usage_discriminator: String::new(),
            currency_value: Decimal::ZERO,
            activation_rule: None,
            processing_period: ProcessingPeriod::ByEntry,
            execute_on: None,
            effective_on: DateTime::<Utc>::default(),
            end_date: None,
            removed: None,
            version: 0,
        }
    }
}

impl QuotaTariff {
    /// A BY_ENTRY tariff without activation rule.
    pub fn new(
        name: impl Into<String>,
        usage_type: UsageType,
        currency_value: Decimal,
        effective_on: DateTime<Utc>,
    ) -> Self {
        let mut tariff = Self {
            name: name.into(),
            currency_value,
            effective_on,
            ..Self::default()
        };
        tariff.set_usage_type_data(usage_type.code());
        tariff
    }

    pub fn with_activation_rule(mut self, rule: impl Into<String>) -> Self {
        self.activation_rule = Some(rule.into());
        self
    }

    /// Switches the tariff to MONTHLY processing on the given day.
    pub fn monthly(mut self, day: i32) -> QuotaResult<Self> {
        self.processing_period = ProcessingPeriod::Monthly;
        self.execute_on = None;
        if !self.set_execute_on(Some(day)) {
            return Err(QuotaError::Validation(format!(
                "executeOn must be between 1 and {} for MONTHLY tariffs, got [{}]",
                MAX_EXECUTE_ON_DAY, day
            )));
        }
        Ok(self)
    }

    /// Copies the name, unit and discriminator of the usage type `code`.
    ///
    /// Returns `false` and leaves the tariff untouched when the code is
    /// unknown, or when a stored tariff would change its usage type.
    pub fn set_usage_type_data(&mut self, code: i32) -> bool {
        let Some(usage_type) = UsageType::from_code(code) else {
            return false;
        };
        if self.id != 0 && self.usage_type.is_some_and(|current| current != usage_type) {
            return false;
        }

        self.usage_type = Some(usage_type);
        self.usage_name = usage_type.quota_name().to_string();
        self.usage_unit = usage_type.unit().description().to_string();
        self.usage_discriminator = usage_type.discriminator().to_string();
        true
    }

    pub fn set_processing_period(&mut self, period: ProcessingPeriod) {
        self.processing_period = period;
    }

    /// Sets the day of month a MONTHLY tariff executes on.
    ///
    /// BY_ENTRY tariffs accept only `None`; MONTHLY tariffs require a day in
    /// `1..=28`. Returns `false` and leaves the tariff untouched otherwise.
    pub fn set_execute_on(&mut self, execute_on: Option<i32>) -> bool {
        match (self.processing_period, execute_on) {
            (ProcessingPeriod::ByEntry, None) => {
                self.execute_on = None;
                true
            }
            (ProcessingPeriod::ByEntry, Some(_)) => false,
            (ProcessingPeriod::Monthly, Some(day)) if (1..=MAX_EXECUTE_ON_DAY).contains(&day) => {
                self.execute_on = Some(day as u8);
                true
            }
            (ProcessingPeriod::Monthly, _) => false,
        }
    }

    pub fn usage_type(&self) -> Option<UsageType> {
        self.usage_type
    }

    pub fn usage_name(&self) -> &str {
        &self.usage_name
    }

    pub fn usage_unit(&self) -> &str {
        &self.usage_unit
    }

    pub fn usage_discriminator(&self) -> &str {
        &self.usage_discriminator
    }

    pub fn processing_period(&self) -> ProcessingPeriod {
        self.processing_period
    }

    pub fn execute_on(&self) -> Option<u8> {
        self.execute_on
    }

    pub fn has_activation_rule(&self) -> bool {
        self.activation_rule
            .as_deref()
            .is_some_and(|rule| !rule.trim().is_empty())
    }

    /// `effective_on <= as_of < end_date` (an open end never expires).
    pub fn is_effective_at(&self, as_of: DateTime<Utc>) -> bool {
        self.effective_on <= as_of && self.end_date.map_or(true, |end| as_of < end)
    }

    /// Whether the tariff's effective range touches `[start, end]`.
    pub fn overlaps_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let ends_before = self.end_date.is_some_and(|tariff_end| start > tariff_end);
        !(ends_before || end < self.effective_on)
    }

    /// Checks the invariants a tariff must hold before it is stored.
    pub fn validate(&self) -> QuotaResult<()> {
        if self.name.trim().is_empty() {
            return Err(QuotaError::Validation("tariff name must not be empty".into()));
        }
        if self.usage_type.is_none() {
            return Err(QuotaError::Validation(format!(
                "tariff [{}] has no valid usage type",
                self.name
            )));
        }
        match (self.processing_period, self.execute_on) {
            (ProcessingPeriod::ByEntry, Some(day)) => {
                return Err(QuotaError::Validation(format!(
                    "tariff [{}] is processed BY_ENTRY and must not define executeOn [{}]",
                    self.name, day
                )));
            }
            (ProcessingPeriod::Monthly, None) => {
                return Err(QuotaError::Validation(format!(
                    "tariff [{}] is processed MONTHLY and must define executeOn",
                    self.name
                )));
            }
            _ => {}
        }
        if let Some(end) = self.end_date {
            if end < self.effective_on {
                return Err(QuotaError::Validation(format!(
                    "tariff [{}] ends at [{}] before it becomes effective at [{}]",
                    self.name, end, self.effective_on
                )));
            }
        }
        if self.currency_value.is_sign_negative() {
            return Err(QuotaError::Validation(format!(
                "tariff [{}] has a negative value [{}]",
                self.name, self.currency_value
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for QuotaTariff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{\"id\":{},\"uuid\":\"{}\",\"name\":\"{}\",\"usageName\":\"{}\",\"version\":{}}}",
            self.id, self.uuid, self.name, self.usage_name, self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn with_period(period: ProcessingPeriod) -> QuotaTariff {
        let mut tariff = QuotaTariff::default();
        tariff.set_processing_period(period);
        tariff
    }

    #[test]
    fn test_set_usage_type_data_for_every_known_type() {
        let mut tariff = QuotaTariff::default();
        for usage_type in UsageType::ALL {
            assert!(tariff.set_usage_type_data(usage_type.code()));
            assert_eq!(tariff.usage_type(), Some(usage_type));
            assert_eq!(tariff.usage_name(), usage_type.quota_name());
            assert_eq!(tariff.usage_unit(), usage_type.unit().description());
            assert_eq!(tariff.usage_discriminator(), usage_type.discriminator());
        }
    }

    #[test]
    fn test_set_usage_type_data_rejects_unknown_code() {
        let mut tariff = QuotaTariff::default();
        assert!(tariff.set_usage_type_data(UsageType::Volume.code()));
        let before = tariff.clone();

        assert!(!tariff.set_usage_type_data(0));
        assert_eq!(tariff, before);
    }

    #[test]
    fn test_stored_tariff_keeps_its_usage_type() {
        let mut tariff = QuotaTariff::new("vm", UsageType::RunningVm, Decimal::ONE, Utc::now());
        tariff.id = 7;
        assert!(!tariff.set_usage_type_data(UsageType::Volume.code()));
        assert!(tariff.set_usage_type_data(UsageType::RunningVm.code()));
        assert_eq!(tariff.usage_type(), Some(UsageType::RunningVm));
    }

    #[test]
    fn test_execute_on_by_entry() {
        let mut tariff = with_period(ProcessingPeriod::ByEntry);
        assert!(!tariff.set_execute_on(Some(0)));
        assert!(!tariff.set_execute_on(Some(10)));
        assert!(tariff.set_execute_on(None));
        assert_eq!(tariff.execute_on(), None);
    }

    #[test]
    fn test_execute_on_monthly() {
        let mut tariff = with_period(ProcessingPeriod::Monthly);
        assert!(!tariff.set_execute_on(None));
        assert!(!tariff.set_execute_on(Some(0)));
        assert!(!tariff.set_execute_on(Some(-3)));
        assert!(!tariff.set_execute_on(Some(29)));
        assert_eq!(tariff.execute_on(), None);

        assert!(tariff.set_execute_on(Some(10)));
        assert_eq!(tariff.execute_on(), Some(10));
        assert!(!tariff.set_execute_on(Some(29)));
        assert_eq!(tariff.execute_on(), Some(10));
    }

    #[test]
    fn test_processing_period_parsing() {
        assert_eq!("by_entry".parse::<ProcessingPeriod>().unwrap(), ProcessingPeriod::ByEntry);
        assert_eq!("Monthly".parse::<ProcessingPeriod>().unwrap(), ProcessingPeriod::Monthly);
        assert!(matches!(
            "weekly".parse::<ProcessingPeriod>(),
            Err(QuotaError::Validation(_))
        ));
    }

    #[test]
    fn test_effective_range() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut tariff = QuotaTariff::new("vol", UsageType::Volume, Decimal::ONE, t0);
        tariff.end_date = Some(t0 + Duration::days(10));

        assert!(!tariff.is_effective_at(t0 - Duration::seconds(1)));
        assert!(tariff.is_effective_at(t0));
        assert!(tariff.is_effective_at(t0 + Duration::days(9)));
        assert!(!tariff.is_effective_at(t0 + Duration::days(10)));

        assert!(tariff.overlaps_period(t0 - Duration::days(1), t0));
        assert!(!tariff.overlaps_period(t0 + Duration::days(11), t0 + Duration::days(12)));
    }

    #[test]
    fn test_validate() {
        let t0 = Utc::now();
        assert!(QuotaTariff::new("ok", UsageType::Volume, Decimal::ONE, t0).validate().is_ok());
        assert!(QuotaTariff::default().validate().is_err());

        let monthly = QuotaTariff::new("m", UsageType::Volume, Decimal::ONE, t0).monthly(5).unwrap();
        assert!(monthly.validate().is_ok());
        assert!(QuotaTariff::new("m", UsageType::Volume, Decimal::ONE, t0).monthly(31).is_err());

        let mut inverted = QuotaTariff::new("inv", UsageType::Volume, Decimal::ONE, t0);
        inverted.end_date = Some(t0 - Duration::days(1));
        assert!(matches!(inverted.validate(), Err(QuotaError::Validation(_))));
    }
}
