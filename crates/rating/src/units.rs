//! Conversion of tariff values into quota used, per usage unit.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use quota_core::{QuotaError, QuotaResult, UsageUnit};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Bytes in a gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Scale applied to per-hour costs and byte-to-GiB conversions.
pub const RATE_SCALE: u32 = 8;

fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Number of hours in the calendar month containing `at`.
pub fn hours_in_month(at: DateTime<Utc>) -> Decimal {
    let (year, month) = (at.year(), at.month());
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let days = match (first, next) {
        (Some(first), Some(next)) => (next - first).num_days(),
        _ => 30,
    };
    Decimal::from(days * 24)
}

/// Monthly cost spread over the hours of a month.
pub fn cost_per_hour(cost_per_month: Decimal, hours_in_month: Decimal) -> QuotaResult<Decimal> {
    if hours_in_month.is_zero() {
        return Err(QuotaError::Validation("hours in month must not be zero".into()));
    }
    Ok(round_rate(cost_per_month / hours_in_month))
}

pub fn decimal_from_f64(value: f64) -> QuotaResult<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| QuotaError::Validation(format!("usage [{}] is not representable", value)))
}

/// Quota used by `raw_usage` (hours, bytes or operations depending on the
/// unit) of a resource of `size` bytes, at `value` per unit.
pub fn quota_used(
    unit: UsageUnit,
    raw_usage: f64,
    size: Option<u64>,
    value: Decimal,
    hours_in_month: Decimal,
) -> QuotaResult<Decimal> {
    if value.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let raw = decimal_from_f64(raw_usage)?;
    let gib = Decimal::from(GIB);

    let used = match unit {
        UsageUnit::ComputeMonth | UsageUnit::IpMonth | UsageUnit::PolicyMonth => {
            raw.checked_mul(cost_per_hour(value, hours_in_month)?)
        }
        UsageUnit::Gb => round_rate(raw / gib).checked_mul(value),
        UsageUnit::GbMonth => {
            let gb_in_use = round_rate(Decimal::from(size.unwrap_or(0)) / gib);
            raw.checked_mul(cost_per_hour(value, hours_in_month)?)
                .and_then(|v| v.checked_mul(gb_in_use))
        }
        UsageUnit::Bytes | UsageUnit::Iops => raw.checked_mul(value),
    };

    used.ok_or_else(|| {
        QuotaError::Validation(format!(
            "quota used for [{}] {} at [{}] overflows",
            raw_usage, unit, value
        ))
    })
}
