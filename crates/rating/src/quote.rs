//! Price estimates for resources that do not exist yet.

use chrono::{DateTime, Utc};
use quota_core::{QuotaError, QuotaResult, UsageType, UsageUnit};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::preset::PresetVariables;
use crate::rule::{EvaluationContext, RuleEvaluator};
use crate::tariff::QuotaTariff;
use crate::tariff_store::TariffStore;
use crate::units;

/// One quoting request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceToQuote {
    /// Defaults to the request's position in the list when blank.
    #[serde(default)]
    pub id: String,
    pub usage_type: String,
    pub volume_to_quote: u64,
    #[serde(default)]
    pub metadata: Option<PresetVariables>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    pub id: String,
    pub usage_type: UsageType,
    pub quote: Decimal,
    pub currency: String,
}

pub struct QuotingService {
    tariffs: Arc<dyn TariffStore>,
    rules: Arc<RuleEvaluator>,
    currency_symbol: String,
}

impl QuotingService {
    pub fn new(tariffs: Arc<dyn TariffStore>, rules: Arc<RuleEvaluator>, currency_symbol: impl Into<String>) -> Self {
        Self {
            tariffs,
            rules,
            currency_symbol: currency_symbol.into(),
        }
    }

    pub fn quote(&self, requests: &[ResourceToQuote]) -> QuotaResult<Vec<QuoteResult>> {
        self.quote_at(requests, Utc::now())
    }

    /// Quotes every request against the tariffs effective at `as_of`.
    pub fn quote_at(&self, requests: &[ResourceToQuote], as_of: DateTime<Utc>) -> QuotaResult<Vec<QuoteResult>> {
        if requests.is_empty() {
            return Err(QuotaError::Validation("no resources were informed for quoting".into()));
        }

        let mut usage_types = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            let usage_type = UsageType::from_quota_name(&request.usage_type).ok_or_else(|| {
                QuotaError::Validation(format!(
                    "quoting field \"usageType\" value [{}] at index [{}] is not a valid usage type",
                    request.usage_type, index
                ))
            })?;
            usage_types.push(usage_type);
        }

        let mut tariffs_by_type: HashMap<UsageType, Vec<QuotaTariff>> = HashMap::new();
        for usage_type in &usage_types {
            if !tariffs_by_type.contains_key(usage_type) {
                let found = self.tariffs.find_tariffs_for_type(usage_type.code(), as_of)?;
                tariffs_by_type.insert(*usage_type, found);
            }
        }

        let hours_in_month = units::hours_in_month(as_of);
        let mut results = Vec::with_capacity(requests.len());
        for (index, (request, usage_type)) in requests.iter().zip(usage_types).enumerate() {
            let id = if request.id.trim().is_empty() {
                index.to_string()
            } else {
                request.id.clone()
            };
            let tariffs = tariffs_by_type.get(&usage_type).map(Vec::as_slice).unwrap_or(&[]);
            let quote = self.quote_one(&id, request, usage_type, tariffs, hours_in_month)?;
            debug!(quote_id = %id, usage_type = %usage_type, quote = %quote, "Quoted resource");
            results.push(QuoteResult {
                id,
                usage_type,
                quote,
                currency: self.currency_symbol.clone(),
            });
        }

        let total = results
            .iter()
            .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.quote))
            .ok_or_else(|| QuotaError::Validation("total of the quotes overflows".into()))?;
        info!(quotes = results.len(), total = %total, "Resources quoted");
        Ok(results)
    }

    fn quote_one(
        &self,
        id: &str,
        request: &ResourceToQuote,
        usage_type: UsageType,
        tariffs: &[QuotaTariff],
        hours_in_month: Decimal,
    ) -> QuotaResult<Decimal> {
        if tariffs.is_empty() || request.volume_to_quote == 0 {
            return Ok(Decimal::ZERO);
        }

        let context = match &request.metadata {
            Some(metadata) => Some(EvaluationContext::from_presets(metadata)?),
            None => None,
        };

        let mut monthly_cost = Decimal::ZERO;
        for tariff in tariffs {
            match self.rules.tariff_value(tariff, context.as_ref()) {
                Ok(value) => {
                    monthly_cost = monthly_cost
                        .checked_add(value)
                        .ok_or_else(|| QuotaError::Validation(format!("tariffs of quote [{}] overflow", id)))?;
                }
                Err(err) if err.is_recoverable() => {
                    warn!(quote_id = %id, tariff = %tariff, error = %err, "Activation rule failed while quoting; tariff ignored");
                }
                Err(err) => return Err(err),
            }
        }

        let volume = Decimal::from(request.volume_to_quote);
        let rate = if usage_type.unit() == UsageUnit::Gb {
            monthly_cost
        } else {
            units::cost_per_hour(monthly_cost, hours_in_month)?
        };
        rate.checked_mul(volume)
            .ok_or_else(|| QuotaError::Validation(format!("quote [{}] overflows", id)))
    }
}
