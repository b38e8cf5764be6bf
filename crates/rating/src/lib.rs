//! Rating side of the quota pipeline.
//!
//! Tariffs price usage types. For every account and period the aggregation
//! engine rates normalized usage records against the tariffs effective at
//! the time, evaluating each tariff's activation rule against the preset
//! variables of the record, and hands the finalized period to a billing
//! writer. The same tariffs and rules back resource quoting.

pub mod batch;
pub mod engine;
pub mod preset;
pub mod quote;
pub mod rule;
pub mod tariff;
pub mod tariff_store;
pub mod units;
pub mod writer;

pub use batch::{AccountOutcome, AccountReport, BatchReport, QuotaBatchJob};
pub use engine::{FinalizedPeriod, PeriodAggregation, PeriodState, QuotaAggregationEngine, QuotaUsageLine};
pub use preset::{Inventory, InventoryLookup, PresetVariableBuilder, PresetVariables, ProcessedData};
pub use quote::{QuoteResult, QuotingService, ResourceToQuote};
pub use rule::{EvaluationContext, RuleEvaluator, RuleValue};
pub use tariff::{ProcessingPeriod, QuotaTariff};
pub use tariff_store::{InMemoryTariffStore, TariffStore};
pub use writer::{BillingRecordWriter, InMemoryBillingWriter, QuotaStatement};
