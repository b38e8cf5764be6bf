//! Usage side of the quota pipeline.
//!
//! Raw usage intervals are recorded per resource, clipped to a reporting
//! window by the parsers and persisted as normalized usage records that the
//! rating engine consumes. Data is kept in DashMap; a relational store plugs
//! in behind the `UsageStore` trait.

pub mod interval;
pub mod parser;
pub mod record;
pub mod store;

pub use interval::UsageInterval;
pub use parser::{IntervalUsageParser, ParseOutcome, UsageParser, UsageParsing};
pub use record::UsageRecord;
pub use store::{InMemoryUsageStore, UsageStore};
