pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{QuotaError, QuotaResult};
pub use types::{Account, AccountType, UsageType, UsageUnit};
