use thiserror::Error;

pub type QuotaResult<T> = Result<T, QuotaError>;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rule evaluation error: {0}")]
    RuleEvaluation(String),

    #[error("Data gap: {0}")]
    DataGap(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Aggregation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl QuotaError {
    /// Errors the aggregation run recovers from locally by skipping the
    /// offending tariff or record.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RuleEvaluation(_) | Self::DataGap(_))
    }
}

impl From<config::ConfigError> for QuotaError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
