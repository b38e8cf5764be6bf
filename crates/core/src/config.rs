use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CLOUD_QUOTA__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub rules: RuleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_enabled")]
    pub enabled: bool,
    /// Upper bound on accounts aggregated concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Currency label attached to quoted values. Never converted.
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageConfig {
    /// Clamp parse windows ending in the future to the current instant.
    #[serde(default = "default_clamp_to_now")]
    pub clamp_to_now: bool,
    /// Length of one aggregation window in hours.
    #[serde(default = "default_aggregation_range_hours")]
    pub aggregation_range_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_max_rule_length")]
    pub max_rule_length: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Parsed rules kept in memory. Zero disables the cache.
    #[serde(default = "default_max_cached_rules")]
    pub max_cached_rules: usize,
}

// Default functions
fn default_node_id() -> String {
    "usage-01".to_string()
}
fn default_quota_enabled() -> bool {
    true
}
fn default_max_workers() -> usize {
    4
}
fn default_currency_symbol() -> String {
    "$".to_string()
}
fn default_clamp_to_now() -> bool {
    true
}
fn default_aggregation_range_hours() -> u32 {
    24
}
fn default_max_rule_length() -> usize {
    4096
}
fn default_max_depth() -> usize {
    64
}
fn default_max_cached_rules() -> usize {
    1024
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: default_quota_enabled(),
            max_workers: default_max_workers(),
            currency_symbol: default_currency_symbol(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            clamp_to_now: default_clamp_to_now(),
            aggregation_range_hours: default_aggregation_range_hours(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            max_rule_length: default_max_rule_length(),
            max_depth: default_max_depth(),
            max_cached_rules: default_max_cached_rules(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            quota: QuotaConfig::default(),
            usage: UsageConfig::default(),
            rules: RuleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CLOUD_QUOTA")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
