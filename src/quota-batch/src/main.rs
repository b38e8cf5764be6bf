//! Quota batch runner: parses usage, rates it against the tariff catalogue
//! and prints the per-account outcome. Also exposes quoting and activation
//! rule tooling over the same catalogue.
//!
//! Stores are in-memory and seeded with a sample catalogue on start-up.

mod demo;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use quota_core::config::AppConfig;
use quota_rating::preset::Inventory;
use quota_rating::{
    InMemoryBillingWriter, InMemoryTariffStore, PresetVariables, QuotaAggregationEngine, QuotaBatchJob,
    QuotingService, ResourceToQuote, RuleEvaluator,
};
use quota_usage::{InMemoryUsageStore, UsageParsing};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "quota-batch")]
#[command(about = "Usage parsing and quota rating batch runner")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CLOUD_QUOTA__NODE_ID")]
    node_id: Option<String>,

    /// Accounts aggregated concurrently (overrides config)
    #[arg(long, env = "CLOUD_QUOTA__QUOTA__MAX_WORKERS")]
    max_workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and rate every account for one window
    Run {
        /// Window start, RFC 3339 or YYYY-MM-DD (default: end minus the aggregation range)
        #[arg(long, value_parser = parse_instant)]
        start: Option<DateTime<Utc>>,

        /// Window end, RFC 3339 or YYYY-MM-DD (default: now)
        #[arg(long, value_parser = parse_instant)]
        end: Option<DateTime<Utc>>,
    },

    /// Quote resources read as a JSON array from a file or stdin
    Quote {
        /// JSON file with the resources to quote (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// List the preset variables activation rules may reference
    Variables,

    /// Check that an activation rule parses and only uses known variables
    CheckRule {
        rule: String,
    },
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| format!("[{}] is neither an RFC 3339 instant nor a YYYY-MM-DD date", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quota_batch=info,quota_rating=info,quota_usage=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(max_workers) = cli.max_workers {
        config.quota.max_workers = max_workers;
    }

    info!(
        node_id = %config.node_id,
        quota_enabled = config.quota.enabled,
        max_workers = config.quota.max_workers,
        "Configuration loaded"
    );

    let rules = Arc::new(RuleEvaluator::new(&config.rules));

    match cli.command {
        Commands::Run { start, end } => run(&config, rules, start, end).await,
        Commands::Quote { file } => quote(&config, rules, file),
        Commands::Variables => {
            for path in PresetVariables::schema_paths() {
                println!("{}", path);
            }
            Ok(())
        }
        Commands::CheckRule { rule } => {
            rules.validate_rule(&rule)?;
            let variables = rules.extract_variables(&rule)?;
            println!("{}", serde_json::to_string_pretty(&variables)?);
            Ok(())
        }
    }
}

async fn run(
    config: &AppConfig,
    rules: Arc<RuleEvaluator>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    if !config.quota.enabled {
        warn!("Quota is disabled; nothing to do");
        return Ok(());
    }

    let end = end.unwrap_or_else(Utc::now);
    let start = start.unwrap_or_else(|| end - Duration::hours(i64::from(config.usage.aggregation_range_hours)));
    anyhow::ensure!(start <= end, "window start {} is after its end {}", start, end);

    let usage = Arc::new(InMemoryUsageStore::new());
    let tariffs = Arc::new(InMemoryTariffStore::new());
    let inventory = Arc::new(Inventory::new());
    let writer = Arc::new(InMemoryBillingWriter::new());

    demo::seed_demo_inventory(&inventory);
    demo::seed_demo_tariffs(tariffs.as_ref(), start)?;
    let accounts = demo::seed_demo_usage(usage.as_ref(), start)?;

    let parsing = Arc::new(UsageParsing::with_defaults(usage.clone(), config.usage.clamp_to_now));
    let engine = Arc::new(QuotaAggregationEngine::new(usage, tariffs, inventory, rules, writer.clone()));
    let job = Arc::new(QuotaBatchJob::new(parsing, engine, config.quota.max_workers));

    let canceller = Arc::clone(&job);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let ids: Vec<u64> = accounts.iter().map(|a| a.id).collect();
    let report = job.run(accounts, start, end).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    for id in ids {
        let statement = writer.statement(id)?;
        info!(account_id = id, periods = statement.periods, total = %statement.total, "Quota statement");
    }
    Ok(())
}

fn quote(config: &AppConfig, rules: Arc<RuleEvaluator>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let requests: Vec<ResourceToQuote> = serde_json::from_str(&raw)?;

    let tariffs = Arc::new(InMemoryTariffStore::new());
    let now = Utc::now();
    demo::seed_demo_tariffs(tariffs.as_ref(), now - Duration::days(365))?;

    let service = QuotingService::new(tariffs, rules, config.quota.currency_symbol.clone());
    let results = service.quote_at(&requests, now)?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
