//! Scheduled quota run: parse then aggregate every account of a billing cycle.
//!
//! Accounts are independent, so each one gets its own blocking worker.
//! Concurrency is bounded by a semaphore sized from `quota.max_workers`.

use chrono::{DateTime, Utc};
use quota_core::{Account, QuotaError};
use quota_usage::UsageParsing;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::engine::QuotaAggregationEngine;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountOutcome {
    Completed {
        lines_parsed: usize,
        quota_lines: usize,
        total_quota_used: Decimal,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub account_id: u64,
    #[serde(flatten)]
    pub outcome: AccountOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountReport>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, AccountOutcome::Cancelled))
    }

    fn count(&self, predicate: impl Fn(&AccountOutcome) -> bool) -> usize {
        self.accounts.iter().filter(|a| predicate(&a.outcome)).count()
    }
}

pub struct QuotaBatchJob {
    parsing: Arc<UsageParsing>,
    engine: Arc<QuotaAggregationEngine>,
    max_workers: usize,
    cancel: Arc<AtomicBool>,
}

impl QuotaBatchJob {
    pub fn new(parsing: Arc<UsageParsing>, engine: Arc<QuotaAggregationEngine>, max_workers: usize) -> Self {
        Self {
            parsing,
            engine,
            max_workers: max_workers.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops workers at their next record or account boundary. Periods that
    /// were not finalized are left uncommitted.
    pub fn cancel(&self) {
        warn!("Quota batch job cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Clears a previous cancellation so the job can be run again.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub async fn run(&self, accounts: Vec<Account>, start: DateTime<Utc>, end: DateTime<Utc>) -> BatchReport {
        let started_at = Utc::now();
        info!(
            accounts = accounts.len(),
            max_workers = self.max_workers,
            start = %start,
            end = %end,
            "Starting quota batch job"
        );

        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();
        let mut reports = Vec::with_capacity(accounts.len());

        for account in accounts {
            if self.is_cancelled() {
                reports.push(AccountReport {
                    account_id: account.id,
                    outcome: AccountOutcome::Cancelled,
                });
                continue;
            }
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Worker pool closed");
                    break;
                }
            };

            let parsing = Arc::clone(&self.parsing);
            let engine = Arc::clone(&self.engine);
            let cancel = Arc::clone(&self.cancel);
            workers.spawn_blocking(move || {
                let _permit = permit;
                process_account(&parsing, &engine, &account, start, end, &cancel)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(error = %e, "Quota worker panicked");
                    metrics::counter!("quota.accounts_failed").increment(1);
                }
            }
        }
        reports.sort_by_key(|r| r.account_id);

        let report = BatchReport {
            start,
            end,
            started_at,
            finished_at: Utc::now(),
            accounts: reports,
        };
        info!(
            completed = report.completed(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "Quota batch job finished"
        );
        report
    }
}

fn process_account(
    parsing: &UsageParsing,
    engine: &QuotaAggregationEngine,
    account: &Account,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &AtomicBool,
) -> AccountReport {
    let outcome = match run_account(parsing, engine, account, start, end, cancel) {
        Ok(outcome) => {
            metrics::counter!("quota.accounts_processed").increment(1);
            outcome
        }
        Err(QuotaError::Cancelled(_)) => AccountOutcome::Cancelled,
        Err(e) => {
            error!(account = %account, error = %e, "Quota processing failed for account");
            metrics::counter!("quota.accounts_failed").increment(1);
            AccountOutcome::Failed { error: e.to_string() }
        }
    };
    AccountReport {
        account_id: account.id,
        outcome,
    }
}

fn run_account(
    parsing: &UsageParsing,
    engine: &QuotaAggregationEngine,
    account: &Account,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &AtomicBool,
) -> Result<AccountOutcome, QuotaError> {
    if cancel.load(Ordering::SeqCst) {
        return Err(QuotaError::Cancelled(format!("account [{}] not started", account.id)));
    }
    let lines_parsed = parsing
        .parse_account(account, start, end)?
        .iter()
        .map(|o| o.parsed)
        .sum();
    let period = engine.aggregate_account(account, start, end, cancel)?;
    Ok(AccountOutcome::Completed {
        lines_parsed,
        quota_lines: period.lines.len(),
        total_quota_used: period.total_quota_used,
    })
}
