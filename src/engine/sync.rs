//! Balance sync engine.
//!
//! Refreshes `from_balance`, `to_balance`, and `last_updated_at` for every
//! wallet with an address. Each wallet is an independent unit of work;
//! one failed lookup never stops the batch. Output order always equals
//! input order, whatever the concurrency.

use chrono::Local;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rpc::balance::BalanceSource;
use crate::types::WalletRecord;

/// What to do with a balance whose lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the previous value and leave the row unstamped.
    #[default]
    KeepPrior,
    /// Write zero and stamp the row anyway.
    ZeroFill,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Wallets in flight at once. Values below 1 are treated as 1.
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            failure_policy: FailurePolicy::KeepPrior,
        }
    }
}

/// A wallet whose refresh did not fully succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedWallet {
    pub alias: String,
    pub address: String,
    pub reason: String,
}

/// Result of one sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: Uuid,
    /// Every input record, refreshed where possible, in input order.
    pub records: Vec<WalletRecord>,
    /// Rows that were stamped with a new timestamp.
    pub refreshed: usize,
    /// Rows passed through because they have no address.
    pub without_address: usize,
    pub skipped: Vec<SkippedWallet>,
}

impl SyncReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

enum RowStatus {
    NoAddress,
    Refreshed,
    Failed { stamped: bool, reason: String },
}

/// Drives a [`BalanceSource`] across a wallet record set.
pub struct BalanceSyncEngine<S> {
    source: S,
    options: SyncOptions,
}

impl<S: BalanceSource> BalanceSyncEngine<S> {
    pub fn new(source: S, options: SyncOptions) -> Self {
        Self { source, options }
    }

    /// Refresh every record and return the new set. The input is consumed,
    /// never mutated in place for the caller.
    pub async fn sync<I>(&self, records: I) -> SyncReport
    where
        I: IntoIterator<Item = WalletRecord>,
    {
        let run_id = Uuid::new_v4();
        let concurrency = self.options.concurrency.max(1);
        info!(%run_id, concurrency, policy = ?self.options.failure_policy, "Balance sync started");

        let outcomes: Vec<(WalletRecord, RowStatus)> = stream::iter(records)
            .map(|record| self.sync_record(record))
            .buffered(concurrency)
            .collect()
            .await;

        let mut report = SyncReport {
            run_id,
            records: Vec::with_capacity(outcomes.len()),
            refreshed: 0,
            without_address: 0,
            skipped: Vec::new(),
        };

        for (record, status) in outcomes {
            match status {
                RowStatus::NoAddress => report.without_address += 1,
                RowStatus::Refreshed => report.refreshed += 1,
                RowStatus::Failed { stamped, reason } => {
                    if stamped {
                        report.refreshed += 1;
                    }
                    report.skipped.push(SkippedWallet {
                        alias: record.alias.clone(),
                        address: record.address.clone(),
                        reason,
                    });
                }
            }
            report.records.push(record);
        }

        info!(
            %run_id,
            total = report.records.len(),
            refreshed = report.refreshed,
            without_address = report.without_address,
            skipped = report.skipped_count(),
            "Balance sync complete"
        );
        report
    }

    async fn sync_record(&self, mut record: WalletRecord) -> (WalletRecord, RowStatus) {
        if !record.has_address() {
            debug!(alias = %record.alias, "No address, row left untouched");
            return (record, RowStatus::NoAddress);
        }

        debug!(wallet = %record, "Refreshing wallet");
        let address = record.address.clone();
        let mut failures = Vec::new();

        if let Some(token) = record.from_token.clone() {
            self.refresh(&address, &token, "from", &mut record.from_balance, &mut failures)
                .await;
        }
        if let Some(token) = record.to_token.clone() {
            self.refresh(&address, &token, "to", &mut record.to_balance, &mut failures)
                .await;
        }

        let stamp = failures.is_empty() || self.options.failure_policy == FailurePolicy::ZeroFill;
        if stamp {
            record.last_updated_at = Some(Local::now().naive_local());
        }

        if failures.is_empty() {
            (record, RowStatus::Refreshed)
        } else {
            let reason = failures.join("; ");
            warn!(wallet = %record, reason = %reason, "Wallet refresh incomplete");
            (record, RowStatus::Failed { stamped: stamp, reason })
        }
    }

    async fn refresh(
        &self,
        address: &str,
        token: &str,
        side: &str,
        slot: &mut Option<Decimal>,
        failures: &mut Vec<String>,
    ) {
        match self.source.try_resolve_balance(address, token).await {
            Ok(balance) => {
                debug!(address, token, side, %balance, "Balance resolved");
                *slot = Some(balance);
            }
            Err(e) => {
                failures.push(format!("{side} token {token}: {e}"));
                if self.options.failure_policy == FailurePolicy::ZeroFill {
                    *slot = Some(Decimal::ZERO);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
