//! Allocation engine.
//!
//! Turns aggregate orders into per-wallet confirmation rows. Each wallet
//! holding the order's `from_token` trades the same fraction of its own
//! balance, so the rows sum back to the order amount (within rounding).

use chrono::Local;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::AllocationConfig;
use crate::storage::{orders, sheet};
use crate::types::{
    ConfirmationRow, ConfirmationSheet, Order, TraderError, TraderResult, WalletRecord,
    BALANCE_DP, PCT_DP,
};

#[derive(Debug, Clone)]
pub struct AllocationOptions {
    /// Delay applied to order rows that leave `delay_seconds` empty.
    pub default_delay_seconds: u64,
}

impl Default for AllocationOptions {
    fn default() -> Self {
        Self {
            default_delay_seconds: 5,
        }
    }
}

impl From<&AllocationConfig> for AllocationOptions {
    fn from(cfg: &AllocationConfig) -> Self {
        Self {
            default_delay_seconds: cfg.default_delay_seconds,
        }
    }
}

pub struct AllocationEngine {
    options: AllocationOptions,
}

impl AllocationEngine {
    pub fn new(options: AllocationOptions) -> Self {
        Self { options }
    }

    /// Compute confirmation rows without touching the filesystem.
    ///
    /// Rows come out in (order, then wallet) order. Any order larger than
    /// the total held across wallets aborts the whole batch.
    pub fn plan(&self, orders: &[Order], wallets: &[WalletRecord]) -> TraderResult<Vec<ConfirmationRow>> {
        let totals = total_balances(wallets);
        info!(orders = orders.len(), wallets = wallets.len(), tokens = totals.len(), "Planning allocation");

        let mut rows = Vec::new();
        for (i, order) in orders.iter().enumerate() {
            let Some(&total) = totals.get(order.from_token.as_str()) else {
                warn!(order = i + 1, token = %order.from_token, "No wallet holds this token, order skipped");
                continue;
            };

            if order.coin_amount > total {
                return Err(TraderError::InsufficientBalance {
                    token: order.from_token.clone(),
                    requested: order.coin_amount,
                    available: total,
                });
            }

            // Fraction of each wallet's balance to trade; at most 1.
            let share = if total.is_zero() {
                Decimal::ZERO
            } else {
                order.coin_amount / total
            };
            let pct = (share * dec!(100)).round_dp(PCT_DP);
            debug!(order = i + 1, token = %order.from_token, %total, %pct, "Order share computed");

            for wallet in wallets
                .iter()
                .filter(|w| w.from_token.as_deref() == Some(order.from_token.as_str()))
            {
                let balance = wallet.from_balance.unwrap_or_default();
                rows.push(ConfirmationRow {
                    wallet_alias: wallet.alias.clone(),
                    wallet_address: wallet.address.clone(),
                    from_token: order.from_token.clone(),
                    to_token: order.to_token.clone(),
                    from_balance_before: wallet.from_balance,
                    to_balance_before: wallet.to_balance,
                    pct_of_balance: pct,
                    coin_amount: (balance * share).round_dp(BALANCE_DP),
                    delay_seconds: order.delay_seconds,
                    slippage_in_pct: order.slippage().to_string(),
                });
            }
        }

        info!(rows = rows.len(), "Allocation planned");
        Ok(rows)
    }

    /// Plan, then persist the rows as a new sheet in `sheet_dir`.
    ///
    /// Nothing is written when planning fails.
    pub fn generate(
        &self,
        orders: &[Order],
        wallets: &[WalletRecord],
        sheet_dir: &Path,
    ) -> TraderResult<ConfirmationSheet> {
        let rows = self.plan(orders, wallets)?;
        let path = sheet::write_sheet(sheet_dir, &rows, Local::now().naive_local())?;
        Ok(ConfirmationSheet { path, rows })
    }

    /// Read the order table at `order_path` and [`generate`](Self::generate) from it.
    pub fn generate_from_table(
        &self,
        order_path: &Path,
        wallets: &[WalletRecord],
        sheet_dir: &Path,
    ) -> TraderResult<ConfirmationSheet> {
        let orders = orders::load_orders(order_path, self.options.default_delay_seconds)?;
        self.generate(&orders, wallets, sheet_dir)
    }

    /// Most recent sheet in `sheet_dir`, if any.
    pub fn latest_sheet(&self, sheet_dir: &Path) -> TraderResult<Option<PathBuf>> {
        sheet::latest_sheet(sheet_dir)
    }
}

/// Sum of `from_balance` per `from_token`. Unset balances count as zero.
fn total_balances(wallets: &[WalletRecord]) -> HashMap<&str, Decimal> {
    let mut totals: HashMap<&str, Decimal> = HashMap::new();
    for wallet in wallets {
        if let Some(token) = wallet.from_token.as_deref() {
            *totals.entry(token).or_default() += wallet.from_balance.unwrap_or_default();
        }
    }
    totals
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
