//! Order table reader.
//!
//! Columns: `from_coin_address, to_coin_address, coin_amount, slippage_pct`
//! and an optional `delay_seconds`. Unlike the ledger, a bad order row is
//! an error: an order we cannot read must not be silently dropped.

use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use super::parse_decimal;
use crate::types::{Order, TraderError, TraderResult};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OrderRow {
    from_coin_address: String,
    to_coin_address: String,
    coin_amount: String,
    slippage_pct: String,
    delay_seconds: String,
}

impl OrderRow {
    fn is_blank(&self) -> bool {
        [
            &self.from_coin_address,
            &self.to_coin_address,
            &self.coin_amount,
            &self.slippage_pct,
            &self.delay_seconds,
        ]
        .iter()
        .all(|cell| cell.trim().is_empty())
    }
}

/// Read the order table at `path`.
///
/// `default_delay` fills `delay_seconds` when the column is absent or empty.
pub fn load_orders(path: &Path, default_delay: u64) -> TraderResult<Vec<Order>> {
    if !path.exists() {
        return Err(TraderError::NotFound(path.to_path_buf()));
    }

    let file = path.display().to_string();
    let invalid = |row: usize, message: String| TraderError::InvalidRecord {
        file: file.clone(),
        row,
        message,
    };

    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut orders = Vec::new();

    for (i, row) in reader.deserialize::<OrderRow>().enumerate() {
        let row_no = i + 1;
        let row = row?;
        if row.is_blank() {
            debug!(row = row_no, "Skipping blank order row");
            continue;
        }

        if row.from_coin_address.is_empty() || row.to_coin_address.is_empty() {
            return Err(invalid(row_no, "from/to coin address is required".into()));
        }

        let coin_amount = parse_decimal(&row.coin_amount)
            .map_err(|e| invalid(row_no, format!("bad coin_amount {:?}: {e}", row.coin_amount)))?
            .ok_or_else(|| invalid(row_no, "coin_amount is required".into()))?;
        if coin_amount < Decimal::ZERO {
            return Err(invalid(row_no, format!("coin_amount {coin_amount} is negative")));
        }

        let delay_seconds = if row.delay_seconds.is_empty() {
            default_delay
        } else {
            row.delay_seconds.parse::<u64>().map_err(|e| {
                invalid(row_no, format!("bad delay_seconds {:?}: {e}", row.delay_seconds))
            })?
        };

        orders.push(Order {
            from_token: row.from_coin_address,
            to_token: row.to_coin_address,
            coin_amount,
            slippage_pct: row.slippage_pct,
            delay_seconds,
        });
    }

    info!(path = %path.display(), orders = orders.len(), "Order table loaded");
    Ok(orders)
}
