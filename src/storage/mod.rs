//! Persistence layer.
//!
//! The wallet ledger, the order table, and the confirmation sheets are flat
//! CSV files. This module owns the wallet ledger; `orders` and `sheet`
//! handle the other two.

pub mod orders;
pub mod sheet;

use chrono::NaiveDateTime;
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::types::{
    non_empty, LoadMode, TraderError, TraderResult, WalletRecord, BALANCE_DP, TIMESTAMP_FORMAT,
};

/// Ledger header, in file order.
pub const LEDGER_COLUMNS: [&str; 8] = [
    "wallet_alias",
    "wallet_address",
    "from_token_address",
    "to_token_address",
    "from_balance",
    "to_balance",
    "lastUpdatedOn",
    "selected",
];

/// On-disk shape of a ledger row. Every cell is text; conversion happens
/// in [`LedgerRow::into_record`] so a bad cell cannot sink the whole file.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct LedgerRow {
    wallet_alias: String,
    wallet_address: String,
    from_token_address: String,
    to_token_address: String,
    from_balance: String,
    to_balance: String,
    #[serde(rename = "lastUpdatedOn")]
    last_updated_on: String,
    selected: String,
}

impl LedgerRow {
    fn into_record(self, path: &Path, row: usize) -> WalletRecord {
        let from_balance = lenient_decimal(&self.from_balance, path, row, "from_balance");
        let to_balance = lenient_decimal(&self.to_balance, path, row, "to_balance");
        let last_updated_at = lenient_timestamp(&self.last_updated_on, path, row);

        WalletRecord {
            alias: self.wallet_alias.trim().to_string(),
            address: self.wallet_address.trim().to_string(),
            from_token: non_empty(&self.from_token_address),
            to_token: non_empty(&self.to_token_address),
            from_balance,
            to_balance,
            last_updated_at,
            selected: self.selected,
        }
    }

    fn from_record(record: &WalletRecord) -> Self {
        Self {
            wallet_alias: record.alias.clone(),
            wallet_address: record.address.clone(),
            from_token_address: record.from_token.clone().unwrap_or_default(),
            to_token_address: record.to_token.clone().unwrap_or_default(),
            from_balance: format_balance(record.from_balance),
            to_balance: format_balance(record.to_balance),
            last_updated_on: record
                .last_updated_at
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default(),
            selected: record.selected.clone(),
        }
    }
}

/// Balance cell text: six fractional digits, empty when unset.
pub fn format_balance(balance: Option<Decimal>) -> String {
    balance
        .map(|b| format!("{:.6}", b.round_dp(BALANCE_DP)))
        .unwrap_or_default()
}

/// Parse a decimal cell. Empty is `None`; a malformed value is an error.
pub(crate) fn parse_decimal(cell: &str) -> Result<Option<Decimal>, rust_decimal::Error> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(cell)
        .or_else(|_| Decimal::from_scientific(cell))
        .map(Some)
}

fn lenient_decimal(cell: &str, path: &Path, row: usize, column: &str) -> Option<Decimal> {
    parse_decimal(cell).unwrap_or_else(|e| {
        warn!(
            path = %path.display(),
            row,
            column,
            value = cell,
            error = %e,
            "Unreadable balance, treating as unset"
        );
        None
    })
}

fn lenient_timestamp(cell: &str, path: &Path, row: usize) -> Option<NaiveDateTime> {
    // Older ledgers carry the timestamp wrapped in literal quotes.
    let cell = cell.trim().trim_matches('"').trim();
    if cell.is_empty() {
        return None;
    }
    match NaiveDateTime::parse_from_str(cell, TIMESTAMP_FORMAT) {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!(path = %path.display(), row, value = cell, error = %e, "Unreadable timestamp");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Wallet store
// ---------------------------------------------------------------------------

/// Locations of the initial and working ledgers.
#[derive(Debug, Clone)]
pub struct LedgerPaths {
    pub initial: PathBuf,
    pub working: PathBuf,
}

impl From<&LedgerConfig> for LedgerPaths {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            initial: cfg.initial_path(),
            working: cfg.working_path(),
        }
    }
}

/// Loads, filters, and saves the wallet ledger.
#[derive(Debug, Clone)]
pub struct WalletStore {
    paths: LedgerPaths,
}

impl WalletStore {
    pub fn new(paths: LedgerPaths) -> Self {
        Self { paths }
    }

    pub fn working_path(&self) -> &Path {
        &self.paths.working
    }

    /// Load the ledger for `mode`: the full initial ledger, or the selected
    /// rows of the working ledger.
    pub fn load(&self, mode: LoadMode) -> TraderResult<Vec<WalletRecord>> {
        match mode {
            LoadMode::UpdateAll => {
                let records = Self::load_path(&self.paths.initial)?;
                info!(mode = %mode, rows = records.len(), "Processing all rows in ledger");
                Ok(records)
            }
            LoadMode::UpdateSelected => {
                let records = Self::load_path(&self.paths.working)?;
                let total = records.len();
                let selected: Vec<_> = records.into_iter().filter(|r| r.is_selected()).collect();
                if selected.is_empty() {
                    warn!(mode = %mode, total, "No rows selected for update");
                } else {
                    info!(mode = %mode, total, selected = selected.len(), "Selected rows loaded");
                }
                Ok(selected)
            }
        }
    }

    /// The whole working ledger, unfiltered.
    pub fn load_working(&self) -> TraderResult<Vec<WalletRecord>> {
        Self::load_path(&self.paths.working)
    }

    /// Read every row of a ledger file.
    pub fn load_path(path: &Path) -> TraderResult<Vec<WalletRecord>> {
        if !path.exists() {
            return Err(TraderError::NotFound(path.to_path_buf()));
        }

        // Short rows are allowed; their missing cells read as empty.
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)?;
        let mut records = Vec::new();
        for (i, row) in reader.deserialize::<LedgerRow>().enumerate() {
            match row {
                Ok(row) => records.push(row.into_record(path, i + 1)),
                Err(e) => warn!(
                    path = %path.display(),
                    row = i + 1,
                    error = %e,
                    "Unreadable ledger row, skipped"
                ),
            }
        }

        debug!(path = %path.display(), rows = records.len(), "Ledger loaded");
        Ok(records)
    }

    /// Write `records` to `path`, every field quoted.
    pub fn save(records: &[WalletRecord], path: &Path) -> TraderResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(LEDGER_COLUMNS)?;
        for record in records {
            writer.serialize(LedgerRow::from_record(record))?;
        }
        writer.flush()?;

        info!(path = %path.display(), rows = records.len(), "Ledger saved");
        Ok(())
    }

    pub fn save_working(&self, records: &[WalletRecord]) -> TraderResult<()> {
        Self::save(records, &self.paths.working)
    }
}

/// Replace rows of `ledger` with their refreshed counterparts from
/// `updated`, matched on `(alias, address)` in order of appearance.
/// Rows with no counterpart are kept as they are.
pub fn merge_into(ledger: Vec<WalletRecord>, updated: Vec<WalletRecord>) -> Vec<WalletRecord> {
    let mut pending: HashMap<(String, String), VecDeque<WalletRecord>> = HashMap::new();
    for record in updated {
        pending.entry(owned_key(&record)).or_default().push_back(record);
    }

    ledger
        .into_iter()
        .map(|row| {
            pending
                .get_mut(&owned_key(&row))
                .and_then(VecDeque::pop_front)
                .unwrap_or(row)
        })
        .collect()
}

fn owned_key(record: &WalletRecord) -> (String, String) {
    let (alias, address) = record.key();
    (alias.to_string(), address.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
