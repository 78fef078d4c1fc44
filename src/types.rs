//! Shared types for DexTrader.
//!
//! The wallet ledger row, the order row, and the confirmation row form the
//! data model used by the sync engine, the allocator, and the record store.
//! The error taxonomy lives here too so every layer can depend on it
//! without circular references.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Mint address used to denote the chain's native asset (SOL).
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Fractional digits kept for every balance and allocated amount.
pub const BALANCE_DP: u32 = 6;

/// Fractional digits shown for `pct_of_balance`.
pub const PCT_DP: u32 = 2;

/// Timestamp layout used in the `lastUpdatedOn` ledger column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Values of the `selected` column that mark a wallet for partial sync.
const SELECTED_FLAGS: [&str; 3] = ["yes", "true", "1"];

/// Whether a token identifier refers to the native asset.
pub fn is_native(token: &str) -> bool {
    token == NATIVE_MINT
}

// ---------------------------------------------------------------------------
// Wallet ledger
// ---------------------------------------------------------------------------

/// One managed wallet, one row of the wallet ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Display name.
    pub alias: String,
    /// Ledger account identifier. Rows with an empty address are never synced.
    pub address: String,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    /// `None` until the first successful sync.
    pub from_balance: Option<Decimal>,
    pub to_balance: Option<Decimal>,
    pub last_updated_at: Option<NaiveDateTime>,
    /// Raw flag text, kept verbatim so a save does not rewrite it.
    pub selected: String,
}

impl WalletRecord {
    pub fn new(alias: &str, address: &str) -> Self {
        Self {
            alias: alias.to_string(),
            address: address.to_string(),
            from_token: None,
            to_token: None,
            from_balance: None,
            to_balance: None,
            last_updated_at: None,
            selected: String::new(),
        }
    }

    /// Builder-style helper for the token pair.
    pub fn with_tokens(mut self, from_token: &str, to_token: &str) -> Self {
        self.from_token = non_empty(from_token);
        self.to_token = non_empty(to_token);
        self
    }

    pub fn has_address(&self) -> bool {
        !self.address.trim().is_empty()
    }

    /// Case-insensitive match against `yes` / `true` / `1`. Empty is not selected.
    pub fn is_selected(&self) -> bool {
        let flag = self.selected.trim().to_lowercase();
        SELECTED_FLAGS.contains(&flag.as_str())
    }

    /// Key used to merge refreshed rows back into the full ledger.
    pub fn key(&self) -> (&str, &str) {
        (self.alias.as_str(), self.address.as_str())
    }
}

impl fmt::Display for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.address)
    }
}

/// Which ledger to load and how to filter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Full initial ledger, no filtering.
    UpdateAll,
    /// Working ledger, only rows flagged as selected.
    UpdateSelected,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::UpdateAll => write!(f, "update_all"),
            LoadMode::UpdateSelected => write!(f, "update_selected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// A trading intent: move `coin_amount` of `from_token` into `to_token`,
/// split across every wallet that holds `from_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub from_token: String,
    pub to_token: String,
    /// Aggregate quantity across all matching wallets.
    pub coin_amount: Decimal,
    /// Raw slippage text, may end with `%`.
    pub slippage_pct: String,
    pub delay_seconds: u64,
}

impl Order {
    /// Slippage with any trailing `%` removed.
    pub fn slippage(&self) -> &str {
        self.slippage_pct.trim().trim_end_matches('%').trim_end()
    }
}

// ---------------------------------------------------------------------------
// Confirmation sheet
// ---------------------------------------------------------------------------

/// One (order, wallet) allocation. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRow {
    pub wallet_alias: String,
    pub wallet_address: String,
    pub from_token: String,
    pub to_token: String,
    pub from_balance_before: Option<Decimal>,
    pub to_balance_before: Option<Decimal>,
    /// This wallet's share of its balance, rounded to two places.
    pub pct_of_balance: Decimal,
    /// Absolute amount for this wallet, rounded to six places.
    pub coin_amount: Decimal,
    pub delay_seconds: u64,
    pub slippage_in_pct: String,
}

impl ConfirmationRow {
    /// `pct_of_balance` as shown on the sheet, e.g. `20.00%`.
    pub fn pct_display(&self) -> String {
        format!("{:.2}%", self.pct_of_balance.round_dp(PCT_DP))
    }
}

/// A persisted confirmation sheet.
#[derive(Debug, Clone)]
pub struct ConfirmationSheet {
    pub path: PathBuf,
    pub rows: Vec<ConfirmationRow>,
}

/// Balance of one SPL token account as reported by `jsonParsed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub mint: String,
    /// Raw amount in the token's smallest unit.
    pub raw_amount: String,
    pub decimals: u8,
    /// Human amount, quantized to six places.
    pub ui_amount: Decimal,
}

impl TokenBalance {
    /// The owner holds no account for this mint.
    pub fn empty(mint: &str) -> Self {
        Self {
            mint: mint.to_string(),
            raw_amount: "0".to_string(),
            decimals: 0,
            ui_amount: Decimal::ZERO,
        }
    }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for DexTrader.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error from {method}: {message}")]
    Rpc { method: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(
        "Order amount ({requested}) exceeds total balance ({available}) for token {token}. \
         Order cannot exceed 100% of total balance."
    )]
    InsufficientBalance {
        token: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid record in {file} row {row}: {message}")]
    InvalidRecord {
        file: String,
        row: usize,
        message: String,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TraderResult<T> = std::result::Result<T, TraderError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
