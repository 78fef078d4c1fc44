//! Confirmation sheet files.
//!
//! One file per generation run, named after the local time it was
//! generated. Sheets are created with `create_new` and never rewritten.

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{format_balance, parse_decimal};
use crate::types::{ConfirmationRow, TraderError, TraderResult, BALANCE_DP};

pub const SHEET_PREFIX: &str = "trade_confirmation_sheet_";

const SHEET_COLUMNS: [&str; 10] = [
    "wallet_alias",
    "wallet_address",
    "from_token_address",
    "to_token_address",
    "from_balance_before_execute",
    "to_balance_before_execute",
    "pct_of_balance",
    "coin_amount",
    "delay_seconds",
    "slippage_in_pct",
];

const SHEET_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Upper bound on same-second sheets before giving up.
const MAX_SHEETS_PER_SECOND: u32 = 1000;

/// File name for a sheet generated at `at`.
pub fn sheet_file_name(at: NaiveDateTime) -> String {
    format!("{SHEET_PREFIX}{}.csv", at.format(SHEET_STAMP_FORMAT))
}

/// File name for the `seq`-th sheet generated within the same second.
/// `seq` 0 is the plain name.
fn sequenced_file_name(at: NaiveDateTime, seq: u32) -> String {
    if seq == 0 {
        sheet_file_name(at)
    } else {
        format!("{SHEET_PREFIX}{}_{seq}.csv", at.format(SHEET_STAMP_FORMAT))
    }
}

/// Ordering key of a sheet file name: its timestamp, then its sequence.
fn sheet_key(name: &str) -> Option<(NaiveDateTime, u32)> {
    let stem = name.strip_prefix(SHEET_PREFIX)?.strip_suffix(".csv")?;
    let (stamp, seq) = match stem.get(15..) {
        Some("") => (stem, 0),
        Some(rest) => (stem.get(..15)?, rest.strip_prefix('_')?.parse().ok()?),
        None => return None,
    };
    let at = NaiveDateTime::parse_from_str(stamp, SHEET_STAMP_FORMAT).ok()?;
    Some((at, seq))
}

/// Write `rows` as a new sheet in `dir`. Existing sheets are never
/// touched; a sheet from the same second gets a `_<n>` suffix.
pub fn write_sheet(dir: &Path, rows: &[ConfirmationRow], at: NaiveDateTime) -> TraderResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let (path, file) = create_sheet_file(dir, at)?;
    let mut writer = Writer::from_writer(file);
    writer.write_record(SHEET_COLUMNS)?;
    for row in rows {
        writer.write_record([
            row.wallet_alias.clone(),
            row.wallet_address.clone(),
            row.from_token.clone(),
            row.to_token.clone(),
            format_balance(row.from_balance_before),
            format_balance(row.to_balance_before),
            row.pct_display(),
            format_balance(Some(row.coin_amount)),
            row.delay_seconds.to_string(),
            row.slippage_in_pct.clone(),
        ])?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = rows.len(), "Confirmation sheet written");
    Ok(path)
}

fn create_sheet_file(dir: &Path, at: NaiveDateTime) -> TraderResult<(PathBuf, File)> {
    for seq in 0..MAX_SHEETS_PER_SECOND {
        let path = dir.join(sequenced_file_name(at, seq));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Sheet name taken, trying next");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(TraderError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("too many sheets for {} in {}", at.format(SHEET_STAMP_FORMAT), dir.display()),
    )))
}

#[derive(Debug, Deserialize)]
struct SheetRow {
    wallet_alias: String,
    wallet_address: String,
    from_token_address: String,
    to_token_address: String,
    from_balance_before_execute: String,
    to_balance_before_execute: String,
    pct_of_balance: String,
    coin_amount: String,
    delay_seconds: String,
    slippage_in_pct: String,
}

/// Read a sheet back, e.g. to report what is about to be executed.
pub fn read_sheet(path: &Path) -> TraderResult<Vec<ConfirmationRow>> {
    if !path.exists() {
        return Err(TraderError::NotFound(path.to_path_buf()));
    }

    let file = path.display().to_string();
    let mut reader = ReaderBuilder::new().from_path(path)?;
    let mut rows = Vec::new();

    for (i, row) in reader.deserialize::<SheetRow>().enumerate() {
        let row: SheetRow = row?;
        let invalid = |message: String| TraderError::InvalidRecord {
            file: file.clone(),
            row: i + 1,
            message,
        };
        let decimal = |cell: &str| {
            parse_decimal(cell).map_err(|e| invalid(format!("bad number {cell:?}: {e}")))
        };

        let pct_of_balance = decimal(row.pct_of_balance.trim_end_matches('%'))?.unwrap_or_default();
        let coin_amount = decimal(row.coin_amount.as_str())?
            .unwrap_or_default()
            .round_dp(BALANCE_DP);
        let delay_seconds = row
            .delay_seconds
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(format!("bad delay_seconds: {e}")))?;

        rows.push(ConfirmationRow {
            wallet_alias: row.wallet_alias,
            wallet_address: row.wallet_address,
            from_token: row.from_token_address,
            to_token: row.to_token_address,
            from_balance_before: decimal(row.from_balance_before_execute.as_str())?,
            to_balance_before: decimal(row.to_balance_before_execute.as_str())?,
            pct_of_balance,
            coin_amount,
            delay_seconds,
            slippage_in_pct: row.slippage_in_pct,
        });
    }

    debug!(path = %path.display(), rows = rows.len(), "Confirmation sheet read");
    Ok(rows)
}

/// Most recent sheet in `dir`, by the timestamp embedded in its name.
pub fn latest_sheet(dir: &Path) -> TraderResult<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<((NaiveDateTime, u32), PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(key) = sheet_key(&name) else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| key > *best) {
            latest = Some((key, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Sum of `coin_amount` over `rows`.
pub fn total_amount(rows: &[ConfirmationRow]) -> Decimal {
    rows.iter().map(|r| r.coin_amount).sum()
}
