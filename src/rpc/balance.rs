//! Balance resolution for native SOL and SPL tokens.
//!
//! Native balances come from `getBalance` (lamports). Token balances come
//! from `getTokenAccountsByOwner` with `jsonParsed` encoding and are retried
//! on any failure with a fixed delay, independently of the client's 429
//! backoff.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::RpcClient;
use crate::types::{is_native, TokenBalance, TraderError, TraderResult, BALANCE_DP};

/// Lamports per SOL.
const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Anything that can report a wallet's balance of a token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Resolve a balance, surfacing any failure to the caller.
    async fn try_resolve_balance(&self, address: &str, token: &str) -> TraderResult<Decimal>;

    /// Resolve a balance, downgrading failure to zero plus a warning.
    ///
    /// A zero from here cannot be told apart from a failed lookup; callers
    /// that care should use [`BalanceSource::try_resolve_balance`].
    async fn resolve_balance(&self, address: &str, token: &str) -> Decimal {
        match self.try_resolve_balance(address, token).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(address, token, error = %e, "Balance lookup failed, using zero");
                Decimal::ZERO
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RPC response shapes
// ---------------------------------------------------------------------------

/// `{ "context": {...}, "value": T }` wrapper used by both methods.
#[derive(Debug, Deserialize)]
struct RpcValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct KeyedAccount {
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    data: AccountData,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    parsed: ParsedAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAccountInfo {
    token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiTokenAmount {
    amount: String,
    decimals: u8,
    ui_amount_string: String,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Retry policy for token account lookups.
#[derive(Debug, Clone)]
pub struct TokenRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for TokenRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// [`BalanceSource`] backed by the JSON-RPC client.
#[derive(Clone)]
pub struct RpcBalanceResolver {
    rpc: RpcClient,
    token_retry: TokenRetry,
}

impl RpcBalanceResolver {
    pub fn new(rpc: RpcClient, token_retry: TokenRetry) -> Self {
        Self { rpc, token_retry }
    }

    /// SOL balance, rounded to six places.
    pub async fn native_balance(&self, address: &str) -> TraderResult<Decimal> {
        let result = self.rpc.call("getBalance", json!([address])).await?;
        let lamports: RpcValue<u64> = decode("getBalance", result)?;
        Ok(lamports_to_sol(lamports.value))
    }

    /// First token account of `mint` owned by `address`, retried with a
    /// fixed delay on any failure.
    pub async fn token_balance(&self, address: &str, mint: &str) -> TraderResult<TokenBalance> {
        let attempts = self.token_retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_token_balance(address, mint).await {
                Ok(balance) => return Ok(balance),
                Err(e) if attempt < attempts => {
                    warn!(
                        address,
                        mint,
                        attempt,
                        delay_secs = self.token_retry.delay.as_secs(),
                        error = %e,
                        "Token balance lookup failed, retrying"
                    );
                    tokio::time::sleep(self.token_retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(address, mint, attempts, error = %e, "Token balance lookup gave up");
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_token_balance(&self, address: &str, mint: &str) -> TraderResult<TokenBalance> {
        let params = json!([
            address,
            { "mint": mint },
            { "encoding": "jsonParsed" }
        ]);
        let result = self.rpc.call("getTokenAccountsByOwner", params).await?;
        let accounts: RpcValue<Vec<KeyedAccount>> = decode("getTokenAccountsByOwner", result)?;

        // One account per (owner, mint) is expected; extras are ignored.
        let Some(account) = accounts.value.into_iter().next() else {
            debug!(address, mint, "No token account for mint");
            return Ok(TokenBalance::empty(mint));
        };

        let amount = account.account.data.parsed.info.token_amount;
        let ui_amount = Decimal::from_str(amount.ui_amount_string.trim())
            .map_err(|e| {
                TraderError::Parse(format!(
                    "bad uiAmountString {:?} for mint {mint}: {e}",
                    amount.ui_amount_string
                ))
            })?
            .round_dp(BALANCE_DP);

        Ok(TokenBalance {
            mint: mint.to_string(),
            raw_amount: amount.amount,
            decimals: amount.decimals,
            ui_amount,
        })
    }
}

#[async_trait]
impl BalanceSource for RpcBalanceResolver {
    async fn try_resolve_balance(&self, address: &str, token: &str) -> TraderResult<Decimal> {
        if is_native(token) {
            self.native_balance(address).await
        } else {
            Ok(self.token_balance(address, token).await?.ui_amount)
        }
    }
}

/// Lamports to SOL, rounded to six places.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    (Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)).round_dp(BALANCE_DP)
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, result: Value) -> TraderResult<T> {
    serde_json::from_value(result)
        .map_err(|e| TraderError::Parse(format!("unexpected {method} result shape: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
