//! In-memory Solana JSON-RPC node for integration testing.
//!
//! Answers `getBalance` and `getTokenAccountsByOwner` from maps the test
//! controls. Addresses marked as down get HTTP 500 on every call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dextrader::config::RpcSettings;
use dextrader::rpc::balance::{RpcBalanceResolver, TokenRetry};
use dextrader::rpc::{HttpReply, HttpTransport, RpcClient};
use dextrader::types::{TraderError, TraderResult};

#[derive(Default)]
pub struct FakeNode {
    lamports: HashMap<String, u64>,
    /// (owner, mint) -> uiAmountString
    tokens: HashMap<(String, String), String>,
    down: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lamports(mut self, address: &str, lamports: u64) -> Self {
        self.lamports.insert(address.to_string(), lamports);
        self
    }

    pub fn with_token(mut self, address: &str, mint: &str, ui_amount: &str) -> Self {
        self.tokens
            .insert((address.to_string(), mint.to_string()), ui_amount.to_string());
        self
    }

    pub fn with_down(mut self, address: &str) -> Self {
        self.down.insert(address.to_string());
        self
    }

    /// Methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// A resolver wired to this node, with no delay between token retries.
    pub fn resolver(self: &Arc<Self>) -> RpcBalanceResolver {
        let rpc = RpcClient::with_transport(RpcSettings::new("http://fake-node"), self.clone());
        RpcBalanceResolver::new(
            rpc,
            TokenRetry {
                attempts: 3,
                delay: Duration::ZERO,
            },
        )
    }

    fn answer(&self, method: &str, params: &Value) -> Value {
        let owner = params[0].as_str().unwrap_or_default().to_string();
        match method {
            "getBalance" => {
                let lamports = self.lamports.get(&owner).copied().unwrap_or(0);
                json!({ "context": { "slot": 1 }, "value": lamports })
            }
            "getTokenAccountsByOwner" => {
                let mint = params[1]["mint"].as_str().unwrap_or_default().to_string();
                let accounts = match self.tokens.get(&(owner, mint)) {
                    Some(ui) => vec![json!({
                        "pubkey": "token-account",
                        "account": { "data": { "parsed": { "info": {
                            "tokenAmount": {
                                "amount": "0",
                                "decimals": 6,
                                "uiAmountString": ui,
                            }
                        }}}}
                    })],
                    None => vec![],
                };
                json!({ "context": { "slot": 1 }, "value": accounts })
            }
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl HttpTransport for FakeNode {
    async fn post_json(&self, _url: &str, body: &Value) -> TraderResult<HttpReply> {
        let method = body["method"]
            .as_str()
            .ok_or_else(|| TraderError::Parse("request without method".into()))?;
        let params = &body["params"];
        self.calls.lock().unwrap().push(method.to_string());

        if params[0].as_str().is_some_and(|a| self.down.contains(a)) {
            return Ok(HttpReply {
                status: 500,
                retry_after: None,
                body: "node unavailable".into(),
            });
        }

        let result = self.answer(method, params);
        Ok(HttpReply {
            status: 200,
            retry_after: None,
            body: json!({ "jsonrpc": "2.0", "id": body["id"], "result": result }).to_string(),
        })
    }
}
