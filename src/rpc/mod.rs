//! Solana JSON-RPC client.
//!
//! Wraps a single endpoint. Every call is a JSON-RPC 2.0 POST; HTTP 429
//! responses are retried with exponential backoff plus the server's
//! `Retry-After` hint, every other HTTP failure propagates at once.
//!
//! The HTTP layer sits behind [`HttpTransport`] so tests can script
//! responses without a network.

pub mod balance;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RpcSettings;
use crate::types::{TraderError, TraderResult};

/// HTTP status that triggers a backoff retry.
const TOO_MANY_REQUESTS: u16 = 429;

/// Seconds assumed when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Raw HTTP reply, reduced to what the retry logic needs.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    /// Value of the `Retry-After` header, if present.
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP POST used for JSON-RPC.
///
/// Network-level failures are reported as `TraderError::Transport`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> TraderResult<HttpReply>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> TraderResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("DexTrader/0.1.0 (wallet-sync)")
            .build()
            .map_err(|e| TraderError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &Value) -> TraderResult<HttpReply> {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            // without_url: the endpoint usually embeds an API key
            .map_err(|e| TraderError::Transport(format!("request failed: {}", e.without_url())))?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| TraderError::Transport(format!("failed to read body: {}", e.without_url())))?;

        Ok(HttpReply {
            status,
            retry_after,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// JSON-RPC client for one ledger endpoint.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn HttpTransport>,
    url: SecretString,
    max_retries: u32,
    backoff_factor: u64,
}

impl RpcClient {
    /// Client over the production `reqwest` transport.
    pub fn new(settings: RpcSettings) -> TraderResult<Self> {
        let transport = ReqwestTransport::new(settings.timeout)?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: RpcSettings, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            url: settings.url,
            max_retries: settings.max_retries,
            backoff_factor: settings.backoff_factor,
        }
    }

    /// Wait before the next attempt after a 429 on `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        let retry_after = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        let exp = self.backoff_factor.saturating_pow(attempt);
        Duration::from_secs(exp.saturating_add(retry_after))
    }

    /// Issue `method(params)` and return the JSON-RPC `result` member.
    pub async fn call(&self, method: &str, params: Value) -> TraderResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        for attempt in 0..self.max_retries {
            let reply = self
                .transport
                .post_json(self.url.expose_secret(), &payload)
                .await?;

            if reply.status == TOO_MANY_REQUESTS {
                let wait = self.backoff_delay(attempt, reply.retry_after.as_deref());
                warn!(
                    method,
                    attempt,
                    wait_secs = wait.as_secs(),
                    "Rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !reply.is_success() {
                return Err(TraderError::Transport(format!(
                    "HTTP {} for {method}: {}",
                    reply.status, reply.body
                )));
            }

            debug!(method, attempt, "RPC call succeeded");
            return Self::extract_result(method, &reply.body);
        }

        Err(TraderError::Transport(format!(
            "exceeded maximum retries for {method}"
        )))
    }

    fn extract_result(method: &str, body: &str) -> TraderResult<Value> {
        let mut envelope: Value = serde_json::from_str(body)
            .map_err(|e| TraderError::Parse(format!("invalid JSON from {method}: {e}")))?;

        if let Some(error) = envelope.get("error") {
            return Err(TraderError::Rpc {
                method: method.to_string(),
                message: error.to_string(),
            });
        }

        envelope
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| TraderError::Parse(format!("{method} response has no result")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a fixed script of replies and records requests.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<TraderResult<HttpReply>>>,
        pub(crate) requests: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn ok(self, result: Value) -> Self {
            let body = json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string();
            self.push(Ok(HttpReply { status: 200, retry_after: None, body }))
        }

        pub(crate) fn status(self, status: u16, retry_after: Option<&str>) -> Self {
            self.push(Ok(HttpReply {
                status,
                retry_after: retry_after.map(str::to_string),
                body: String::new(),
            }))
        }

        pub(crate) fn raw(self, body: &str) -> Self {
            self.push(Ok(HttpReply { status: 200, retry_after: None, body: body.to_string() }))
        }

        pub(crate) fn fail(self, msg: &str) -> Self {
            self.push(Err(TraderError::Transport(msg.to_string())))
        }

        fn push(self, reply: TraderResult<HttpReply>) -> Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post_json(&self, _url: &str, body: &Value) -> TraderResult<HttpReply> {
            self.requests.lock().unwrap().push(body.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TraderError::Transport("script exhausted".into())))
        }
    }

    pub(crate) fn client(transport: Arc<ScriptedTransport>) -> RpcClient {
        RpcClient::with_transport(RpcSettings::new("https://rpc.test"), transport)
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let transport = Arc::new(ScriptedTransport::new().ok(json!({"value": 5})));
        let rpc = client(transport.clone());
        let result = rpc.call("getBalance", json!(["abc"])).await.unwrap();
        assert_eq!(result, json!({"value": 5}));

        let sent = transport.requests.lock().unwrap()[0].clone();
        assert_eq!(sent["jsonrpc"], "2.0");
        assert_eq!(sent["id"], 1);
        assert_eq!(sent["method"], "getBalance");
        assert_eq!(sent["params"], json!(["abc"]));
    }

    #[test]
    fn test_backoff_delay() {
        let rpc = client(Arc::new(ScriptedTransport::new()));
        assert_eq!(rpc.backoff_delay(0, None), Duration::from_secs(2));
        assert_eq!(rpc.backoff_delay(1, None), Duration::from_secs(3));
        assert_eq!(rpc.backoff_delay(2, Some("10")), Duration::from_secs(14));
        // HTTP-date form is not understood, default applies
        assert_eq!(
            rpc.backoff_delay(1, Some("Wed, 21 Oct 2015 07:28:00 GMT")),
            Duration::from_secs(3)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_429_then_succeeds() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .status(429, None)
                .status(429, None)
                .ok(json!({"value": 1})),
        );
        let rpc = client(transport.clone());

        let started = tokio::time::Instant::now();
        let result = rpc.call("getBalance", json!(["abc"])).await.unwrap();

        assert_eq!(result["value"], 1);
        assert_eq!(transport.request_count(), 3);
        // (2^0 + 1) + (2^1 + 1)
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_header_is_honoured() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .status(429, Some("7"))
                .ok(json!({"value": 1})),
        );
        let rpc = client(transport);
        let started = tokio::time::Instant::now();
        rpc.call("getBalance", json!(["abc"])).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .status(429, None)
                .status(429, None)
                .status(429, None)
                .ok(json!({"value": 1})),
        );
        let rpc = client(transport.clone());
        let err = rpc.call("getBalance", json!(["abc"])).await.unwrap_err();

        assert!(matches!(err, TraderError::Transport(_)));
        assert_eq!(
            err.to_string(),
            "Transport error: exceeded maximum retries for getBalance"
        );
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_non_429_error_not_retried() {
        let transport = Arc::new(ScriptedTransport::new().status(500, None).ok(json!(1)));
        let rpc = client(transport.clone());
        let err = rpc.call("getBalance", json!([])).await.unwrap_err();

        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_propagates() {
        let transport = Arc::new(ScriptedTransport::new().fail("connection reset"));
        let rpc = client(transport.clone());
        let err = rpc.call("getBalance", json!([])).await.unwrap_err();
        assert!(matches!(err, TraderError::Transport(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_rpc_error_member() {
        let transport = Arc::new(ScriptedTransport::new().raw(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid param"}}"#,
        ));
        let err = client(transport).call("getBalance", json!([])).await.unwrap_err();
        match err {
            TraderError::Rpc { method, message } => {
                assert_eq!(method, "getBalance");
                assert!(message.contains("Invalid param"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_result_is_parse_error() {
        let transport = Arc::new(ScriptedTransport::new().raw(r#"{"jsonrpc":"2.0","id":1}"#));
        let err = client(transport).call("getBalance", json!([])).await.unwrap_err();
        assert!(matches!(err, TraderError::Parse(_)));
    }
}
