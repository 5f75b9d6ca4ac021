use alloy_primitives::{Address, Bytes, U256};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("all RPC endpoints failed for {label}")]
    AllEndpointsFailed { label: String },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("JSON-RPC error: {0}")]
    JsonRpc(JsonRpcError),
    #[error("no result in JSON-RPC response")]
    MissingResult,
    #[error("deserialization error: {0}")]
    Deserialize(String),
    #[error("no endpoints configured for {0}")]
    NoEndpoints(String),
}

impl RpcError {
    /// The structured error object returned by the remote, if any.
    pub fn json_rpc(&self) -> Option<&JsonRpcError> {
        match self {
            RpcError::JsonRpc(err) => Some(err),
            _ => None,
        }
    }
}

/// A raw JSON-RPC request.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

/// A JSON-RPC error object normalized into a code and a single message.
///
/// Remotes disagree on the error shape: some send a bare string, some a
/// `message`, some only `data.message` or an opaque `data` blob. The first
/// non-empty candidate in that order wins; the whole object is the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: Option<i64>,
    pub message: String,
}

impl JsonRpcError {
    pub fn from_value(error: &Value) -> Self {
        let code = error.get("code").and_then(Value::as_i64);
        let message = match error {
            Value::String(s) => s.clone(),
            _ => non_empty_str(error.get("message"))
                .or_else(|| non_empty_str(error.pointer("/data/message")))
                .map(str::to_owned)
                .unwrap_or_else(|| match error.get("data") {
                    Some(data) if is_truthy(data) => data.to_string(),
                    _ => error.to_string(),
                }),
        };
        Self { code, message }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Split a decoded response body into its result or its error.
///
/// A `null` result is a valid answer; an absent one is not.
pub fn into_result(body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(RpcError::JsonRpc(JsonRpcError::from_value(err)));
    }
    match body {
        Value::Object(mut map) => map.remove("result").ok_or(RpcError::MissingResult),
        _ => Err(RpcError::Deserialize("response is not a JSON object".into())),
    }
}

/// Health status of an RPC endpoint.
#[derive(Debug, Clone)]
struct EndpointHealth {
    url: String,
    failures: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl EndpointHealth {
    fn new(url: String) -> Self {
        Self {
            url,
            failures: 0,
            last_failure: None,
            last_success: None,
        }
    }

    fn is_healthy(&self) -> bool {
        if self.failures == 0 {
            return true;
        }
        // After 3+ consecutive failures, consider unhealthy for 30s
        if self.failures >= 3 {
            if let Some(t) = self.last_failure {
                return t.elapsed() > Duration::from_secs(30);
            }
        }
        true
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.last_success = Some(Instant::now());
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());
    }
}

/// Connection pool with failover across the endpoints of one JSON-RPC service.
///
/// Used both for chain nodes and for the bundler relay. Transport failures
/// fail over to the next endpoint; a structured JSON-RPC error is a valid
/// answer and is returned as-is.
pub struct RpcPool {
    label: String,
    endpoints: Arc<RwLock<Vec<EndpointHealth>>>,
    http: reqwest::Client,
    request_id: AtomicU64,
}

impl RpcPool {
    pub fn new(label: impl Into<String>, urls: Vec<String>) -> Self {
        Self::with_timeout(label, urls, Duration::from_secs(15))
    }

    pub fn with_timeout(label: impl Into<String>, urls: Vec<String>, timeout: Duration) -> Self {
        let endpoints = urls.into_iter().map(EndpointHealth::new).collect();
        Self {
            label: label.into(),
            endpoints: Arc::new(RwLock::new(endpoints)),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            request_id: AtomicU64::new(1),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record(&self, idx: usize, ok: bool) {
        if let Ok(mut eps) = self.endpoints.write() {
            if let Some(ep) = eps.get_mut(idx) {
                if ok {
                    ep.record_success();
                } else {
                    ep.record_failure();
                }
            }
        }
    }

    /// Send a JSON-RPC request with automatic failover across endpoints.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let urls: Vec<(usize, String)> = {
            let eps = self
                .endpoints
                .read()
                .map_err(|_| RpcError::Http("endpoint table poisoned".into()))?;
            if eps.is_empty() {
                return Err(RpcError::NoEndpoints(self.label.clone()));
            }
            // Healthy endpoints first, then unhealthy as fallback
            let mut ordered: Vec<(usize, &EndpointHealth)> = eps.iter().enumerate().collect();
            ordered.sort_by_key(|(_, e)| !e.is_healthy());
            ordered.iter().map(|(i, e)| (*i, e.url.clone())).collect()
        };

        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method,
            params: &params,
        };
        let body_str =
            serde_json::to_string(&body).map_err(|e| RpcError::Deserialize(e.to_string()))?;

        let mut last_err = None;
        for (idx, url) in &urls {
            debug!(service = %self.label, url, method, "RPC request");
            let resp = match self
                .http
                .post(url)
                .header("Content-Type", "application/json")
                .body(body_str.clone())
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(service = %self.label, url, %e, "RPC connection error");
                    self.record(*idx, false);
                    last_err = Some(RpcError::Http(e.to_string()));
                    continue;
                }
            };

            let status = resp.status();
            let parsed = resp.json::<Value>().await;

            // Relays answer rejected calls with 4xx plus a JSON-RPC error body.
            if let Ok(ref body) = parsed {
                if body.get("error").is_some_and(|e| !e.is_null()) {
                    self.record(*idx, true);
                    return into_result(body.clone());
                }
            }

            if !status.is_success() {
                let msg = format!("HTTP {status}");
                warn!(service = %self.label, url, %msg, "RPC HTTP error");
                self.record(*idx, false);
                last_err = Some(RpcError::Http(msg));
                continue;
            }

            match parsed {
                Ok(body) => {
                    self.record(*idx, true);
                    return into_result(body);
                }
                Err(e) => {
                    warn!(service = %self.label, url, %e, "RPC parse error");
                    self.record(*idx, false);
                    last_err = Some(RpcError::Deserialize(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or(RpcError::AllEndpointsFailed {
            label: self.label.clone(),
        }))
    }
}

/// Typed EVM read calls over an [`RpcPool`].
#[derive(Clone)]
pub struct EvmRpcClient {
    pool: Arc<RpcPool>,
}

impl EvmRpcClient {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<RpcPool> {
        &self.pool
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.pool.request("eth_chainId", serde_json::json!([])).await?;
        parse_quantity(&result)?
            .try_into()
            .map_err(|_| RpcError::Deserialize("chain id overflows u64".into()))
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        let result = self
            .pool
            .request("eth_getBalance", serde_json::json!([address, "latest"]))
            .await?;
        parse_quantity(&result)
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        let result = self
            .pool
            .request("eth_getCode", serde_json::json!([address, "latest"]))
            .await?;
        parse_bytes(&result)
    }

    /// `eth_call` against the latest block, returning the raw return data.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let result = self
            .pool
            .request(
                "eth_call",
                serde_json::json!([{ "to": to, "data": data }, "latest"]),
            )
            .await?;
        parse_bytes(&result)
    }
}

pub fn parse_quantity(value: &Value) -> Result<U256, RpcError> {
    let hex = value
        .as_str()
        .ok_or_else(|| RpcError::Deserialize(format!("expected hex quantity, got {value}")))?;
    U256::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Deserialize(format!("invalid quantity {hex}: {e}")))
}

pub fn parse_bytes(value: &Value) -> Result<Bytes, RpcError> {
    let hex = value
        .as_str()
        .ok_or_else(|| RpcError::Deserialize(format!("expected hex data, got {value}")))?;
    hex::decode(hex.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| RpcError::Deserialize(format!("invalid hex data: {e}")))
}
