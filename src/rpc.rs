// src/rpc.rs
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Failure of a single JSON-RPC round trip.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: HTTP {0}")]
    Status(StatusCode),

    #[error("invalid JSON in RPC response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC response has no `result` field")]
    MissingResult,

    #[error("malformed {what} in RPC result: {value}")]
    Malformed { what: &'static str, value: String },
}

impl RpcError {
    /// JSON-RPC "method not found", returned by nodes that do not expose
    /// a namespace such as `admin_`.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, RpcError::Rpc { code: -32601, .. })
    }
}

/// A JSON-RPC endpoint. `call` returns the raw `result` value, which is
/// `Value::Null` when the node found nothing.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// JSON-RPC over HTTP POST to a single endpoint.
///
/// No retries and no timeout beyond reqwest's defaults; callers wrap
/// operations with their own policy.
pub struct HttpTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        debug!("📡 Sending {} → {} (id {})", method, self.url, id);

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(RpcError::Status(resp.status()));
        }
        let text = resp.text().await?;
        debug!("📩 Raw {} response: {}", method, text);

        extract_result(serde_json::from_str(&text)?)
    }
}

/// Pull `result` out of a response envelope, turning `error` into `RpcError::Rpc`.
fn extract_result(envelope: Value) -> Result<Value, RpcError> {
    let Value::Object(mut fields) = envelope else {
        return Err(RpcError::MissingResult);
    };

    if let Some(result) = fields.remove("result") {
        return Ok(result);
    }

    match fields.remove("error") {
        Some(err) => Err(RpcError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Err(RpcError::MissingResult),
    }
}

/// Parse a `0x`-prefixed hexadecimal quantity as returned by the node.
pub fn parse_quantity(what: &'static str, raw: &str) -> Result<u64, RpcError> {
    parse_hex_with(what, raw, |digits| u64::from_str_radix(digits, 16))
}

/// Shared quantity parsing for any integer width: strips `0x`, reads an
/// empty body as zero and hands the digits to `from_hex`.
pub fn parse_hex_with<N, E>(
    what: &'static str,
    raw: &str,
    from_hex: impl FnOnce(&str) -> Result<N, E>,
) -> Result<N, RpcError>
where
    N: Default,
{
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(N::default());
    }
    from_hex(digits).map_err(|_| RpcError::Malformed {
        what,
        value: raw.to_string(),
    })
}

/// Encode a native integer as a hexadecimal quantity.
pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}
