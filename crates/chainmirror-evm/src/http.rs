//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! Retrying is left to the mirror's loops: a failed call is returned as
//! `MirrorError::Rpc` and rescheduled with the randomized backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use chainmirror_core::error::MirrorError;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

/// Single-endpoint JSON-RPC client.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, MirrorError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and return its `result` (`Value::Null` when absent).
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, MirrorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        trace!(id, method, url = %self.url, "rpc call");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| MirrorError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(MirrorError::Rpc(format!("{method}: HTTP {status}: {body}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| MirrorError::Rpc(format!("{method}: {e}")))?;
        let parsed: JsonRpcResponse = serde_json::from_slice(&body)
            .map_err(|e| MirrorError::Decode(format!("{method}: {e}")))?;
        parsed.into_result(method)
    }
}
