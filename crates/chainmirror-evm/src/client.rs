//! `ChainClient` implementation for EVM JSON-RPC nodes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use chainmirror_core::client::{ChainClient, HeadStream};
use chainmirror_core::error::MirrorError;
use chainmirror_core::types::{BlockId, FetchedBlock};

use crate::genesis::load_genesis_allocation;
use crate::http::HttpTransport;
use crate::parse::{block_from_json, parse_hex_u128, parse_hex_u64};
use crate::ws;

/// Endpoints and files for an `EvmChainClient`.
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// WebSocket endpoint for `newHeads`. Without one, subscribing fails.
    pub ws_url: Option<String>,
    /// `genesis.json` whose `alloc` seeds the balance sweeper.
    pub genesis_file: Option<PathBuf>,
    /// Bounds each HTTP request and the WebSocket subscribe handshake.
    pub request_timeout: Duration,
}

impl EvmClientConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ws_url: None,
            genesis_file: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC chain client.
pub struct EvmChainClient {
    http: HttpTransport,
    ws_url: Option<String>,
    genesis_file: Option<PathBuf>,
    request_timeout: Duration,
}

impl EvmChainClient {
    pub fn new(config: EvmClientConfig) -> Result<Self, MirrorError> {
        Ok(Self {
            http: HttpTransport::new(config.rpc_url, config.request_timeout)?,
            ws_url: config.ws_url,
            genesis_file: config.genesis_file,
            request_timeout: config.request_timeout,
        })
    }

    pub fn rpc_url(&self) -> &str {
        self.http.url()
    }

    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    /// Fails with `NotConnected` unless the node answers `net_listening`
    /// with `true`.
    pub async fn ensure_connected(&self) -> Result<(), MirrorError> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(MirrorError::NotConnected {
                url: self.http.url().to_string(),
            })
        }
    }

    async fn quantity(&self, method: &str, params: Vec<Value>) -> Result<String, MirrorError> {
        let result = self.http.call(method, params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                MirrorError::Decode(format!("{method}: expected hex string, got {result}"))
            })
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn latest_block_number(&self) -> Result<u64, MirrorError> {
        parse_hex_u64(&self.quantity("eth_blockNumber", vec![]).await?)
    }

    async fn block(
        &self,
        id: BlockId,
        include_transactions: bool,
    ) -> Result<Option<FetchedBlock>, MirrorError> {
        let (method, selector) = match &id {
            BlockId::Number(n) => ("eth_getBlockByNumber", json!(format!("{n:#x}"))),
            BlockId::Hash(h) => ("eth_getBlockByHash", json!(h)),
            BlockId::Latest => ("eth_getBlockByNumber", json!("latest")),
        };
        let result = self
            .http
            .call(method, vec![selector, json!(include_transactions)])
            .await?;
        if result.is_null() {
            debug!(block = %id, "node returned no block");
            return Ok(None);
        }
        block_from_json(&result).map(Some)
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, MirrorError> {
        match &self.ws_url {
            Some(url) => ws::subscribe_new_heads(url, self.request_timeout).await,
            None => Err(MirrorError::Subscription(
                "no WebSocket endpoint configured".into(),
            )),
        }
    }

    async fn balance(&self, address: &str) -> Result<u128, MirrorError> {
        let hex = self
            .quantity("eth_getBalance", vec![json!(address), json!("latest")])
            .await?;
        parse_hex_u128(&hex)
    }

    async fn transaction_count(&self, address: &str) -> Result<u64, MirrorError> {
        let hex = self
            .quantity("eth_getTransactionCount", vec![json!(address), json!("latest")])
            .await?;
        parse_hex_u64(&hex)
    }

    async fn genesis_allocation(&self) -> Result<Vec<String>, MirrorError> {
        match &self.genesis_file {
            Some(path) => load_genesis_allocation(path).await,
            None => Ok(Vec::new()),
        }
    }

    async fn is_connected(&self) -> bool {
        match self.http.call("net_listening", vec![]).await {
            Ok(v) => v.as_bool().unwrap_or(false),
            Err(e) => {
                debug!(url = %self.http.url(), error = %e, "connectivity check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::fixtures::block_json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal HTTP/1.1 JSON-RPC responder. `answer` maps a request to the
    /// `result` value, or `Err` to reply with a JSON-RPC error object.
    async fn serve<F>(answer: F) -> String
    where
        F: Fn(&str, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let answer = std::sync::Arc::new(answer);
        tokio::spawn(async move {
            while let Ok((conn, _)) = listener.accept().await {
                let answer = answer.clone();
                tokio::spawn(async move { respond(conn, &*answer).await });
            }
        });
        url
    }

    async fn respond<F>(mut conn: TcpStream, answer: &F)
    where
        F: Fn(&str, &[Value]) -> Result<Value, String>,
    {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let (head_end, content_length) = loop {
            let n = conn.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break (pos + 4, len);
            }
        };
        while buf.len() < head_end + content_length {
            let n = conn.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let req: Value = serde_json::from_slice(&buf[head_end..head_end + content_length]).unwrap();
        let method = req["method"].as_str().unwrap_or_default();
        let params = req["params"].as_array().cloned().unwrap_or_default();
        let body = match answer(method, &params) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": req["id"], "result": result}),
            Err(msg) => json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32000, "message": msg}
            }),
        }
        .to_string();

        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = conn.write_all(reply.as_bytes()).await;
        let _ = conn.shutdown().await;
    }

    fn client(url: String) -> EvmChainClient {
        EvmChainClient::new(EvmClientConfig::new(url)).unwrap()
    }

    #[tokio::test]
    async fn maps_rpc_methods() {
        let url = serve(|method, params| match method {
            "eth_blockNumber" => Ok(json!("0x2a")),
            "eth_getBalance" => {
                assert_eq!(params[1], "latest");
                Ok(json!("0xde0b6b3a7640000"))
            }
            "eth_getTransactionCount" => Ok(json!("0x5")),
            "net_listening" => Ok(json!(true)),
            other => Err(format!("unexpected {other}")),
        })
        .await;
        let c = client(url);

        assert_eq!(c.latest_block_number().await.unwrap(), 42);
        assert_eq!(c.balance("0xabc").await.unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(c.transaction_count("0xabc").await.unwrap(), 5);
        assert!(c.is_connected().await);
        assert!(c.ensure_connected().await.is_ok());
        assert!(c.genesis_allocation().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetches_blocks_by_number_and_hash() {
        let url = serve(|method, params| {
            assert_eq!(params[1], true);
            match (method, params[0].as_str()) {
                ("eth_getBlockByNumber", Some("0x10")) => Ok(block_json(16, true)),
                ("eth_getBlockByHash", Some("0xblock16")) => Ok(block_json(16, true)),
                _ => Ok(Value::Null),
            }
        })
        .await;
        let c = client(url);

        let by_number = c.block(BlockId::Number(16), true).await.unwrap().unwrap();
        assert_eq!(by_number.block.hash, "0xblock16");
        assert_eq!(by_number.transactions.len(), 1);

        let by_hash = c.block(BlockId::Hash("0xblock16".into()), true).await.unwrap();
        assert_eq!(by_hash, Some(by_number));

        assert!(c.block(BlockId::Number(99), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn node_errors_are_transient() {
        let url = serve(|_, _| Err("header not found".into())).await;
        let c = client(url);

        let err = c.latest_block_number().await.unwrap_err();
        assert!(err.is_transient(), "got {err}");
        assert!(!c.is_connected().await);
        assert!(matches!(
            c.ensure_connected().await,
            Err(MirrorError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_rpc_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let c = client(url);
        assert!(matches!(c.latest_block_number().await, Err(MirrorError::Rpc(_))));
        assert!(matches!(
            c.subscribe_new_heads().await,
            Err(MirrorError::Subscription(_))
        ));
    }
}
