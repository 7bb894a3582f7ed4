//! `newHeads` subscription over a WebSocket.
//!
//! Each call opens its own connection, subscribes, and hands back a
//! channel fed by a background reader task. Reconnecting is the caller's
//! job: when the socket drops the task exits and the channel closes, which
//! is the signal the live ingestor uses to refill and resubscribe.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chainmirror_core::client::HeadStream;
use chainmirror_core::error::MirrorError;

use crate::parse::head_from_json;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

const SUBSCRIBE_ID: u64 = 1;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to `url`, issue `eth_subscribe ["newHeads"]` and stream heads.
///
/// Connecting and waiting for the subscription id share one `timeout`.
pub async fn subscribe_new_heads(
    url: &str,
    timeout: Duration,
) -> Result<HeadStream, MirrorError> {
    let (ws, sub_id) = tokio::time::timeout(timeout, handshake(url))
        .await
        .map_err(|_| {
            MirrorError::Subscription(format!("{url}: no subscription within {timeout:?}"))
        })??;
    let (mut sink, mut stream) = ws.split();
    info!(url, subscription = %sub_id, "newHeads subscription active");

    let (tx, rx) = mpsc::unbounded_channel();
    let url = url.to_string();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Some(head) = notification_head(text.as_str(), &sub_id) else {
                        continue;
                    };
                    if tx.send(head).is_err() {
                        debug!("head receiver dropped, closing subscription");
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(url = %url, error = %e, "WS receive error");
                    break;
                }
            }
        }
        warn!(url = %url, "newHeads socket closed");
    });

    Ok(rx)
}

/// Open the socket and wait for the subscription id; notifications cannot
/// precede it.
async fn handshake(url: &str) -> Result<(Socket, String), MirrorError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| MirrorError::Subscription(format!("connect {url}: {e}")))?;

    let req = JsonRpcRequest::new(SUBSCRIBE_ID, "eth_subscribe", vec!["newHeads".into()]);
    let payload =
        serde_json::to_string(&req).map_err(|e| MirrorError::Subscription(e.to_string()))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| MirrorError::Subscription(format!("send eth_subscribe: {e}")))?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(text.as_str()) else {
                    continue;
                };
                if resp.id != Some(SUBSCRIBE_ID) {
                    continue;
                }
                let result = resp.into_result("eth_subscribe")?;
                let sub_id = result
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| MirrorError::Decode("eth_subscribe: non-string id".into()))?;
                return Ok((ws, sub_id));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(MirrorError::Subscription(
                    "socket closed before subscription was confirmed".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(MirrorError::Subscription(e.to_string())),
        }
    }
}

/// Extract the head from an `eth_subscription` notification for `sub_id`.
pub(crate) fn notification_head(
    text: &str,
    sub_id: &str,
) -> Option<chainmirror_core::types::BlockRef> {
    let val: Value = serde_json::from_str(text).ok()?;
    if val.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = val.get("params")?;
    if params["subscription"].as_str() != Some(sub_id) {
        return None;
    }
    match head_from_json(&params["result"]) {
        Ok(head) => Some(head),
        Err(e) => {
            warn!(error = %e, "malformed newHeads notification");
            None
        }
    }
}
