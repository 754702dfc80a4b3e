//! Ogmios v6 client
//!
//! JSON-RPC over WebSocket against an Ogmios bridge in front of
//! cardano-node. Requests are strictly sequential per connection; the
//! connection is re-established lazily after any transport failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChainClient, ChainError, ChainTip, TxStatus, Utxo};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum RequestError {
    Transport(String),
    Rpc(String),
}

/// WebSocket client for the Ogmios JSON-RPC bridge.
pub struct OgmiosClient {
    url: String,
    stream: tokio::sync::Mutex<Option<WsStream>>,
    request_id: AtomicU64,
}

impl OgmiosClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: tokio::sync::Mutex::new(None),
            request_id: AtomicU64::new(1),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RequestError> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            let (ws, _) = connect_async(self.url.as_str())
                .await
                .map_err(|e| RequestError::Transport(e.to_string()))?;
            info!(url = %self.url, "connected to Ogmios");
            *guard = Some(ws);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(RequestError::Transport("connection missing".to_string()));
        };

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        debug!(method, id, "ogmios request");

        if let Err(e) = stream.send(Message::Text(payload.to_string())).await {
            *guard = None;
            return Err(RequestError::Transport(e.to_string()));
        }

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let response: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => return Err(RequestError::Rpc(e.to_string())),
                    };
                    // Responses to other requests never happen on this
                    // connection, but chain-sync servers may push
                    // notifications; skip anything without our id.
                    if response.get("id").and_then(Value::as_u64) != Some(id) {
                        continue;
                    }
                    if let Some(error) = response.get("error") {
                        let message = error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown Ogmios error");
                        return Err(RequestError::Rpc(message.to_string()));
                    }
                    return Ok(response.get("result").cloned().unwrap_or(Value::Null));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    *guard = None;
                    return Err(RequestError::Transport(e.to_string()));
                }
                None => {
                    *guard = None;
                    return Err(RequestError::Transport("connection closed".to_string()));
                }
            }
        }
    }
}

/// Parse one entry of a `queryLedgerState/utxo` result.
fn parse_utxo(entry: &Value) -> Option<Utxo> {
    let tx_hash = entry
        .get("transaction")?
        .get("id")?
        .as_str()?
        .to_string();
    let index = entry.get("index")?.as_u64()? as u32;
    let address = entry.get("address")?.as_str()?.to_string();

    let mut value: HashMap<String, HashMap<String, u128>> = HashMap::new();
    for (policy, assets) in entry.get("value")?.as_object()? {
        let assets = assets.as_object()?;
        let inner = value.entry(policy.clone()).or_default();
        for (name, quantity) in assets {
            inner.insert(name.clone(), u128::from(quantity.as_u64()?));
        }
    }

    let datum = entry
        .get("datum")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(Utxo {
        tx_hash,
        index,
        address,
        value,
        datum,
    })
}

fn parse_utxo_set(result: &Value) -> Vec<Utxo> {
    let Some(entries) = result.as_array() else {
        return Vec::new();
    };
    let mut utxos = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_utxo(entry) {
            Some(utxo) => utxos.push(utxo),
            None => warn!("skipping unparseable UTXO entry"),
        }
    }
    utxos
}

#[async_trait::async_trait]
impl ChainClient for OgmiosClient {
    async fn chain_tip(&self) -> Result<ChainTip, ChainError> {
        let result = self
            .request("queryNetwork/tip", json!({}))
            .await
            .map_err(|e| match e {
                RequestError::Transport(m) => ChainError::Unreachable(m),
                RequestError::Rpc(m) => ChainError::Protocol(m),
            })?;

        let slot = result
            .get("slot")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainError::Protocol("tip without slot".to_string()))?;
        let block_hash = result
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(ChainTip { slot, block_hash })
    }

    async fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let result = self
            .request("queryLedgerState/utxo", json!({ "addresses": [address] }))
            .await
            .map_err(|e| match e {
                RequestError::Transport(m) => ChainError::Unreachable(m),
                RequestError::Rpc(m) => ChainError::Protocol(m),
            })?;
        Ok(parse_utxo_set(&result))
    }

    async fn submit_transaction(&self, signed_cbor: &str) -> Result<String, ChainError> {
        let result = self
            .request(
                "submitTransaction",
                json!({ "transaction": { "cbor": signed_cbor } }),
            )
            .await
            .map_err(|e| match e {
                RequestError::Transport(m) => ChainError::Unreachable(m),
                RequestError::Rpc(m) => ChainError::Rejected(m),
            })?;

        result
            .get("transaction")
            .and_then(|tx| tx.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainError::Protocol("submission response without id".to_string()))
    }

    /// A transaction on a UTXO ledger is confirmed exactly when its outputs
    /// appear in the ledger UTXO set. Submission-time rejections surface
    /// synchronously from `submit_transaction`, so this probe only
    /// distinguishes pending from confirmed.
    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, ChainError> {
        let result = self
            .request(
                "queryLedgerState/utxo",
                json!({
                    "outputReferences": [
                        { "transaction": { "id": tx_id }, "index": 0 }
                    ]
                }),
            )
            .await
            .map_err(|e| match e {
                RequestError::Transport(m) => ChainError::Unreachable(m),
                RequestError::Rpc(m) => ChainError::Protocol(m),
            })?;

        let outputs = parse_utxo_set(&result);
        if outputs.is_empty() {
            return Ok(TxStatus::Pending);
        }
        let tip = self.chain_tip().await?;
        Ok(TxStatus::Confirmed {
            slot: tip.slot,
            outputs,
        })
    }
}
