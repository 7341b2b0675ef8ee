//! JSON-RPC client over HTTP, plus a WebSocket `newHeads` subscription.

use crate::error::RpcError;
use crate::types::{parse_hex_b256, parse_hex_bytes, parse_hex_u64, AccountProof, Header, Log, LogFilter, Receipt};
use alloy::primitives::{Address, Bytes, B256};
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Block selector for calls that take a block tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
    Number(u64),
}

impl BlockTag {
    fn to_json(self) -> Value {
        match self {
            BlockTag::Latest => Value::String("latest".into()),
            BlockTag::Pending => Value::String("pending".into()),
            BlockTag::Number(n) => Value::String(format!("0x{:x}", n)),
        }
    }
}

/// HTTP JSON-RPC client for one endpoint. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Build a client with a per-request timeout. Does not use the system proxy.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC request and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let resp = self.http.post(&self.url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout
            } else {
                RpcError::Http(e)
            }
        })?;
        let json: Value = resp.json().await?;
        if let Some(err) = json.get("error") {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or_default();
            let mut message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            // Revert reasons arrive in `data` on some nodes.
            if let Some(data) = err.get("data").and_then(|d| d.as_str()) {
                message = format!("{} ({})", message, data);
            }
            return Err(RpcError::Rpc { code, message });
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode("Missing result".into()))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_hex_u64(as_str(&result, "chainId")?)
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_hex_u64(as_str(&result, "blockNumber")?)
    }

    pub async fn header_by_number(&self, tag: BlockTag) -> Result<Option<Header>, RpcError> {
        let result = self
            .request("eth_getBlockByNumber", json!([tag.to_json(), false]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Header::from_json(&result).map(Some)
    }

    pub async fn header_by_hash(&self, hash: B256) -> Result<Option<Header>, RpcError> {
        let result = self
            .request("eth_getBlockByHash", json!([hash.to_string(), false]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Header::from_json(&result).map(Some)
    }

    pub async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        let result = self.request("eth_getLogs", json!([filter.to_json()])).await?;
        result
            .as_array()
            .ok_or_else(|| RpcError::Decode("getLogs not array".into()))?
            .iter()
            .map(Log::from_json)
            .collect()
    }

    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        if result.is_null() || result.get("blockNumber").map_or(true, Value::is_null) {
            return Ok(None);
        }
        Receipt::from_json(&result).map(Some)
    }

    pub async fn proof(
        &self,
        address: Address,
        slots: &[B256],
        block: BlockTag,
    ) -> Result<AccountProof, RpcError> {
        let keys: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
        let result = self
            .request(
                "eth_getProof",
                json!([address.to_string(), keys, block.to_json()]),
            )
            .await?;
        AccountProof::from_json(&result)
    }

    pub async fn call(&self, to: Address, data: &[u8], block: BlockTag) -> Result<Bytes, RpcError> {
        let params = json!([{
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }, block.to_json()]);
        let result = self.request("eth_call", params).await?;
        parse_hex_bytes(as_str(&result, "eth_call result")?)
    }

    pub async fn transaction_count(&self, address: Address, block: BlockTag) -> Result<u64, RpcError> {
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([address.to_string(), block.to_json()]),
            )
            .await?;
        parse_hex_u64(as_str(&result, "transactionCount")?)
    }

    pub async fn gas_price(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        parse_hex_u64(as_str(&result, "gasPrice")?)
    }

    pub async fn estimate_gas(&self, from: Address, to: Address, data: &[u8]) -> Result<u64, RpcError> {
        let params = json!([{
            "from": from.to_string(),
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        }]);
        let result = self.request("eth_estimateGas", params).await?;
        parse_hex_u64(as_str(&result, "estimateGas")?)
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, RpcError> {
        let params = json!([format!("0x{}", hex::encode(raw))]);
        let result = self.request("eth_sendRawTransaction", params).await?;
        parse_hex_b256(as_str(&result, "tx hash")?)
    }
}

fn as_str<'a>(v: &'a Value, what: &str) -> Result<&'a str, RpcError> {
    v.as_str()
        .ok_or_else(|| RpcError::Decode(format!("{} not string", what)))
}

/// Open an `eth_subscribe("newHeads")` subscription and stream block numbers.
///
/// The stream ends when the socket closes; transport errors are yielded as items.
pub async fn subscribe_new_heads(ws_url: &str) -> Result<BoxStream<'static, Result<u64, RpcError>>, RpcError> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .map_err(|e| RpcError::WebSocket(format!("connect: {}", e)))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let sub_req = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"]
    });
    let text = serde_json::to_string(&sub_req).map_err(|e| RpcError::Decode(e.to_string()))?;
    ws_sender
        .send(Message::Text(text))
        .await
        .map_err(|e| RpcError::WebSocket(format!("send subscribe: {}", e)))?;

    match timeout(Duration::from_secs(10), ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            let v: Value = serde_json::from_str(&text).map_err(|e| RpcError::Decode(e.to_string()))?;
            if let Some(err) = v.get("error") {
                let message = err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Err(RpcError::Unsupported(format!("newHeads subscription: {}", message)));
            }
            if v.get("result").and_then(|r| r.as_str()).is_none() {
                return Err(RpcError::Decode("no subscription id".into()));
            }
        }
        Ok(Some(Ok(_))) => return Err(RpcError::WebSocket("unexpected message".into())),
        Ok(Some(Err(e))) => return Err(RpcError::WebSocket(e.to_string())),
        Ok(None) => return Err(RpcError::WebSocket("ws closed".into())),
        Err(_) => return Err(RpcError::Timeout),
    }

    // The sink half rides along in the state so the connection stays open.
    let heads = futures_util::stream::unfold((ws_sender, ws_receiver), |(sender, mut receiver)| async move {
        loop {
            let item = match receiver.next().await? {
                Ok(Message::Text(text)) => parse_head_notification(&text).transpose(),
                Ok(Message::Close(_)) => return None,
                Ok(_) => None,
                Err(e) => Some(Err(RpcError::WebSocket(e.to_string()))),
            };
            if let Some(item) = item {
                return Some((item, (sender, receiver)));
            }
        }
    });
    Ok(heads.boxed())
}

/// Extract the block number from an `eth_subscription` notification. Other
/// messages yield `Ok(None)`.
fn parse_head_notification(text: &str) -> Result<Option<u64>, RpcError> {
    let v: Value = serde_json::from_str(text).map_err(|e| RpcError::Decode(e.to_string()))?;
    if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
        return Ok(None);
    }
    let number = v
        .get("params")
        .and_then(|p| p.get("result"))
        .and_then(|r| r.get("number"))
        .and_then(|n| n.as_str())
        .ok_or_else(|| RpcError::Decode("no params.result.number".into()))?;
    parse_hex_u64(number).map(Some)
}
