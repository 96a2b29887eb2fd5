// src/ledger/http.rs
// JSON-RPC over HTTP against a Graphene node.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::errors::{LedgerError, Result};
use super::types::{AccountObject, AssetAmount, DynamicGlobalProperties, ObjectId};
use super::{LedgerSession, NodeDialer};
use crate::transaction::{Operation, SignedTransaction};

const DATABASE_API: &str = "database";
const BROADCAST_API: &str = "network_broadcast";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

/// Dials nodes over HTTP(S). Websocket URLs from config are mapped onto the same host.
#[derive(Clone)]
pub struct HttpNodeDialer {
    client: reqwest::Client,
}

impl HttpNodeDialer {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl NodeDialer for HttpNodeDialer {
    type Session = HttpSession;

    async fn dial(&self, url: &str) -> Result<HttpSession> {
        let endpoint = http_endpoint(url);
        debug!(endpoint = %endpoint, "Dialing ledger node");

        let mut session = HttpSession {
            client: self.client.clone(),
            endpoint,
            chain_id: String::new(),
            next_id: AtomicU64::new(1),
        };

        let chain_id: String = session.call(DATABASE_API, "get_chain_id", json!([])).await?;
        if chain_id.len() != 64 || hex::decode(&chain_id).is_err() {
            return Err(LedgerError::InvalidResponse(format!("chain id {:?}", chain_id)));
        }
        session.chain_id = chain_id;

        info!(endpoint = %session.endpoint, chain_id = %session.chain_id, "Ledger node handshake complete");
        Ok(session)
    }
}

pub struct HttpSession {
    client: reqwest::Client,
    endpoint: String,
    chain_id: String,
    next_id: AtomicU64,
}

impl HttpSession {
    async fn call<T: DeserializeOwned>(&self, api: &str, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "call",
            "params": [api, method, params],
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(LedgerError::Transport(format!("HTTP {} from {}", status, self.endpoint)));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(error) = parsed.error {
            return Err(LedgerError::Rejected(error.message));
        }

        Ok(serde_json::from_value(parsed.result.unwrap_or(Value::Null))?)
    }
}

#[async_trait]
impl LedgerSession for HttpSession {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn get_account_by_name(&self, name: &str) -> Result<Option<AccountObject>> {
        self.call(DATABASE_API, "get_account_by_name", json!([name])).await
    }

    async fn get_required_fees(
        &self,
        operations: &[Operation],
        asset_id: ObjectId,
    ) -> Result<Vec<AssetAmount>> {
        self.call(DATABASE_API, "get_required_fees", json!([operations, asset_id])).await
    }

    async fn get_dynamic_global_properties(&self) -> Result<DynamicGlobalProperties> {
        self.call(DATABASE_API, "get_dynamic_global_properties", json!([])).await
    }

    async fn broadcast_transaction(&self, transaction: &SignedTransaction) -> Result<()> {
        let _: Value = self
            .call(BROADCAST_API, "broadcast_transaction", json!([transaction]))
            .await?;
        Ok(())
    }
}

fn http_endpoint(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        url.to_string()
    }
}
