// src/testing.rs
// In-memory stand-ins for the ledger node and the broker, shared by unit and integration tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ledger::{
    AccountObject, AssetAmount, DynamicGlobalProperties, LedgerError, LedgerSession, NodeConnector,
    NodeDialer, ObjectId, Result,
};
use crate::payment::{PaymentExecutor, PaymentHandler, PaymentRequest, PaymentResult};
use crate::rabbitmq::{RabbitMQError, ReplyPublisher, RequestEnvelope, Settle};
use crate::transaction::{Operation, SignedTransaction, SigningKey, TransactionBuilder};

pub const CHAIN_ID: &str = "4018d7844c78f6a6c41c6a552b898022310fc5dec06da467ee7905a8dad512c8";
pub const HEAD_BLOCK_ID: &str = "00012345123456789abcdef0123456789abcdef0";
pub const HEAD_TIME: &str = "2024-03-01T12:00:00";
pub const SOURCE_ACCOUNT: ObjectId = ObjectId::new(1, 2, 100);
pub const ASSET: ObjectId = ObjectId::new(1, 3, 861);

/// A ledger call as observed by the fake node.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Dial(String),
    AccountLookup(String),
    RequiredFees(Vec<Operation>),
    GlobalProperties,
    Broadcast(SignedTransaction),
}

/// Scripted behaviour of one reachable node.
#[derive(Debug, Clone)]
pub struct FakeNode {
    fee: i64,
    accounts: HashMap<String, ObjectId>,
    fee_error: Option<String>,
    broadcast_error: Option<String>,
    broadcast_transport_error: bool,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            fee: 1_000,
            accounts: HashMap::new(),
            fee_error: None,
            broadcast_error: None,
            broadcast_transport_error: false,
        }
    }
}

impl FakeNode {
    pub fn with_fee(mut self, fee: i64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_account(mut self, name: &str, instance: u64) -> Self {
        self.accounts.insert(name.to_string(), ObjectId::new(1, 2, instance));
        self
    }

    pub fn failing_fees(mut self, message: &str) -> Self {
        self.fee_error = Some(message.to_string());
        self
    }

    pub fn failing_broadcast(mut self, message: &str) -> Self {
        self.broadcast_error = Some(message.to_string());
        self
    }

    pub fn dropping_broadcast(mut self) -> Self {
        self.broadcast_transport_error = true;
        self
    }
}

type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct FakeSession {
    pub endpoint: String,
    node: FakeNode,
    calls: CallLog,
}

impl FakeSession {
    pub fn new(endpoint: &str, node: FakeNode) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            node,
            calls: Arc::default(),
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn fee_requests(&self) -> Vec<Operation> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::RequiredFees(ops) => Some(ops.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl LedgerSession for FakeSession {
    fn chain_id(&self) -> &str {
        CHAIN_ID
    }

    async fn get_account_by_name(&self, name: &str) -> Result<Option<AccountObject>> {
        self.record(Call::AccountLookup(name.to_string()));
        Ok(self.node.accounts.get(name).map(|id| AccountObject {
            id: *id,
            name: name.to_string(),
        }))
    }

    async fn get_required_fees(&self, operations: &[Operation], asset_id: ObjectId) -> Result<Vec<AssetAmount>> {
        self.record(Call::RequiredFees(operations.to_vec()));
        if let Some(message) = &self.node.fee_error {
            return Err(LedgerError::Rejected(message.clone()));
        }
        Ok(operations.iter().map(|_| AssetAmount::new(self.node.fee, asset_id)).collect())
    }

    async fn get_dynamic_global_properties(&self) -> Result<DynamicGlobalProperties> {
        self.record(Call::GlobalProperties);
        Ok(DynamicGlobalProperties {
            head_block_number: 0x0001_2345,
            head_block_id: HEAD_BLOCK_ID.to_string(),
            time: HEAD_TIME.to_string(),
        })
    }

    async fn broadcast_transaction(&self, transaction: &SignedTransaction) -> Result<()> {
        self.record(Call::Broadcast(transaction.clone()));
        if self.node.broadcast_transport_error {
            return Err(LedgerError::Transport("connection reset".to_string()));
        }
        match &self.node.broadcast_error {
            Some(message) => Err(LedgerError::Rejected(message.clone())),
            None => Ok(()),
        }
    }
}

/// Dials only the endpoints it was given nodes for; every other URL fails.
#[derive(Clone, Default)]
pub struct FakeDialer {
    nodes: Arc<Mutex<HashMap<String, FakeNode>>>,
    calls: CallLog,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, url: &str, node: FakeNode) -> Self {
        self.nodes.lock().unwrap().insert(url.to_string(), node);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dialed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Dial(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<SignedTransaction> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Broadcast(tx) => Some(tx),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NodeDialer for FakeDialer {
    type Session = FakeSession;

    async fn dial(&self, url: &str) -> Result<FakeSession> {
        self.calls.lock().unwrap().push(Call::Dial(url.to_string()));
        let node = self.nodes.lock().unwrap().get(url).cloned();

        match node {
            Some(node) => Ok(FakeSession {
                endpoint: url.to_string(),
                node,
                calls: self.calls.clone(),
            }),
            None => Err(LedgerError::Transport(format!("connection refused: {}", url))),
        }
    }
}

pub fn test_key() -> SigningKey {
    SigningKey::from_brain_key("fake brain key for tests", 1, "BTS").unwrap()
}

pub fn executor_for(dialer: FakeDialer, urls: &[&str]) -> PaymentExecutor<FakeDialer> {
    let connector = NodeConnector::new(dialer, urls.iter().map(|u| u.to_string()).collect());
    PaymentExecutor::new(connector, TransactionBuilder::new(ASSET), test_key(), SOURCE_ACCOUNT)
}

/// Broker-side effect observed by [`RecordingBroker`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Handled(String),
    Reply {
        reply_to: String,
        correlation_id: Option<String>,
        body: serde_json::Value,
    },
    Ack,
    Reject {
        requeue: bool,
    },
}

type EventLog = Arc<Mutex<Vec<Event>>>;

/// Records replies and settlements in the order they happen.
#[derive(Clone, Default)]
pub struct RecordingBroker {
    events: EventLog,
    fail_publish: bool,
}

impl RecordingBroker {
    pub fn failing_publish() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    pub fn acker(&self) -> RecordingAcker {
        RecordingAcker {
            events: self.events.clone(),
        }
    }

    /// A handler that answers every request with `result` and logs into this broker's events.
    pub fn handler(&self, result: PaymentResult) -> ScriptedHandler {
        ScriptedHandler {
            result,
            requests: Vec::new(),
            events: Some(self.events.clone()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyPublisher for RecordingBroker {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        body: &[u8],
    ) -> std::result::Result<(), RabbitMQError> {
        if self.fail_publish {
            return Err(RabbitMQError::PublishError("channel closed".to_string()));
        }
        self.events.lock().unwrap().push(Event::Reply {
            reply_to: reply_to.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            body: serde_json::from_slice(body)?,
        });
        Ok(())
    }
}

pub struct RecordingAcker {
    events: EventLog,
}

#[async_trait]
impl Settle for RecordingAcker {
    async fn ack(&self) -> std::result::Result<(), RabbitMQError> {
        self.events.lock().unwrap().push(Event::Ack);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> std::result::Result<(), RabbitMQError> {
        self.events.lock().unwrap().push(Event::Reject { requeue });
        Ok(())
    }
}

pub struct ScriptedHandler {
    result: PaymentResult,
    requests: Vec<PaymentRequest>,
    events: Option<EventLog>,
}

impl ScriptedHandler {
    pub fn always(result: PaymentResult) -> Self {
        Self {
            result,
            requests: Vec::new(),
            events: None,
        }
    }

    pub fn requests(&self) -> &[PaymentRequest] {
        &self.requests
    }
}

#[async_trait]
impl PaymentHandler for ScriptedHandler {
    async fn handle(&mut self, request: PaymentRequest) -> PaymentResult {
        if let Some(events) = &self.events {
            events.lock().unwrap().push(Event::Handled(request.name.clone()));
        }
        tokio::task::yield_now().await;
        self.requests.push(request);
        self.result.clone()
    }
}

pub fn envelope(payload: serde_json::Value, reply_to: Option<&str>, correlation_id: Option<&str>) -> RequestEnvelope {
    RequestEnvelope {
        payload: serde_json::to_vec(&payload).unwrap(),
        reply_to: reply_to.map(str::to_string),
        correlation_id: correlation_id.map(str::to_string),
    }
}
