// src/ledger/mod.rs
// Client side of the ledger node's RPC surface

pub mod errors;
pub mod types;

mod connector;
mod http;

pub use connector::{NodeConnector, DEFAULT_CONNECT_ATTEMPTS};
pub use errors::{LedgerError, Result};
pub use http::{HttpNodeDialer, HttpSession};
pub use types::{AccountObject, AssetAmount, DynamicGlobalProperties, ObjectId};

use async_trait::async_trait;

use crate::transaction::{Operation, SignedTransaction};

/// Opens sessions against a single node endpoint.
#[async_trait]
pub trait NodeDialer: Send + Sync {
    type Session: LedgerSession;

    /// Connects to `url` and completes the initialization handshake.
    async fn dial(&self, url: &str) -> Result<Self::Session>;
}

/// An initialized session with one ledger node.
#[async_trait]
pub trait LedgerSession: Send + Sync {
    /// Hex chain id learned during the handshake; part of every signing digest.
    fn chain_id(&self) -> &str;

    async fn get_account_by_name(&self, name: &str) -> Result<Option<AccountObject>>;

    async fn get_required_fees(
        &self,
        operations: &[Operation],
        asset_id: ObjectId,
    ) -> Result<Vec<AssetAmount>>;

    async fn get_dynamic_global_properties(&self) -> Result<DynamicGlobalProperties>;

    async fn broadcast_transaction(&self, transaction: &SignedTransaction) -> Result<()>;
}
