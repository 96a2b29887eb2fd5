// src/transaction/mod.rs
// Transfer transactions: construction, wire form and signing

mod builder;
mod keys;
mod wire;

pub use builder::{TransactionBuilder, DEFAULT_EXPIRATION_SECS};
pub use keys::{normalize_brain_key, public_key_string, SigningKey, BRAIN_KEY_SEQUENCE};
pub use wire::serialize_transaction;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ledger::{AssetAmount, LedgerError, ObjectId};

/// Operation tag of `transfer` in the chain's operation variant.
pub const TRANSFER_OPERATION_ID: u8 = 0;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferOperation {
    pub fee: AssetAmount,
    pub from: ObjectId,
    pub to: ObjectId,
    pub amount: AssetAmount,
    pub extensions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Transfer(TransferOperation),
}

// Operations travel as `[tag, body]` pairs.
impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operation::Transfer(op) => (TRANSFER_OPERATION_ID, op).serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    #[serde(serialize_with = "serialize_time")]
    pub expiration: NaiveDateTime,
    pub operations: Vec<Operation>,
    pub extensions: Vec<Value>,
}

impl Transaction {
    /// `sha256(chain_id ‖ wire bytes)`, the message every signer signs.
    pub fn signing_digest(&self, chain_id: &str) -> Result<[u8; 32], LedgerError> {
        let chain_id = hex::decode(chain_id)
            .map_err(|e| LedgerError::Signing(format!("chain id is not hex: {}", e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&chain_id);
        hasher.update(serialize_transaction(self));
        Ok(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub signatures: Vec<String>,
}

fn serialize_time<S: Serializer>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format(TIME_FORMAT))
}

pub(crate) fn parse_time(raw: &str) -> Result<NaiveDateTime, LedgerError> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|e| LedgerError::InvalidResponse(format!("time {:?}: {}", raw, e)))
}
