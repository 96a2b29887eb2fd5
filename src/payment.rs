// src/payment.rs
// Executes one transfer per RPC request and turns every outcome into a reply payload.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{LedgerError, LedgerSession, NodeConnector, NodeDialer, ObjectId};
use crate::transaction::{SigningKey, TransactionBuilder};

/// Minor units per whole unit of the transferred asset.
pub const AMOUNT_SCALE: i64 = 100_000_000;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("cant connect to any node")]
    NoReachableNode,

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// `Amount` as callers send it: a decimal string or a bare JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Text(s) => f.write_str(s.trim()),
            Amount::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for Amount {
    fn from(s: &str) -> Self {
        Amount::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Amount")]
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentResult {
    pub fn success() -> Self {
        Self { success: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Converts a decimal amount to minor units, rounding half away from zero.
pub fn scale_amount(amount: &Amount) -> Result<i64, PaymentError> {
    let text = amount.to_string();
    let invalid = || PaymentError::InvalidAmount(text.clone());

    let value = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid())?;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(invalid());
    }

    value
        .checked_mul(Decimal::from(AMOUNT_SCALE))
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(invalid)
}

/// Whatever serves RPC requests. The consumer awaits each call before taking the next delivery.
#[async_trait]
pub trait PaymentHandler: Send {
    async fn handle(&mut self, request: PaymentRequest) -> PaymentResult;
}

/// Owns the node connection and the signing key for the worker's lifetime.
pub struct PaymentExecutor<D: NodeDialer> {
    connector: NodeConnector<D>,
    builder: TransactionBuilder,
    key: SigningKey,
    source_account: ObjectId,
}

impl<D: NodeDialer> PaymentExecutor<D> {
    pub fn new(
        connector: NodeConnector<D>,
        builder: TransactionBuilder,
        key: SigningKey,
        source_account: ObjectId,
    ) -> Self {
        Self { connector, builder, key, source_account }
    }

    pub fn connector(&self) -> &NodeConnector<D> {
        &self.connector
    }

    /// Opens the node connection ahead of the first request.
    pub async fn warm_up(&mut self) -> bool {
        self.connector.ensure_connected().await.is_some()
    }

    /// Transfers `amount` to `account_name`. Never fails: every error becomes a
    /// `PaymentResult` carrying the error's message.
    pub async fn execute(&mut self, account_name: &str, amount: &Amount) -> PaymentResult {
        match self.try_execute(account_name, amount).await {
            Ok(()) => {
                info!(account = %account_name, amount = %amount, "Transfer broadcast");
                PaymentResult::success()
            }
            Err(e) => {
                warn!(account = %account_name, amount = %amount, error = %e, "Transfer failed");
                PaymentResult::failure(e.to_string())
            }
        }
    }

    async fn try_execute(&mut self, account_name: &str, amount: &Amount) -> Result<(), PaymentError> {
        let outcome = {
            let session = self
                .connector
                .ensure_connected()
                .await
                .ok_or(PaymentError::NoReachableNode)?;
            let scaled = scale_amount(amount)?;

            info!("Transfer {} to {}", amount, account_name);
            transfer(session, &self.builder, &self.key, self.source_account, account_name, scaled).await
        };

        if let Err(e) = &outcome {
            if e.is_transport() {
                self.connector.invalidate();
            }
        }

        outcome.map_err(PaymentError::from)
    }
}

async fn transfer<S: LedgerSession>(
    session: &S,
    builder: &TransactionBuilder,
    key: &SigningKey,
    from: ObjectId,
    account_name: &str,
    amount: i64,
) -> Result<(), LedgerError> {
    let account = session
        .get_account_by_name(account_name)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(account_name.to_string()))?;

    let transaction = builder.build(session, amount, account.id, from, key).await?;
    session.broadcast_transaction(&transaction).await
}

#[async_trait]
impl<D: NodeDialer> PaymentHandler for PaymentExecutor<D> {
    async fn handle(&mut self, request: PaymentRequest) -> PaymentResult {
        self.execute(&request.name, &request.amount).await
    }
}
