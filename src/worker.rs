// src/worker.rs
// One worker process: key, node connection and the RPC consumer, all owned here.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::config::PayerConfig;
use crate::ledger::{HttpNodeDialer, NodeConnector};
use crate::payment::PaymentExecutor;
use crate::rabbitmq::{ConnectionManager, RpcServer};
use crate::supervisor::shutdown_signal;
use crate::transaction::{SigningKey, TransactionBuilder, BRAIN_KEY_SEQUENCE};

pub fn build_executor(config: &PayerConfig) -> Result<PaymentExecutor<HttpNodeDialer>> {
    let ledger = &config.ledger;

    let key = SigningKey::from_brain_key(&ledger.brainkey, BRAIN_KEY_SEQUENCE, &ledger.address_prefix)
        .context("Failed to derive signing key")?;
    info!(public_key = %key.public_key_string(), "Signing key derived");

    let dialer = HttpNodeDialer::new(Duration::from_millis(ledger.request_timeout_ms))
        .context("Failed to create ledger client")?;
    let connector = NodeConnector::new(dialer, ledger.nodes.clone()).with_max_attempts(ledger.connect_attempts);
    let builder = TransactionBuilder::new(ledger.asset_id).with_expiration_secs(ledger.expiration_secs);

    Ok(PaymentExecutor::new(connector, builder, key, ledger.source_account))
}

/// Runs until the consumer fails, a shutdown signal arrives or, when `supervised`, the
/// supervisor goes away. An `Err` is the fatal path: the process exits non-zero and the
/// supervisor starts a fresh worker.
pub async fn run(config: PayerConfig, supervised: bool) -> Result<()> {
    let mut executor = build_executor(&config)?;

    // Warm up the node connection. A miss here is retried on the first request.
    if !executor.warm_up().await {
        warn!("No ledger node reachable at startup");
    }

    let manager = ConnectionManager::new(&config.rabbit.url)
        .with_connect_timeout(Duration::from_millis(config.rabbit.connection_timeout_ms));
    let mut server = RpcServer::new(manager, &config.rabbit.queue);

    let outcome = tokio::select! {
        result = server.run(&mut executor) => Some(result),
        _ = shutdown_signal() => None,
        _ = closed(tokio::io::stdin()), if supervised => {
            warn!("Supervisor is gone");
            None
        }
    };

    match outcome {
        Some(result) => result.context(format!("RPC consumer on {} stopped", server.queue())),
        None => {
            info!("Shutting down worker");
            server.close().await?;
            Ok(())
        }
    }
}

/// Resolves once `pipe` reaches EOF or fails. Whatever is written to it is discarded.
pub async fn closed<R: tokio::io::AsyncRead + Unpin>(mut pipe: R) {
    let mut buf = [0u8; 64];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
