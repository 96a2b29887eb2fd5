// src/rabbitmq/connection.rs

use lapin::{Channel, Connection, ConnectionProperties};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use super::errors::{RabbitMQError, Result};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Owns the worker's broker connection. Connecting is a single attempt: any failure is
/// returned to the caller, which treats it as fatal.
pub struct ConnectionManager {
    uri: String,
    connection: Option<Connection>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(uri: &str) -> Self {
        ConnectionManager {
            uri: uri.to_string(),
            connection: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub async fn get_connection(&mut self) -> Result<&Connection> {
        let connected = self
            .connection
            .as_ref()
            .is_some_and(|conn| conn.status().connected());

        if !connected {
            info!("Connecting to RabbitMQ at {}", redact(&self.uri));
            let conn = timeout(
                self.connect_timeout,
                Connection::connect(&self.uri, ConnectionProperties::default()),
            )
            .await?
            .map_err(|e| RabbitMQError::ConnectionError(e.to_string()))?;

            debug!("Successfully connected to RabbitMQ");
            self.connection = Some(conn);
        }

        self.connection
            .as_ref()
            .ok_or_else(|| RabbitMQError::ConnectionError("No active connection".to_string()))
    }

    pub async fn create_channel(&mut self) -> Result<Channel> {
        let connection = self.get_connection().await?;
        connection
            .create_channel()
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to create channel: {}", e)))
    }

    pub async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.take() {
            info!("Closing RabbitMQ connection gracefully");
            conn.close(200, "Worker shutting down")
                .await
                .map_err(|e| RabbitMQError::ConnectionError(e.to_string()))?;
        }
        Ok(())
    }
}

// Keeps credentials out of the logs.
fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &uri[..scheme_end], &uri[at..])
        }
        _ => uri.to_string(),
    }
}
