// src/rabbitmq/request_response.rs
// Server side of RPC over a queue: one request in flight, reply first, ack second.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::{options::*, types::FieldTable, BasicProperties, Channel, Consumer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::ConnectionManager;
use super::errors::{RabbitMQError, Result};
use crate::payment::{PaymentHandler, PaymentRequest, PaymentResult};

pub const DEFAULT_QUEUE: &str = "__rpc__bitshares_transfer";

/// Deliveries the broker may hand this consumer before an ack.
pub const PREFETCH_COUNT: u16 = 1;

/// What the server needs from an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
}

impl RequestEnvelope {
    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            payload: delivery.data.clone(),
            reply_to: delivery
                .properties
                .reply_to()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|s| s.as_str().to_string()),
        }
    }
}

/// Sends a reply to the queue named by the request's `reply-to`.
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish_reply(&self, reply_to: &str, correlation_id: Option<&str>, body: &[u8]) -> Result<()>;
}

#[async_trait]
impl ReplyPublisher for Channel {
    async fn publish_reply(&self, reply_to: &str, correlation_id: Option<&str>, body: &[u8]) -> Result<()> {
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if let Some(correlation_id) = correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }

        self.basic_publish("", reply_to, BasicPublishOptions::default(), body, properties)
            .await
            .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;
        Ok(())
    }
}

/// Final disposition of a delivery.
#[async_trait]
pub trait Settle: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn reject(&self, requeue: bool) -> Result<()>;
}

#[async_trait]
impl Settle for Acker {
    async fn ack(&self) -> Result<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        Acker::reject(self, BasicRejectOptions { requeue })
            .await
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Replied(PaymentResult),
    Rejected,
}

/// Handles one delivery to completion. Broker faults are returned; everything that goes
/// wrong with the request itself is answered with a failure reply.
pub async fn process_request<P, A, H>(
    publisher: &P,
    envelope: RequestEnvelope,
    acker: &A,
    handler: &mut H,
) -> Result<Outcome>
where
    P: ReplyPublisher + ?Sized,
    A: Settle + ?Sized,
    H: PaymentHandler + ?Sized,
{
    let Some(reply_to) = envelope.reply_to.as_deref() else {
        error!("Received RPC request without reply_to");
        acker.reject(false).await?;
        return Ok(Outcome::Rejected);
    };

    let correlation_id = envelope.correlation_id.as_deref();
    if correlation_id.is_none() {
        warn!(reply_to = %reply_to, "Received RPC request without correlation_id");
    }

    let result = match serde_json::from_slice::<PaymentRequest>(&envelope.payload) {
        Ok(request) => {
            debug!(name = %request.name, amount = %request.amount, "Received payment request");
            handler.handle(request).await
        }
        Err(e) => {
            error!("Failed to deserialize request: {}", e);
            PaymentResult::failure(format!("invalid request: {}", e))
        }
    };

    let body = serde_json::to_vec(&result)?;
    publisher.publish_reply(reply_to, correlation_id, &body).await?;
    acker.ack().await?;

    info!(
        reply_to = %reply_to,
        correlation_id = correlation_id.unwrap_or(""),
        success = result.success,
        "Sent payment reply"
    );
    Ok(Outcome::Replied(result))
}

/// Drives deliveries one at a time until the stream ends or the broker fails.
/// Returning at all means the consumer is gone.
pub async fn serve<S, A, P, H>(deliveries: S, publisher: &P, handler: &mut H) -> Result<()>
where
    S: Stream<Item = Result<(RequestEnvelope, A)>>,
    A: Settle,
    P: ReplyPublisher + ?Sized,
    H: PaymentHandler + ?Sized,
{
    let mut deliveries = std::pin::pin!(deliveries);

    while let Some(delivery) = deliveries.next().await {
        let (envelope, acker) = delivery?;
        process_request(publisher, envelope, &acker, &mut *handler).await?;
    }

    Err(RabbitMQError::ConsumeError("consumer stream closed by broker".to_string()))
}

/// Binds the payment queue and serves it for the lifetime of the worker.
pub struct RpcServer {
    connection_manager: ConnectionManager,
    queue: String,
}

impl RpcServer {
    pub fn new(connection_manager: ConnectionManager, queue: &str) -> Self {
        RpcServer {
            connection_manager,
            queue: queue.to_string(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn setup(&mut self) -> Result<(Channel, Consumer)> {
        let channel = self.connection_manager.create_channel().await?;

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: false,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::QueueError(format!("Failed to declare queue: {}", e)))?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to set QoS: {}", e)))?;

        let consumer_tag = format!("payer-{}", &Uuid::new_v4().to_string()[..8]);
        let consumer = channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::ConsumeError(format!("Failed to create consumer: {}", e)))?;

        Ok((channel, consumer))
    }

    /// Only returns on failure: setup errors, broker faults while replying, or the
    /// consumer being cancelled.
    pub async fn run<H: PaymentHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let (channel, consumer) = self.setup().await?;
        info!(queue = %self.queue, prefetch = PREFETCH_COUNT, "Worker up - awaiting RPC requests");

        let deliveries = consumer.map(|delivery| {
            delivery
                .map(|delivery| (RequestEnvelope::from_delivery(&delivery), delivery.acker))
                .map_err(|e| RabbitMQError::ConsumeError(e.to_string()))
        });

        serve(deliveries, &channel, handler).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.connection_manager.close().await
    }
}
