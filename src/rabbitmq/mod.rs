// src/rabbitmq/mod.rs
// Broker side of the payment worker

pub mod connection;
pub mod errors;
pub mod request_response;

pub use connection::ConnectionManager;
pub use errors::{RabbitMQError, Result};
pub use request_response::{
    process_request, serve, Outcome, ReplyPublisher, RequestEnvelope, RpcServer, Settle, DEFAULT_QUEUE,
    PREFETCH_COUNT,
};
