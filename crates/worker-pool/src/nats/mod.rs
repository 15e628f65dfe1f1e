//! NATS JetStream broker access.
//!
//! Stream and durable consumer lifecycle, job publishing and the
//! subscription shared by the worker group.

mod client;
mod consumer;
mod subscription;

pub use client::BrokerClient;
pub use consumer::{
    plan_consumer, should_delete, ConsumerAction, ConsumerMode, ConsumerSettings, DeliveryMode,
};
pub use subscription::Subscription;

use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("NATS connection error: {0}")]
    Connection(String),

    #[error("JetStream error: {0}")]
    JetStream(String),

    #[error("invalid consumer configuration {0}")]
    InvalidConsumer(String),

    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Receive error: {0}")]
    Receive(String),

    #[error("subscription closed")]
    SubscriptionClosed,

    #[error("Acknowledgement error: {0}")]
    Ack(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
