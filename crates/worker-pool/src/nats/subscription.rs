//! Inbound job messages from a durable consumer.

use async_nats::jetstream::consumer::{pull, push, Consumer};
use async_nats::jetstream::{AckKind, Message};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;

use super::BrokerError;
use crate::worker::{Delivery, MessageSource};

/// How long a single pull fetch waits for a message.
const FETCH_EXPIRES: Duration = Duration::from_secs(1);

/// Message source bound to a durable consumer.
///
/// The transport follows the consumer's mode at subscribe time and is
/// shared by every worker of a group.
pub enum Subscription {
    /// Fetch one message at a time.
    Pull(Consumer<pull::Config>),
    /// Receive from the push delivery subject.
    Push(Mutex<push::Messages>),
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subscription::Pull(_) => write!(f, "Subscription::Pull"),
            Subscription::Push(_) => write!(f, "Subscription::Push"),
        }
    }
}

#[async_trait]
impl MessageSource for Subscription {
    type Message = Message;

    async fn next_message(&self) -> Result<Option<Message>, BrokerError> {
        match self {
            Subscription::Pull(consumer) => {
                let mut batch = consumer
                    .batch()
                    .max_messages(1)
                    .expires(FETCH_EXPIRES)
                    .messages()
                    .await
                    .map_err(|e| BrokerError::Receive(e.to_string()))?;

                match batch.next().await {
                    Some(Ok(msg)) => Ok(Some(msg)),
                    Some(Err(e)) => Err(BrokerError::Receive(e.to_string())),
                    None => Ok(None),
                }
            }
            Subscription::Push(messages) => match messages.lock().await.next().await {
                Some(Ok(msg)) => Ok(Some(msg)),
                Some(Err(e)) => Err(BrokerError::Receive(e.to_string())),
                None => Err(BrokerError::SubscriptionClosed),
            },
        }
    }
}

#[async_trait]
impl Delivery for Message {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.double_ack()
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn term(&self) -> Result<(), BrokerError> {
        self.ack_with(AckKind::Term)
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn in_progress(&self) -> Result<(), BrokerError> {
        self.ack_with(AckKind::Progress)
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
