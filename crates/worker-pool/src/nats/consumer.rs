//! Durable consumer settings and push/pull mode handling.

use async_nats::jetstream::consumer::{self, AckPolicy, DeliverPolicy};
use std::time::Duration;

use super::BrokerError;

/// Description stored on consumers created by this service.
pub const CONSUMER_DESCRIPTION: &str = "workflows/v1";

/// Delivery mode of an existing durable consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerMode {
    /// Messages are fetched on demand.
    Pull,
    /// Messages are delivered to `deliver_subject`.
    Push { deliver_subject: String },
}

/// Mode without the push delivery subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Pull,
    Push,
}

impl ConsumerMode {
    /// A consumer with a delivery subject is push, otherwise pull.
    pub fn from_config(config: &consumer::Config) -> Self {
        match config.deliver_subject.as_deref() {
            Some(subject) if !subject.is_empty() => ConsumerMode::Push {
                deliver_subject: subject.to_string(),
            },
            _ => ConsumerMode::Pull,
        }
    }

    pub fn delivery(&self) -> DeliveryMode {
        match self {
            ConsumerMode::Pull => DeliveryMode::Pull,
            ConsumerMode::Push { .. } => DeliveryMode::Push,
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Pull => write!(f, "pull"),
            DeliveryMode::Push => write!(f, "push"),
        }
    }
}

/// Tunables of the durable job consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Subject filter.
    pub filter: String,

    /// Redelivery timeout for unacknowledged messages.
    pub ack_wait: Duration,

    /// Maximum deliveries per message.
    pub max_deliver: i64,

    /// Maximum unacknowledged messages. Bounds horizontal scaling.
    pub max_pending: i64,
}

impl ConsumerSettings {
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.ack_wait < Duration::from_secs(1) {
            return Err(BrokerError::InvalidConsumer(format!(
                "AckWait: {:?} < 1s",
                self.ack_wait
            )));
        }
        if self.max_deliver < 1 {
            return Err(BrokerError::InvalidConsumer(format!(
                "MaxDeliver: {} < 1",
                self.max_deliver
            )));
        }
        if self.max_pending < 1 {
            return Err(BrokerError::InvalidConsumer(format!(
                "MaxPending: {} < 1",
                self.max_pending
            )));
        }
        Ok(())
    }

    /// Consumer configuration for `name` in the given mode.
    ///
    /// Name, durable name and (for push) delivery group are all `name`.
    /// Pull consumers carry no delivery subject and use the server's
    /// redelivery limit.
    pub fn to_config(&self, name: &str, mode: &ConsumerMode) -> consumer::Config {
        let (deliver_subject, deliver_group, max_deliver) = match mode {
            ConsumerMode::Push { deliver_subject } => (
                Some(deliver_subject.clone()),
                Some(name.to_string()),
                self.max_deliver,
            ),
            ConsumerMode::Pull => (None, None, 0),
        };

        consumer::Config {
            name: Some(name.to_string()),
            durable_name: Some(name.to_string()),
            description: Some(CONSUMER_DESCRIPTION.to_string()),
            deliver_subject,
            deliver_group,
            filter_subject: self.filter.clone(),
            ack_wait: self.ack_wait,
            max_ack_pending: self.max_pending,
            max_deliver,
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            ..Default::default()
        }
    }
}

/// What to do to reach the desired consumer state.
#[derive(Debug, Clone)]
pub enum ConsumerAction {
    /// Consumer is absent; create it.
    Create(consumer::Config),
    /// Existing push consumer; update in place.
    Update(consumer::Config),
    /// Leave the existing consumer untouched.
    Keep,
}

/// Decide how to create or update the consumer `name`.
///
/// New consumers are created in pull mode. With `upsert`, an existing push
/// consumer is updated keeping its delivery subject; pull consumers are
/// never modified and push consumers are never turned into pull ones.
pub fn plan_consumer(
    name: &str,
    existing: Option<&ConsumerMode>,
    upsert: bool,
    settings: &ConsumerSettings,
) -> ConsumerAction {
    match existing {
        None => ConsumerAction::Create(settings.to_config(name, &ConsumerMode::Pull)),
        Some(mode @ ConsumerMode::Push { .. }) if upsert => {
            ConsumerAction::Update(settings.to_config(name, mode))
        }
        Some(_) => ConsumerAction::Keep,
    }
}

/// A consumer is deleted by mode only if it exists in that mode.
pub fn should_delete(current: Option<&ConsumerMode>, mode: DeliveryMode) -> bool {
    current.is_some_and(|current| current.delivery() == mode)
}
