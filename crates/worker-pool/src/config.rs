//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::nats::{BrokerError, ConsumerSettings};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error(transparent)]
    Consumer(#[from] BrokerError),
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// NATS server URL.
    pub nats_url: String,

    /// JetStream stream name; the stream covers `<stream>.>`.
    pub nats_stream: String,

    /// Job subject suffix, jobs arrive on `<stream>.<subject>`.
    pub nats_subject: String,

    /// Durable consumer name.
    pub nats_consumer: String,

    /// Update an existing push consumer in place.
    pub consumer_upsert: bool,

    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub max_pending: i64,

    /// Stream replicas.
    pub replicas: usize,

    /// Number of workers.
    pub concurrency: usize,

    /// Heartbeat period for in-flight messages.
    pub notify_period: Duration,

    /// Persist ephemeral workflow runs as well.
    pub no_ephemeral: bool,

    /// Directory of workflow definitions loaded at startup.
    pub workflows_dir: Option<PathBuf>,

    /// How long to wait for the last worker on shutdown.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let ack_wait = Duration::from_secs(parse(
            &var,
            "WORKFLOWS_NATS_ACK_WAIT",
            defaults.ack_wait.as_secs(),
        )?);

        let notify_period = match var("WORKFLOWS_NOTIFY_PERIOD") {
            Some(_) => Duration::from_secs(parse(&var, "WORKFLOWS_NOTIFY_PERIOD", 0)?),
            None => default_notify_period(ack_wait),
        };

        Ok(Self {
            nats_url: var("WORKFLOWS_NATS_URL").unwrap_or(defaults.nats_url),
            nats_stream: var("WORKFLOWS_NATS_STREAM").unwrap_or(defaults.nats_stream),
            nats_subject: var("WORKFLOWS_NATS_SUBJECT").unwrap_or(defaults.nats_subject),
            nats_consumer: var("WORKFLOWS_NATS_CONSUMER").unwrap_or(defaults.nats_consumer),
            consumer_upsert: parse(&var, "WORKFLOWS_NATS_CONSUMER_UPSERT", defaults.consumer_upsert)?,
            ack_wait,
            max_deliver: parse(&var, "WORKFLOWS_NATS_MAX_DELIVER", defaults.max_deliver)?,
            max_pending: parse(&var, "WORKFLOWS_NATS_MAX_PENDING", defaults.max_pending)?,
            replicas: parse(&var, "WORKFLOWS_NATS_REPLICAS", defaults.replicas)?,
            concurrency: parse(&var, "WORKFLOWS_CONCURRENCY", defaults.concurrency)?,
            notify_period,
            no_ephemeral: parse(&var, "WORKFLOWS_NO_EPHEMERAL", defaults.no_ephemeral)?,
            workflows_dir: var("WORKFLOWS_DIR").map(PathBuf::from),
            shutdown_timeout: Duration::from_secs(parse(
                &var,
                "WORKFLOWS_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout.as_secs(),
            )?),
        })
    }

    /// Check the configuration before anything touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency < 1 {
            return Err(ConfigError::Validation(format!(
                "concurrency: {} < 1",
                self.concurrency
            )));
        }
        self.consumer_settings().validate()?;
        if self.notify_period.is_zero() || self.notify_period >= self.ack_wait {
            return Err(ConfigError::Validation(format!(
                "notify period {:?} must be positive and below ack wait {:?}",
                self.notify_period, self.ack_wait
            )));
        }
        Ok(())
    }

    /// Subject jobs are published to and consumed from.
    pub fn job_subject(&self) -> String {
        format!("{}.{}", self.nats_stream, self.nats_subject)
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            filter: self.job_subject(),
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            max_pending: self.max_pending,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let ack_wait = Duration::from_secs(30);
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            nats_stream: "WORKFLOWS".to_string(),
            nats_subject: "jobs".to_string(),
            nats_consumer: "workflows-worker".to_string(),
            consumer_upsert: false,
            ack_wait,
            max_deliver: 3,
            max_pending: 1000,
            replicas: 1,
            concurrency: 10,
            notify_period: default_notify_period(ack_wait),
            no_ephemeral: false,
            workflows_dir: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// 80% of the ack wait.
fn default_notify_period(ack_wait: Duration) -> Duration {
    ack_wait * 4 / 5
}

fn parse<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
