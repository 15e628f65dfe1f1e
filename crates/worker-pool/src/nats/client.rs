//! JetStream client for the workflows stream.

use async_nats::jetstream::response::Response;
use async_nats::jetstream::{self, consumer, stream, Context, ErrorCode};
use async_nats::{ConnectOptions, Event};
use std::time::Duration;
use tokio::sync::Mutex;
use workflow_tasks::Job;

use super::consumer::{
    plan_consumer, should_delete, ConsumerAction, ConsumerMode, ConsumerSettings, DeliveryMode,
};
use super::subscription::Subscription;
use super::BrokerError;

/// Retention of unconsumed jobs.
const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Broker client bound to one stream.
#[derive(Clone)]
pub struct BrokerClient {
    client: async_nats::Client,
    js: Context,
    stream_name: String,
}

impl BrokerClient {
    /// Connect to NATS, retrying the initial connect and reconnecting forever.
    pub async fn connect(url: &str, stream_name: &str) -> Result<Self, BrokerError> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let client = ConnectOptions::new()
            .name(format!("workflows-worker@{}", host))
            .retry_on_initial_connect()
            .max_reconnects(None::<usize>)
            .event_callback(|event| async move {
                match event {
                    Event::Connected => tracing::info!("NATS client connected"),
                    Event::Disconnected => tracing::warn!("NATS client disconnected"),
                    Event::Closed => tracing::info!("NATS client closed the connection"),
                    Event::ClientError(e) => tracing::warn!(error = %e, "NATS client error"),
                    other => tracing::debug!(event = %other, "NATS client event"),
                }
            })
            .connect(url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tracing::info!(url = %url, stream = %stream_name, "Connected to NATS");

        Ok(Self::from_client(client, stream_name))
    }

    /// Wrap an existing connection.
    pub fn from_client(client: async_nats::Client, stream_name: &str) -> Self {
        let js = jetstream::new(client.clone());
        Self {
            client,
            js,
            stream_name: stream_name.to_string(),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn jetstream(&self) -> &Context {
        &self.js
    }

    /// Flush pending publishes.
    pub async fn flush(&self) -> Result<(), BrokerError> {
        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    /// Ensure the stream exists, covering `<stream>.>` as a work queue.
    pub async fn create_stream(&self, replicas: usize) -> Result<(), BrokerError> {
        match self.js.get_stream(&self.stream_name).await {
            Ok(_) => {
                tracing::debug!(stream = %self.stream_name, "Using existing NATS stream");
                Ok(())
            }
            Err(_) => {
                let config = stream::Config {
                    name: self.stream_name.clone(),
                    subjects: vec![format!("{}.>", self.stream_name)],
                    max_age: STREAM_MAX_AGE,
                    retention: stream::RetentionPolicy::WorkQueue,
                    storage: stream::StorageType::File,
                    num_replicas: replicas,
                    ..Default::default()
                };

                self.js
                    .create_stream(config)
                    .await
                    .map_err(|e| BrokerError::JetStream(e.to_string()))?;

                tracing::info!(stream = %self.stream_name, replicas, "Created NATS stream");
                Ok(())
            }
        }
    }

    async fn stream(&self) -> Result<stream::Stream, BrokerError> {
        self.js
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| BrokerError::JetStream(e.to_string()))
    }

    /// Current configuration of consumer `name`, if it exists.
    async fn consumer_config(&self, name: &str) -> Result<Option<consumer::Config>, BrokerError> {
        let subject = format!("CONSUMER.INFO.{}.{}", self.stream_name, name);
        let response: Response<consumer::Info> = self
            .js
            .request(subject, &serde_json::json!({}))
            .await
            .map_err(|e| BrokerError::JetStream(e.to_string()))?;
        existing_config(response)
    }

    /// Mode of consumer `name`, `None` if it does not exist.
    pub async fn consumer_mode(&self, name: &str) -> Result<Option<ConsumerMode>, BrokerError> {
        Ok(self
            .consumer_config(name)
            .await?
            .as_ref()
            .map(ConsumerMode::from_config))
    }

    /// Create the durable consumer `name`, or update it when `upsert` is set.
    ///
    /// See [`plan_consumer`] for how existing consumers are treated.
    pub async fn create_consumer(
        &self,
        name: &str,
        upsert: bool,
        settings: &ConsumerSettings,
    ) -> Result<(), BrokerError> {
        settings.validate()?;
        let stream = self.stream().await?;

        let current = self.consumer_mode(name).await?;
        let mut action = plan_consumer(name, current.as_ref(), upsert, settings);

        if let ConsumerAction::Create(config) = action {
            match stream.create_consumer(config).await {
                Ok(_) => {
                    tracing::info!(consumer = %name, mode = "pull", "Created NATS consumer");
                    return Ok(());
                }
                Err(e) => {
                    // Created concurrently by another instance.
                    let Some(current) = self.consumer_mode(name).await? else {
                        return Err(BrokerError::JetStream(e.to_string()));
                    };
                    action = plan_consumer(name, Some(&current), upsert, settings);
                }
            }
        }

        match action {
            ConsumerAction::Update(config) => {
                stream
                    .update_consumer(config)
                    .await
                    .map_err(|e| BrokerError::JetStream(e.to_string()))?;
                tracing::info!(consumer = %name, mode = "push", "Updated NATS consumer");
            }
            ConsumerAction::Keep | ConsumerAction::Create(_) => {
                tracing::debug!(consumer = %name, "Using existing NATS consumer");
            }
        }
        Ok(())
    }

    /// Delete consumer `name` if its current mode is `mode`.
    ///
    /// A missing consumer is not an error.
    pub async fn delete_consumer_by_mode(
        &self,
        name: &str,
        mode: DeliveryMode,
    ) -> Result<(), BrokerError> {
        let current = self.consumer_mode(name).await?;
        if should_delete(current.as_ref(), mode) {
            self.stream()
                .await?
                .delete_consumer(name)
                .await
                .map_err(|e| BrokerError::JetStream(format!("failed to delete consumer: {}", e)))?;
            tracing::info!(consumer = %name, mode = %mode, "Deleted NATS consumer");
        }
        Ok(())
    }

    /// Subscribe to the durable consumer `name` using its current mode.
    pub async fn subscribe(&self, name: &str) -> Result<Subscription, BrokerError> {
        let mode = self
            .consumer_mode(name)
            .await?
            .ok_or_else(|| BrokerError::ConsumerNotFound(name.to_string()))?;
        let stream = self.stream().await?;

        let subscription = match mode {
            ConsumerMode::Pull => {
                let consumer = stream
                    .get_consumer::<consumer::pull::Config>(name)
                    .await
                    .map_err(|e| BrokerError::JetStream(e.to_string()))?;
                Subscription::Pull(consumer)
            }
            ConsumerMode::Push { .. } => {
                let consumer = stream
                    .get_consumer::<consumer::push::Config>(name)
                    .await
                    .map_err(|e| BrokerError::JetStream(e.to_string()))?;
                let messages = consumer
                    .messages()
                    .await
                    .map_err(|e| BrokerError::JetStream(e.to_string()))?;
                Subscription::Push(Mutex::new(messages))
            }
        };

        tracing::info!(consumer = %name, mode = %mode.delivery(), "Subscribed to NATS consumer");
        Ok(subscription)
    }

    /// Publish `payload` to `subject` and wait for the stream to store it.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.js
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    /// Submit a job on `<stream>.<subject>`.
    pub async fn publish_job(&self, subject: &str, job: &Job) -> Result<(), BrokerError> {
        let (subject, payload) = encode_job(&self.stream_name, subject, job)?;
        self.publish(&subject, payload).await?;

        tracing::debug!(
            job_id = %job.id,
            workflow = %job.workflow_name,
            subject = %subject,
            "Published job"
        );
        Ok(())
    }
}

/// Consumer config from a `CONSUMER.INFO` response; `None` if the consumer
/// does not exist.
fn existing_config(
    response: Response<consumer::Info>,
) -> Result<Option<consumer::Config>, BrokerError> {
    match response {
        Response::Ok(info) => Ok(Some(info.config)),
        Response::Err { error } if error.error_code() == ErrorCode::CONSUMER_NOT_FOUND => Ok(None),
        Response::Err { error } => Err(BrokerError::JetStream(error.to_string())),
    }
}

/// Full subject and JSON body for submitting `job`.
fn encode_job(stream: &str, subject: &str, job: &Job) -> Result<(String, Vec<u8>), BrokerError> {
    let payload =
        serde_json::to_vec(job).map_err(|e| BrokerError::Serialization(e.to_string()))?;
    Ok((format!("{}.{}", stream, subject), payload))
}
