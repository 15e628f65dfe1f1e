//! Workflows Worker Pool
//!
//! Executes workflow jobs received via NATS JetStream.
//!
//! This crate provides:
//! - Broker client for stream/consumer lifecycle, publish and subscribe
//! - Data store interface with an in-memory implementation
//! - Job processor running tasks in order with per-task retry
//! - Worker group with heartbeat sidecars and observable shutdown

pub mod config;
pub mod nats;
pub mod processor;
pub mod store;
pub mod worker;

pub use config::{ConfigError, WorkerConfig};
pub use nats::{BrokerClient, BrokerError, ConsumerMode, ConsumerSettings, Subscription};
pub use processor::{JobProcessor, ProcessError};
pub use store::{DataStore, MemoryStore, StoreError};
pub use worker::{Delivery, MessageSource, PoolError, WorkerGroup, WorkerId};
