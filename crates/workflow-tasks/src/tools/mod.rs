//! Built-in task executors.
//!
//! - `http` - HTTP requests
//! - `cli` - process execution
//! - `nats` - publish to a subject under the workflows stream
//!
//! `smtp` tasks have no built-in executor.

mod cli;
mod http;
mod nats;

pub use self::cli::CliExecutor;
pub use self::http::HttpExecutor;
pub use self::nats::{NatsExecutor, SubjectPublisher};

use async_nats::jetstream::Context;

use crate::registry::ExecutorRegistry;

/// Create a registry with all built-in executors registered.
pub fn create_default_registry(js: Context, stream: &str) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();

    registry.register(HttpExecutor::new());
    registry.register(CliExecutor::new());
    registry.register(NatsExecutor::new(js, stream));

    registry
}
