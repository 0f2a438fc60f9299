//! Long-running scheduler service: configuration and the run loop driven
//! by the `scheduler-service` binary.

mod config;
mod runtime;

pub use config::ServiceConfig;
pub use runtime::run_service;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
