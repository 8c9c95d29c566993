#![forbid(unsafe_code)]
//! sift-core library.
//!
//! Shared vocabulary for the answering pipeline: the request-scoped data
//! model, the failure taxonomy, configuration, and the service seams.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at library seams; `anyhow::Result`
//!   for file and config loading.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod collection;
pub mod config;
pub mod error;
pub mod model;
pub mod ratelimit;
pub mod service;

pub use error::{ConfigError, FailureKind, QueryError, ServiceError, ServiceKind};
