#![forbid(unsafe_code)]
//! sift-pipeline library.
//!
//! The answering flow over a bounded collection: retrieve, fuse, evaluate,
//! draft, verify. [`pipeline::Pipeline`] composes the stages over the service
//! traits in `sift_core::service`; [`http`] provides blocking clients for
//! them.
//!
//! # Conventions
//!
//! - **Errors**: Service calls return `ServiceError`; the orchestrator turns
//!   every failure into a complete `PipelineResult`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod drafter;
pub mod http;
pub mod pipeline;
pub mod verifier;

pub use pipeline::{Pipeline, Services};
