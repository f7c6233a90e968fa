//! AWS-oriented adapters and handlers for the config-data replication job.
//!
//! This crate owns runtime integration details (the Lambda entry point, S3 and
//! STS adapters, configuration and logging) and exposes a single runtime module
//! boundary for the checkpoint, filter, key and retry primitives.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod retry;
pub mod runtime;
