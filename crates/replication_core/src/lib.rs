//! Shared replication domain primitives.
//!
//! This crate owns the deterministic parts of the config-data staging job:
//! key parsing, selector filtering, checkpoint bookkeeping, retry timing and
//! run contracts. It intentionally excludes AWS SDK and Lambda runtime concerns.

pub mod budget;
pub mod checkpoint;
pub mod contract;
pub mod error;
pub mod filter;
pub mod object_keys;
pub mod retry;
