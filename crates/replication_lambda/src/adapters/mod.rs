//! Seams between the replication handlers and the outside world.
//!
//! Traits live in the per-concern modules; `aws` implements them against S3
//! and STS, `memory` implements them in-process for tests and dry runs.

use std::fmt;

use thiserror::Error;

pub mod aws;
pub mod checkpoint_store;
pub mod credentials;
pub mod destination;
pub mod memory;
pub mod source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Throttling, timeouts, 5xx and connection failures.
    Transient,
    Denied,
    NotFound,
    Permanent,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Denied => "denied",
            Self::NotFound => "not_found",
            Self::Permanent => "permanent",
        })
    }
}

/// Adapter failure, already classified so that retry decisions never need to
/// look at SDK types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Denied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Permanent, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}
