use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that end a replication run.
///
/// Per-object problems are not represented here; they are recorded as
/// [`TransferError`]s on the affected outcome and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// The source trust relationship rejected us (wrong caller, revoked role,
    /// denied listing). Never retried.
    #[error("authorization rejected: {0}")]
    Authorization(String),
    /// Listing the source namespace kept failing after retries.
    #[error("enumeration failed after {attempts} attempt(s): {message}")]
    Enumeration { attempts: u32, message: String },
    #[error("checkpoint store failure: {0}")]
    Checkpoint(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl ReplicationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorization(_) => "authorization_error",
            Self::Enumeration { .. } => "enumeration_error",
            Self::Checkpoint(_) => "checkpoint_error",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// A single object that could not be copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (after {attempts} attempt(s))")]
pub struct TransferError {
    pub attempts: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable_identifiers() {
        assert_eq!(
            ReplicationError::Authorization("denied".to_string()).kind(),
            "authorization_error"
        );
        assert_eq!(
            ReplicationError::Enumeration {
                attempts: 5,
                message: "slow down".to_string()
            }
            .to_string(),
            "enumeration failed after 5 attempt(s): slow down"
        );
    }
}
