use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreError;

/// Temporary credentials for the source account. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialLease {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of fresh leases, e.g. an STS `AssumeRole` call.
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    async fn assume(&self) -> Result<CredentialLease, StoreError>;
}
