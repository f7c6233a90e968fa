use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::adapters::credentials::{CredentialLease, LeaseProvider};
use crate::adapters::{StoreError, StoreErrorKind};
use crate::retry::with_retry;
use crate::runtime::error::ReplicationError;
use crate::runtime::retry::RetryPolicy;

pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 120;

/// Single refresh point for source-account credentials.
///
/// The cached lease is handed out until less than `refresh_margin` of its
/// lifetime remains; then it is replaced before anyone can use an expiring
/// one. Concurrent callers wait on the same refresh.
pub struct CredentialBroker<'a> {
    provider: &'a dyn LeaseProvider,
    retry: RetryPolicy,
    refresh_margin: Duration,
    cached: Mutex<Option<CredentialLease>>,
}

impl<'a> CredentialBroker<'a> {
    pub fn new(provider: &'a dyn LeaseProvider, retry: RetryPolicy) -> Self {
        Self::with_refresh_margin(
            provider,
            retry,
            Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
        )
    }

    pub fn with_refresh_margin(
        provider: &'a dyn LeaseProvider,
        retry: RetryPolicy,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            provider,
            retry,
            refresh_margin,
            cached: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) -> Result<CredentialLease, ReplicationError> {
        let mut cached = self.cached.lock().await;
        if let Some(lease) = cached.as_ref() {
            if lease.expires_at - Utc::now() > self.refresh_margin {
                return Ok(lease.clone());
            }
        }

        let lease = with_retry(
            &self.retry,
            "assume_source_role",
            |error: &StoreError| error.is_transient(),
            |_| self.provider.assume(),
        )
        .await
        .map_err(|failure| match failure.error.kind {
            StoreErrorKind::Transient => ReplicationError::Authorization(format!(
                "credential service unavailable after {} attempt(s): {}",
                failure.attempts, failure.error.message
            )),
            _ => ReplicationError::Authorization(failure.error.message),
        })?;

        tracing::info!(
            component = "credential_broker",
            event = "lease_acquired",
            access_key_id = %lease.access_key_id,
            expires_at = %lease.expires_at.to_rfc3339(),
        );
        *cached = Some(lease.clone());
        Ok(lease)
    }
}
