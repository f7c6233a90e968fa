use std::fmt;

use crate::adapters::source::{ListPage, SourceListing};
use crate::adapters::{StoreError, StoreErrorKind};
use crate::retry::with_retry;
use crate::runtime::checkpoint::ContinuationMarker;
use crate::runtime::error::ReplicationError;
use crate::runtime::retry::RetryPolicy;

use super::broker::CredentialBroker;

/// S3 never returns more than this many keys per listing call.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Pages through the source namespace in lexical key order.
pub struct NamespaceEnumerator<'a> {
    source: &'a dyn SourceListing,
    broker: &'a CredentialBroker<'a>,
    retry: RetryPolicy,
    page_size: usize,
}

enum ListAttemptError {
    Lease(ReplicationError),
    Store(StoreError),
}

impl fmt::Display for ListAttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lease(error) => error.fmt(f),
            Self::Store(error) => error.fmt(f),
        }
    }
}

impl<'a> NamespaceEnumerator<'a> {
    pub fn new(
        source: &'a dyn SourceListing,
        broker: &'a CredentialBroker<'a>,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        Self {
            source,
            broker,
            retry,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Lists the page following `after`. Transient failures are retried; a
    /// denied listing is an authorization failure and anything else that
    /// persists is an enumeration failure.
    pub async fn list_page(
        &self,
        after: Option<&ContinuationMarker>,
    ) -> Result<ListPage, ReplicationError> {
        let result = with_retry(
            &self.retry,
            "list_source_page",
            |error: &ListAttemptError| {
                matches!(error, ListAttemptError::Store(store) if store.is_transient())
            },
            |_| async move {
                let lease = self.broker.acquire().await.map_err(ListAttemptError::Lease)?;
                self.source
                    .list_page(&lease, after, self.page_size)
                    .await
                    .map_err(ListAttemptError::Store)
            },
        )
        .await;

        match result {
            Ok(page) => Ok(page),
            Err(failure) => Err(match failure.error {
                ListAttemptError::Lease(error) => error,
                ListAttemptError::Store(error) if error.kind == StoreErrorKind::Denied => {
                    ReplicationError::Authorization(format!(
                        "listing s3://{} was denied: {}",
                        self.source.bucket(),
                        error.message
                    ))
                }
                ListAttemptError::Store(error) => ReplicationError::Enumeration {
                    attempts: failure.attempts,
                    message: error.to_string(),
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::adapters::memory::{InMemorySource, StaticLeaseProvider};
    use crate::runtime::object_keys::ListedObject;

    use super::*;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_ratio: 0.0,
        }
    }

    fn source() -> InMemorySource {
        InMemorySource::with_objects(
            "central-config",
            (0..5).map(|index| ListedObject {
                key: format!("AWSLogs/111111111111/Config/us-east-1/{index}.json.gz"),
                size: 10,
                etag: format!("\"etag-{index}\""),
                last_modified: None,
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_transient_listing_errors() {
        let provider = StaticLeaseProvider::default();
        let broker = CredentialBroker::new(&provider, quick_retry());
        let source = source();
        source.fail_next_listings([StoreError::transient("SlowDown")]);

        let enumerator = NamespaceEnumerator::new(&source, &broker, quick_retry(), 2);
        let page = enumerator.list_page(None).await.expect("page after retry");

        assert_eq!(page.objects.len(), 2);
        assert!(page.next_marker.is_some());
        assert_eq!(source.requested_markers(), vec![None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_is_an_enumeration_error() {
        let provider = StaticLeaseProvider::default();
        let broker = CredentialBroker::new(&provider, quick_retry());
        let source = source();
        source.fail_next_listings([
            StoreError::transient("SlowDown"),
            StoreError::transient("SlowDown"),
            StoreError::transient("SlowDown"),
        ]);

        let enumerator = NamespaceEnumerator::new(&source, &broker, quick_retry(), 2);
        let error = enumerator.list_page(None).await.expect_err("listing should fail");

        assert!(matches!(error, ReplicationError::Enumeration { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn denied_listing_is_an_authorization_error() {
        let provider = StaticLeaseProvider::default();
        let broker = CredentialBroker::new(&provider, quick_retry());
        let source = source();
        source.fail_next_listings([StoreError::denied("AccessDenied")]);

        let enumerator = NamespaceEnumerator::new(&source, &broker, quick_retry(), 2);
        let error = enumerator.list_page(None).await.expect_err("listing should fail");

        assert!(matches!(error, ReplicationError::Authorization(_)));
        assert_eq!(source.requested_markers().len(), 1);
    }

    #[tokio::test]
    async fn page_size_is_clamped_to_listing_limit() {
        let provider = StaticLeaseProvider::default();
        let broker = CredentialBroker::new(&provider, quick_retry());
        let source = source();

        let enumerator = NamespaceEnumerator::new(&source, &broker, quick_retry(), 0);
        let page = enumerator.list_page(None).await.expect("page");
        assert_eq!(page.objects.len(), 1);
    }
}
