use crate::adapters::credentials::CredentialLease;
use crate::adapters::destination::DestinationStore;
use crate::adapters::StoreError;
use crate::retry::with_retry;
use crate::runtime::contract::{CopyOutcome, CopyStatus, CopyTask};
use crate::runtime::error::TransferError;
use crate::runtime::retry::RetryPolicy;

/// Copies single objects into the destination, skipping those already there.
pub struct TransferExecutor<'a> {
    destination: &'a dyn DestinationStore,
    retry: RetryPolicy,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(destination: &'a dyn DestinationStore, retry: RetryPolicy) -> Self {
        Self { destination, retry }
    }

    /// Never fails the run: every problem ends up as a `Failed` outcome.
    pub async fn copy(&self, task: CopyTask, lease: &CredentialLease) -> CopyOutcome {
        let result = with_retry(
            &self.retry,
            "copy_object",
            |error: &StoreError| error.is_transient(),
            |_| self.copy_once(&task, lease),
        )
        .await;

        match result {
            Ok(CopyStatus::SkippedAlreadyPresent) => CopyOutcome::already_present(task),
            Ok(_) => CopyOutcome::copied(task),
            Err(failure) => CopyOutcome::failed(
                task,
                TransferError {
                    attempts: failure.attempts,
                    message: failure.error.to_string(),
                },
            ),
        }
    }

    // The destination is re-checked on every attempt so a copy that landed
    // before its response was lost is not written twice.
    async fn copy_once(
        &self,
        task: &CopyTask,
        lease: &CredentialLease,
    ) -> Result<CopyStatus, StoreError> {
        if let Some(existing) = self.destination.head(&task.destination_key).await? {
            if existing.matches_fingerprint(&task.source.fingerprint) {
                return Ok(CopyStatus::SkippedAlreadyPresent);
            }
        }

        self.destination.copy_from_source(task, lease).await?;
        Ok(CopyStatus::Copied)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::adapters::memory::{InMemoryDestination, StaticLeaseProvider, StoredObject};
    use crate::adapters::credentials::LeaseProvider;
    use crate::runtime::object_keys::SourceObjectDescriptor;

    use super::*;

    const KEY: &str = "AWSLogs/111111111111/Config/us-east-1/2024/5/17/ConfigHistory/a.json.gz";

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_ratio: 0.0,
        }
    }

    fn task(fingerprint: &str) -> CopyTask {
        CopyTask::for_descriptor(SourceObjectDescriptor {
            bucket: "central-config".to_string(),
            key: KEY.to_string(),
            account_id: "111111111111".to_string(),
            service: "Config".to_string(),
            region: "us-east-1".to_string(),
            size: 128,
            fingerprint: fingerprint.to_string(),
            last_modified: None,
        })
    }

    async fn lease() -> CredentialLease {
        StaticLeaseProvider::default()
            .assume()
            .await
            .expect("lease should issue")
    }

    #[tokio::test]
    async fn copies_missing_object_to_same_key() {
        let destination = InMemoryDestination::new();
        let executor = TransferExecutor::new(&destination, quick_retry());

        let outcome = executor.copy(task("abc"), &lease().await).await;

        assert_eq!(outcome.status, CopyStatus::Copied);
        assert_eq!(outcome.task.destination_key, KEY);
        let stored = destination.get(KEY).expect("object should be copied");
        assert_eq!(stored.source_fingerprint.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn skips_object_with_matching_fingerprint() {
        let destination = InMemoryDestination::new();
        destination.seed(
            KEY,
            StoredObject {
                etag: "abc".to_string(),
                source_fingerprint: None,
                size: 128,
            },
        );
        let executor = TransferExecutor::new(&destination, quick_retry());

        let outcome = executor.copy(task("abc"), &lease().await).await;

        assert_eq!(outcome.status, CopyStatus::SkippedAlreadyPresent);
        assert!(destination.copy_calls().is_empty());
    }

    #[tokio::test]
    async fn recopies_object_with_different_fingerprint() {
        let destination = InMemoryDestination::new();
        destination.seed(
            KEY,
            StoredObject {
                etag: "old".to_string(),
                source_fingerprint: Some("old".to_string()),
                size: 64,
            },
        );
        let executor = TransferExecutor::new(&destination, quick_retry());

        let outcome = executor.copy(task("new"), &lease().await).await;

        assert_eq!(outcome.status, CopyStatus::Copied);
        assert_eq!(
            destination
                .get(KEY)
                .and_then(|object| object.source_fingerprint),
            Some("new".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_permanent_failure_is_reported() {
        let destination = InMemoryDestination::new();
        destination.fail_copies(
            KEY,
            [
                StoreError::transient("SlowDown"),
                StoreError::permanent("InvalidObjectState"),
            ],
        );
        let executor = TransferExecutor::new(&destination, quick_retry());

        let outcome = executor.copy(task("abc"), &lease().await).await;

        assert_eq!(outcome.status, CopyStatus::Failed);
        let error = outcome.error.expect("failure should carry its cause");
        assert_eq!(error.attempts, 2);
        assert!(error.message.contains("InvalidObjectState"));
        assert_eq!(destination.copy_calls().len(), 2);
        assert!(destination.get(KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_the_attempt_cap() {
        let destination = InMemoryDestination::new();
        destination.fail_copies(KEY, (0..5).map(|_| StoreError::transient("timeout")));
        let executor = TransferExecutor::new(&destination, quick_retry());

        let outcome = executor.copy(task("abc"), &lease().await).await;

        assert_eq!(outcome.status, CopyStatus::Failed);
        assert_eq!(destination.copy_calls().len(), 3);
    }
}
