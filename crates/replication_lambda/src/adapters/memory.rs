//! In-process adapters. Used by the test suites and for exercising the
//! orchestrator without AWS access.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::runtime::checkpoint::{Checkpoint, ContinuationMarker};
use crate::runtime::contract::CopyTask;
use crate::runtime::object_keys::ListedObject;

use super::checkpoint_store::CheckpointStore;
use super::credentials::{CredentialLease, LeaseProvider};
use super::destination::{DestinationObject, DestinationStore};
use super::source::{ListPage, SourceListing};
use super::StoreError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct InMemorySource {
    bucket: String,
    objects: Mutex<BTreeMap<String, ListedObject>>,
    listing_failures: Mutex<VecDeque<StoreError>>,
    access_error: Mutex<Option<StoreError>>,
    requested_markers: Mutex<Vec<Option<String>>>,
}

impl InMemorySource {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            listing_failures: Mutex::new(VecDeque::new()),
            access_error: Mutex::new(None),
            requested_markers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_objects(
        bucket: impl Into<String>,
        objects: impl IntoIterator<Item = ListedObject>,
    ) -> Self {
        let source = Self::new(bucket);
        for object in objects {
            source.put(object);
        }
        source
    }

    pub fn put(&self, object: ListedObject) {
        lock(&self.objects).insert(object.key.clone(), object);
    }

    /// The next listing calls fail with these errors, in order.
    pub fn fail_next_listings(&self, errors: impl IntoIterator<Item = StoreError>) {
        lock(&self.listing_failures).extend(errors);
    }

    pub fn deny_access(&self, error: StoreError) {
        *lock(&self.access_error) = Some(error);
    }

    /// Markers passed to every `list_page` call so far.
    pub fn requested_markers(&self) -> Vec<Option<String>> {
        lock(&self.requested_markers).clone()
    }
}

#[async_trait]
impl SourceListing for InMemorySource {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_access(&self, _lease: &CredentialLease) -> Result<(), StoreError> {
        match lock(&self.access_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn list_page(
        &self,
        _lease: &CredentialLease,
        after: Option<&ContinuationMarker>,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        lock(&self.requested_markers).push(after.map(|marker| marker.as_str().to_string()));
        if let Some(error) = lock(&self.listing_failures).pop_front() {
            return Err(error);
        }

        let objects = lock(&self.objects);
        let lower = match after {
            Some(marker) => Bound::Excluded(marker.as_str().to_string()),
            None => Bound::Unbounded,
        };
        let mut window: Vec<ListedObject> = objects
            .range((lower, Bound::Unbounded))
            .take(max_keys.max(1) + 1)
            .map(|(_, object)| object.clone())
            .collect();

        let truncated = window.len() > max_keys.max(1);
        if truncated {
            window.pop();
        }
        let next_marker = if truncated {
            window
                .last()
                .map(|object| ContinuationMarker::from_listing(object.key.clone()))
        } else {
            None
        };

        Ok(ListPage {
            objects: window,
            next_marker,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub etag: String,
    pub source_fingerprint: Option<String>,
    pub size: u64,
}

#[derive(Default)]
pub struct InMemoryDestination {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    copy_failures: Mutex<HashMap<String, VecDeque<StoreError>>>,
    access_error: Mutex<Option<StoreError>>,
    copy_calls: Mutex<Vec<String>>,
}

impl InMemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: impl Into<String>, object: StoredObject) {
        lock(&self.objects).insert(key.into(), object);
    }

    /// Copies of `key` fail with these errors, in order, before succeeding.
    pub fn fail_copies(&self, key: impl Into<String>, errors: impl IntoIterator<Item = StoreError>) {
        lock(&self.copy_failures)
            .entry(key.into())
            .or_default()
            .extend(errors);
    }

    pub fn deny_access(&self, error: StoreError) {
        *lock(&self.access_error) = Some(error);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, StoredObject> {
        lock(&self.objects).clone()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Destination keys of every copy attempt, including failed ones.
    pub fn copy_calls(&self) -> Vec<String> {
        lock(&self.copy_calls).clone()
    }
}

#[async_trait]
impl DestinationStore for InMemoryDestination {
    async fn check_access(&self) -> Result<(), StoreError> {
        match lock(&self.access_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<DestinationObject>, StoreError> {
        Ok(lock(&self.objects).get(key).map(|object| DestinationObject {
            etag: object.etag.clone(),
            source_fingerprint: object.source_fingerprint.clone(),
        }))
    }

    async fn copy_from_source(
        &self,
        task: &CopyTask,
        _lease: &CredentialLease,
    ) -> Result<(), StoreError> {
        lock(&self.copy_calls).push(task.destination_key.clone());

        let scripted = lock(&self.copy_failures)
            .get_mut(&task.destination_key)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        lock(&self.objects).insert(
            task.destination_key.clone(),
            StoredObject {
                etag: format!("copy-of-{}", task.source.fingerprint),
                source_fingerprint: Some(task.source.fingerprint.clone()),
                size: task.source.size,
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    records: Mutex<HashMap<String, Checkpoint>>,
    save_failure: Mutex<Option<StoreError>>,
    saves: AtomicUsize,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run_key: &str) -> Option<Checkpoint> {
        lock(&self.records).get(run_key).cloned()
    }

    pub fn insert(&self, checkpoint: Checkpoint) {
        lock(&self.records).insert(checkpoint.run_key.clone(), checkpoint);
    }

    pub fn fail_saves(&self, error: StoreError) {
        *lock(&self.save_failure) = Some(error);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, run_key: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.get(run_key))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        if let Some(error) = lock(&self.save_failure).clone() {
            return Err(error);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(checkpoint.clone());
        Ok(())
    }
}

/// Issues synthetic leases valid for `ttl`.
pub struct StaticLeaseProvider {
    ttl: chrono::Duration,
    failures: Mutex<VecDeque<StoreError>>,
    calls: AtomicUsize,
}

impl StaticLeaseProvider {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            ttl,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = StoreError>) {
        lock(&self.failures).extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticLeaseProvider {
    fn default() -> Self {
        Self::new(chrono::Duration::hours(1))
    }
}

#[async_trait]
impl LeaseProvider for StaticLeaseProvider {
    async fn assume(&self) -> Result<CredentialLease, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        Ok(CredentialLease {
            access_key_id: format!("ASIAMEMORY{call:06}"),
            secret_access_key: "memory-secret".to_string(),
            session_token: Some(format!("memory-session-{call}")),
            expires_at: Utc::now() + self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(key: &str) -> ListedObject {
        ListedObject {
            key: key.to_string(),
            size: 1,
            etag: format!("\"{key}\""),
            last_modified: None,
        }
    }

    #[tokio::test]
    async fn source_pages_in_lexical_order() {
        let source = InMemorySource::with_objects("src", ["c", "a", "b", "d", "e"].map(listed));
        let lease = StaticLeaseProvider::default()
            .assume()
            .await
            .expect("lease should issue");

        let first = source.list_page(&lease, None, 2).await.expect("page 1");
        assert_eq!(
            first.objects.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let second = source
            .list_page(&lease, first.next_marker.as_ref(), 2)
            .await
            .expect("page 2");
        assert_eq!(
            second.objects.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(),
            vec!["c", "d"]
        );
        let third = source
            .list_page(&lease, second.next_marker.as_ref(), 2)
            .await
            .expect("page 3");
        assert_eq!(third.objects.len(), 1);
        assert_eq!(third.next_marker, None);
    }

    #[tokio::test]
    async fn exact_page_boundary_has_no_trailing_marker() {
        let source = InMemorySource::with_objects("src", ["a", "b"].map(listed));
        let lease = StaticLeaseProvider::default()
            .assume()
            .await
            .expect("lease should issue");

        let page = source.list_page(&lease, None, 2).await.expect("page");
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.next_marker, None);
    }
}
