use async_trait::async_trait;

use crate::runtime::checkpoint::ContinuationMarker;
use crate::runtime::object_keys::ListedObject;

use super::credentials::CredentialLease;
use super::StoreError;

/// One page of the source listing in lexical key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// `None` once the namespace is exhausted.
    pub next_marker: Option<ContinuationMarker>,
}

#[async_trait]
pub trait SourceListing: Send + Sync {
    fn bucket(&self) -> &str;

    async fn check_access(&self, lease: &CredentialLease) -> Result<(), StoreError>;

    /// Lists at most `max_keys` objects whose keys sort strictly after `after`.
    async fn list_page(
        &self,
        lease: &CredentialLease,
        after: Option<&ContinuationMarker>,
        max_keys: usize,
    ) -> Result<ListPage, StoreError>;
}
