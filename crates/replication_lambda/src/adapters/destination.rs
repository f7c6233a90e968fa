use async_trait::async_trait;

use crate::runtime::contract::CopyTask;

use super::credentials::CredentialLease;
use super::StoreError;

/// User metadata key holding the ETag of the source object a destination
/// object was copied from.
pub const SOURCE_FINGERPRINT_METADATA: &str = "source-etag";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationObject {
    pub etag: String,
    pub source_fingerprint: Option<String>,
}

impl DestinationObject {
    /// Destination ETags differ from the source under SSE-KMS or multipart
    /// writes, so the recorded source fingerprint is checked as well.
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        self.source_fingerprint.as_deref() == Some(fingerprint) || self.etag == fingerprint
    }
}

#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn check_access(&self) -> Result<(), StoreError>;

    async fn head(&self, key: &str) -> Result<Option<DestinationObject>, StoreError>;

    /// Copies `task.source` to `task.destination_key`, recording the source
    /// fingerprint on the written object.
    async fn copy_from_source(
        &self,
        task: &CopyTask,
        lease: &CredentialLease,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_on_recorded_source_fingerprint_or_etag() {
        let copied = DestinationObject {
            etag: "kms-etag".to_string(),
            source_fingerprint: Some("abc".to_string()),
        };
        assert!(copied.matches_fingerprint("abc"));
        assert!(!copied.matches_fingerprint("def"));

        let plain = DestinationObject {
            etag: "abc".to_string(),
            source_fingerprint: None,
        };
        assert!(plain.matches_fingerprint("abc"));
    }
}
