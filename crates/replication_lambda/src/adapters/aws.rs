use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::copy_object::builders::CopyObjectFluentBuilder;
use aws_sdk_s3::operation::put_object::builders::PutObjectFluentBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::MetadataDirective;
use chrono::{DateTime, Utc};

use crate::runtime::checkpoint::{Checkpoint, ContinuationMarker};
use crate::runtime::contract::CopyTask;
use crate::runtime::object_keys::{normalize_etag, ListedObject};

use super::checkpoint_store::{checkpoint_object_key, CheckpointStore};
use super::credentials::{CredentialLease, LeaseProvider};
use super::destination::{DestinationObject, DestinationStore, SOURCE_FINGERPRINT_METADATA};
use super::source::{ListPage, SourceListing};
use super::{StoreError, StoreErrorKind};

const LEASE_PROVIDER_NAME: &str = "replication-source-lease";

/// Maps an S3/STS error code (or, failing that, the HTTP status) to a kind.
pub fn classify_error_code(code: Option<&str>, status: Option<u16>) -> StoreErrorKind {
    match code {
        Some(
            "AccessDenied" | "AccessDeniedException" | "AllAccessDisabled" | "AccountProblem"
            | "InvalidAccessKeyId" | "InvalidClientTokenId" | "SignatureDoesNotMatch"
            | "ExpiredToken" | "ExpiredTokenException" | "RegionDisabledException",
        ) => StoreErrorKind::Denied,
        Some("NoSuchBucket" | "NoSuchKey" | "NotFound") => StoreErrorKind::NotFound,
        Some(
            "SlowDown" | "Throttling" | "ThrottlingException" | "RequestTimeout"
            | "RequestTimeTooSkewed" | "InternalError" | "ServiceUnavailable"
            | "RequestLimitExceeded" | "IDPCommunicationError",
        ) => StoreErrorKind::Transient,
        _ => match status {
            Some(401 | 403) => StoreErrorKind::Denied,
            Some(404) => StoreErrorKind::NotFound,
            Some(408 | 429) | Some(500..=599) => StoreErrorKind::Transient,
            _ => StoreErrorKind::Permanent,
        },
    }
}

fn classify_sdk_error<E>(operation: &str, error: &SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = format!("{operation}: {}", DisplayErrorContext(error));
    let kind = match error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreErrorKind::Transient
        }
        SdkError::ServiceError(service) => classify_error_code(
            service.err().code(),
            Some(service.raw().status().as_u16()),
        ),
        _ => StoreErrorKind::Permanent,
    };
    StoreError::new(kind, message)
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

fn quoted_etag(fingerprint: &str) -> String {
    format!("\"{fingerprint}\"")
}

/// `bucket/key` for `x-amz-copy-source`, with every key segment URL-encoded.
pub fn encode_copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{bucket}/{}", encoded.join("/"))
}

/// Resume marker for a listed page: the last key of a truncated page. A
/// truncated page without keys cannot be resumed from and is retried.
fn next_marker(
    objects: &[ListedObject],
    truncated: bool,
) -> Result<Option<ContinuationMarker>, StoreError> {
    if !truncated {
        return Ok(None);
    }
    objects
        .last()
        .map(|object| Some(ContinuationMarker::from_listing(object.key.clone())))
        .ok_or_else(|| StoreError::transient("ListObjectsV2 returned a truncated page with no keys"))
}

/// Assumes the read role in the source account.
pub struct StsLeaseProvider {
    client: aws_sdk_sts::Client,
    role_arn: String,
    session_name: String,
    duration_secs: i32,
}

impl StsLeaseProvider {
    pub fn new(sdk_config: &SdkConfig, role_arn: impl Into<String>, duration_secs: i32) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
            role_arn: role_arn.into(),
            session_name: "config-data-replication".to_string(),
            duration_secs,
        }
    }
}

#[async_trait]
impl LeaseProvider for StsLeaseProvider {
    async fn assume(&self) -> Result<CredentialLease, StoreError> {
        let output = self
            .client
            .assume_role()
            .role_arn(&self.role_arn)
            .role_session_name(&self.session_name)
            .duration_seconds(self.duration_secs)
            .send()
            .await
            .map_err(|error| {
                let mut classified = classify_sdk_error("AssumeRole", &error);
                classified.message = format!("{} ({})", classified.message, self.role_arn);
                classified
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            StoreError::permanent(format!("AssumeRole on {} returned no credentials", self.role_arn))
        })?;
        let expiration = credentials.expiration();
        let expires_at = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| StoreError::permanent("AssumeRole returned an invalid expiration"))?;

        Ok(CredentialLease {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: Some(credentials.session_token().to_string()),
            expires_at,
        })
    }
}

/// S3 clients bound to the current source lease. A new client is built only
/// when the broker hands out a different lease.
pub struct LeasedClients {
    sdk_config: SdkConfig,
    current: Mutex<Option<(String, aws_sdk_s3::Client)>>,
}

impl LeasedClients {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            current: Mutex::new(None),
        }
    }

    pub fn client_for(&self, lease: &CredentialLease) -> aws_sdk_s3::Client {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((access_key_id, client)) = current.as_ref() {
            if *access_key_id == lease.access_key_id {
                return client.clone();
            }
        }

        let credentials = Credentials::new(
            lease.access_key_id.clone(),
            lease.secret_access_key.clone(),
            lease.session_token.clone(),
            Some(SystemTime::from(lease.expires_at)),
            LEASE_PROVIDER_NAME,
        );
        let config = aws_sdk_s3::config::Builder::from(&self.sdk_config)
            .credentials_provider(credentials)
            .build();
        let client = aws_sdk_s3::Client::from_conf(config);
        *current = Some((lease.access_key_id.clone(), client.clone()));
        client
    }
}

pub struct S3Source {
    bucket: String,
    prefix: Option<String>,
    clients: Arc<LeasedClients>,
}

impl S3Source {
    pub fn new(
        bucket: impl Into<String>,
        prefix: Option<String>,
        clients: Arc<LeasedClients>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix,
            clients,
        }
    }
}

#[async_trait]
impl SourceListing for S3Source {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_access(&self, lease: &CredentialLease) -> Result<(), StoreError> {
        self.clients
            .client_for(lease)
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| classify_sdk_error("HeadBucket", &error))
    }

    async fn list_page(
        &self,
        lease: &CredentialLease,
        after: Option<&ContinuationMarker>,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .clients
            .client_for(lease)
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(self.prefix.clone())
            .set_start_after(after.map(|marker| marker.as_str().to_string()))
            .max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|error| classify_sdk_error("ListObjectsV2", &error))?;

        let objects: Vec<ListedObject> = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ListedObject {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    etag: object.e_tag().unwrap_or_default().to_string(),
                    last_modified: object.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        let next_marker = next_marker(&objects, output.is_truncated().unwrap_or(false))?;

        Ok(ListPage {
            objects,
            next_marker,
        })
    }
}

/// How object bytes reach the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Read with the source lease, write with the function's own role.
    #[default]
    Relay,
    /// `CopyObject` under the function's role; the source bucket policy must
    /// grant it read access. The source lease is only used to read headers.
    ServerSide,
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relay" => Ok(Self::Relay),
            "server-side" | "server_side" | "copy" => Ok(Self::ServerSide),
            other => Err(format!(
                "unknown transfer mode '{other}' (expected relay or server-side)"
            )),
        }
    }
}

pub struct S3Destination {
    client: aws_sdk_s3::Client,
    bucket: String,
    mode: TransferMode,
    source_clients: Arc<LeasedClients>,
}

impl S3Destination {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        mode: TransferMode,
        source_clients: Arc<LeasedClients>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            mode,
            source_clients,
        }
    }

    async fn relay(&self, task: &CopyTask, lease: &CredentialLease) -> Result<(), StoreError> {
        let object = self
            .source_clients
            .client_for(lease)
            .get_object()
            .bucket(&task.source.bucket)
            .key(&task.source.key)
            .if_match(quoted_etag(&task.source.fingerprint))
            .send()
            .await
            .map_err(|error| classify_sdk_error("GetObject", &error))?;

        let content_type = object.content_type().map(str::to_string);
        let content_length = object.content_length();
        self.put_request(task, content_type)
            .set_content_length(content_length)
            .body(object.body)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| classify_sdk_error("PutObject", &error))
    }

    async fn server_side_copy(
        &self,
        task: &CopyTask,
        lease: &CredentialLease,
    ) -> Result<(), StoreError> {
        let source = self
            .source_clients
            .client_for(lease)
            .head_object()
            .bucket(&task.source.bucket)
            .key(&task.source.key)
            .if_match(quoted_etag(&task.source.fingerprint))
            .send()
            .await
            .map_err(|error| classify_sdk_error("HeadObject", &error))?;

        self.copy_request(task, source.content_type().map(str::to_string))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| classify_sdk_error("CopyObject", &error))
    }

    // Both transfer modes go through these two builders so replicas carry
    // the same headers either way.

    fn put_request(&self, task: &CopyTask, content_type: Option<String>) -> PutObjectFluentBuilder {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&task.destination_key)
            .set_content_type(content_type)
            .metadata(SOURCE_FINGERPRINT_METADATA, &task.source.fingerprint)
    }

    fn copy_request(
        &self,
        task: &CopyTask,
        content_type: Option<String>,
    ) -> CopyObjectFluentBuilder {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&task.destination_key)
            .copy_source(encode_copy_source(&task.source.bucket, &task.source.key))
            .copy_source_if_match(quoted_etag(&task.source.fingerprint))
            .metadata_directive(MetadataDirective::Replace)
            .set_content_type(content_type)
            .metadata(SOURCE_FINGERPRINT_METADATA, &task.source.fingerprint)
    }
}

#[async_trait]
impl DestinationStore for S3Destination {
    async fn check_access(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| classify_sdk_error("HeadBucket", &error))
    }

    async fn head(&self, key: &str) -> Result<Option<DestinationObject>, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(DestinationObject {
                etag: normalize_etag(output.e_tag().unwrap_or_default()),
                source_fingerprint: output
                    .metadata()
                    .and_then(|metadata| metadata.get(SOURCE_FINGERPRINT_METADATA))
                    .cloned(),
            })),
            Err(error) => {
                let classified = classify_sdk_error("HeadObject", &error);
                if classified.kind == StoreErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(classified)
                }
            }
        }
    }

    async fn copy_from_source(
        &self,
        task: &CopyTask,
        lease: &CredentialLease,
    ) -> Result<(), StoreError> {
        match self.mode {
            TransferMode::Relay => self.relay(task, lease).await,
            TransferMode::ServerSide => self.server_side_copy(task, lease).await,
        }
    }
}

/// Checkpoints as pretty-printed JSON objects under a prefix.
pub struct S3CheckpointStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3CheckpointStore {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    async fn load(&self, run_key: &str) -> Result<Option<Checkpoint>, StoreError> {
        let key = checkpoint_object_key(&self.prefix, run_key);
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(error) => {
                let classified = classify_sdk_error("GetObject", &error);
                return if classified.kind == StoreErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(classified)
                };
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|error| StoreError::transient(format!("reading {key}: {error}")))?
            .into_bytes();
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|error| StoreError::permanent(format!("decoding {key}: {error}")))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let key = checkpoint_object_key(&self.prefix, &checkpoint.run_key);
        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|error| StoreError::permanent(format!("encoding {key}: {error}")))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| classify_sdk_error("PutObject", &error))
    }
}
