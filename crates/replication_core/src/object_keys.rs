use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ReplicationError;

/// Segment that terminates the delivery root of AWS Config log keys.
pub const LOG_ROOT_SEGMENT: &str = "AWSLogs";

const ACCOUNT_ID_LEN: usize = 12;
const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

/// One entry of a raw source listing, before key parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A source object whose key follows `<root>/<accountId>/<service>/<region>/...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceObjectDescriptor {
    pub bucket: String,
    pub key: String,
    pub account_id: String,
    pub service: String,
    pub region: String,
    pub size: u64,
    pub fingerprint: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl SourceObjectDescriptor {
    pub fn from_listing(bucket: &str, object: ListedObject) -> Result<Self, KeyParseError> {
        let components = parse_key(&object.key)?;
        let account_id = components.account_id.to_string();
        let service = components.service.to_string();
        let region = components.region.to_string();
        Ok(Self {
            bucket: bucket.to_string(),
            key: object.key,
            account_id,
            service,
            region,
            size: object.size,
            fingerprint: normalize_etag(&object.etag),
            last_modified: object.last_modified,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyComponents<'a> {
    pub account_id: &'a str,
    pub service: &'a str,
    pub region: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("key has no `AWSLogs` root segment")]
    MissingLogRoot,
    #[error("`{0}` is not a 12-digit account id")]
    InvalidAccountId(String),
    #[error("key ends before the account/service/region/object segments")]
    Truncated,
}

pub fn parse_key(key: &str) -> Result<KeyComponents<'_>, KeyParseError> {
    let segments: Vec<&str> = key.split('/').collect();
    let root_index = segments
        .iter()
        .position(|segment| *segment == LOG_ROOT_SEGMENT)
        .ok_or(KeyParseError::MissingLogRoot)?;

    let rest = &segments[root_index + 1..];
    let Some(account_id) = rest.first().copied() else {
        return Err(KeyParseError::Truncated);
    };
    if !is_account_id(account_id) {
        return Err(KeyParseError::InvalidAccountId(account_id.to_string()));
    }

    // account, service, region and at least one object segment
    if rest.len() < 4 || rest[..3].iter().any(|segment| segment.is_empty()) {
        return Err(KeyParseError::Truncated);
    }
    if rest.last().map_or(true, |name| name.is_empty()) {
        return Err(KeyParseError::Truncated);
    }

    Ok(KeyComponents {
        account_id,
        service: rest[1],
        region: rest[2],
    })
}

pub fn is_account_id(value: &str) -> bool {
    value.len() == ACCOUNT_ID_LEN && value.bytes().all(|b| b.is_ascii_digit())
}

/// S3 returns ETags wrapped in double quotes; fingerprints are compared bare.
pub fn normalize_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

/// Bucket plus optional key prefix, as carried by an S3 bucket ARN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub bucket: String,
    pub prefix: Option<String>,
}

impl SourceLocation {
    /// Accepts `arn:aws:s3:::bucket`, `arn:aws:s3:::bucket/some/prefix` or a
    /// bare bucket name.
    pub fn parse(value: &str) -> Result<Self, ReplicationError> {
        let value = value.trim();
        let path = if let Some(path) = value.strip_prefix(S3_ARN_PREFIX) {
            path
        } else if value.starts_with("arn:") {
            return Err(ReplicationError::Configuration(format!(
                "`{value}` is not an S3 bucket ARN"
            )));
        } else {
            value
        };

        let (bucket, prefix) = match path.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (path, ""),
        };
        if bucket.is_empty() {
            return Err(ReplicationError::Configuration(format!(
                "source location `{value}` does not name a bucket"
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        })
    }

    /// Listing prefix; a configured prefix always ends in `/` so that it
    /// cannot match sibling keys sharing the same leading characters.
    pub fn list_prefix(&self) -> Option<String> {
        self.prefix.as_ref().map(|prefix| format!("{prefix}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_KEY: &str = "o-abc123/AWSLogs/111111111111/Config/us-east-1/2024/5/17/ConfigHistory/111111111111_Config_us-east-1_ConfigHistory_AWS::S3::Bucket_20240517T000000Z_20240517T060000Z_1.json.gz";

    #[test]
    fn parses_organization_rooted_config_key() {
        let components = parse_key(CONFIG_KEY).expect("key should parse");
        assert_eq!(components.account_id, "111111111111");
        assert_eq!(components.service, "Config");
        assert_eq!(components.region, "us-east-1");
    }

    #[test]
    fn parses_key_rooted_directly_at_log_segment() {
        let components = parse_key("AWSLogs/222222222222/Config/eu-west-1/2024/1/2/snapshot.json.gz")
            .expect("key should parse");
        assert_eq!(components.account_id, "222222222222");
        assert_eq!(components.region, "eu-west-1");
    }

    #[test]
    fn writability_check_file_is_unparseable() {
        let error = parse_key("AWSLogs/111111111111/Config/ConfigWritabilityCheckFile")
            .expect_err("probe file should not parse");
        assert_eq!(error, KeyParseError::Truncated);
    }

    #[test]
    fn rejects_keys_without_log_root() {
        assert_eq!(
            parse_key("exports/111111111111/Config/us-east-1/file.json"),
            Err(KeyParseError::MissingLogRoot)
        );
    }

    #[test]
    fn rejects_malformed_account_ids() {
        assert_eq!(
            parse_key("AWSLogs/1111/Config/us-east-1/file.json"),
            Err(KeyParseError::InvalidAccountId("1111".to_string()))
        );
        assert_eq!(
            parse_key("AWSLogs/11111111111x/Config/us-east-1/file.json"),
            Err(KeyParseError::InvalidAccountId("11111111111x".to_string()))
        );
    }

    #[test]
    fn rejects_directory_placeholder_keys() {
        assert_eq!(
            parse_key("AWSLogs/111111111111/Config/us-east-1/"),
            Err(KeyParseError::Truncated)
        );
    }

    #[test]
    fn descriptor_strips_quoted_etag() {
        let descriptor = SourceObjectDescriptor::from_listing(
            "central-config",
            ListedObject {
                key: CONFIG_KEY.to_string(),
                size: 42,
                etag: "\"9b2cf535f27731c974343645a3985328\"".to_string(),
                last_modified: None,
            },
        )
        .expect("descriptor should build");

        assert_eq!(descriptor.fingerprint, "9b2cf535f27731c974343645a3985328");
        assert_eq!(descriptor.bucket, "central-config");
        assert_eq!(descriptor.size, 42);
    }

    #[test]
    fn source_location_parses_arn_with_prefix() {
        let location = SourceLocation::parse("arn:aws:s3:::aws-controltower-logs-123/o-abc123/")
            .expect("arn should parse");
        assert_eq!(location.bucket, "aws-controltower-logs-123");
        assert_eq!(location.prefix.as_deref(), Some("o-abc123"));
        assert_eq!(location.list_prefix().as_deref(), Some("o-abc123/"));
    }

    #[test]
    fn source_location_accepts_bare_bucket() {
        let location = SourceLocation::parse("central-config").expect("bucket should parse");
        assert_eq!(location.bucket, "central-config");
        assert_eq!(location.prefix, None);
        assert_eq!(location.list_prefix(), None);
    }

    #[test]
    fn source_location_rejects_non_s3_arn() {
        let error = SourceLocation::parse("arn:aws:sqs:us-east-1:111111111111:queue")
            .expect_err("non-s3 arn should fail");
        assert!(error.to_string().contains("not an S3 bucket ARN"));
    }
}
