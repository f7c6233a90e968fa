//! Run configuration: environment variables, optionally overridden field by
//! field from the invocation payload.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::adapters::aws::TransferMode;
use crate::handlers::enumerator::MAX_PAGE_SIZE;
use crate::handlers::replicate::RunSettings;
use crate::runtime::contract::ReplicationTarget;
use crate::runtime::error::ReplicationError;
use crate::runtime::filter::{parse_selector_list, FilterSpec};
use crate::runtime::object_keys::{is_account_id, SourceLocation};
use crate::runtime::retry::RetryPolicy;

pub const DEFAULT_SOURCE_ROLE_NAME: &str = "ConfigDataReadRole";
pub const DEFAULT_CHECKPOINT_PREFIX: &str = ".replication-state/checkpoints";
pub const DEFAULT_SESSION_DURATION_SECS: i32 = 3_600;

/// A comma-separated string or a JSON array of selectors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SelectorList {
    Csv(String),
    Items(Vec<String>),
}

impl SelectorList {
    fn to_csv(&self) -> String {
        match self {
            Self::Csv(value) => value.clone(),
            Self::Items(items) => items.join(","),
        }
    }
}

/// Per-invocation overrides. Unknown fields (the rest of an EventBridge
/// envelope) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InvocationOverrides {
    pub source_bucket_arn: Option<String>,
    pub destination_bucket: Option<String>,
    pub source_account_id: Option<String>,
    pub source_role_name: Option<String>,
    pub account_list: Option<SelectorList>,
    pub region_list: Option<SelectorList>,
}

impl InvocationOverrides {
    /// Top-level fields win over fields nested under `detail`.
    pub fn from_payload(payload: &Value) -> Result<Self, ReplicationError> {
        let Value::Object(fields) = payload else {
            return match payload {
                Value::Null => Ok(Self::default()),
                _ => Err(ReplicationError::Configuration(
                    "invocation payload must be a JSON object".to_string(),
                )),
            };
        };

        let top_level = Self::parse(payload, "payload")?;
        let detail = match fields.get("detail") {
            Some(detail @ Value::Object(_)) => Self::parse(detail, "detail")?,
            _ => Self::default(),
        };
        Ok(top_level.or(detail))
    }

    fn parse(value: &Value, origin: &str) -> Result<Self, ReplicationError> {
        Self::deserialize(value).map_err(|error| {
            ReplicationError::Configuration(format!("malformed {origin} override: {error}"))
        })
    }

    fn or(self, fallback: Self) -> Self {
        Self {
            source_bucket_arn: self.source_bucket_arn.or(fallback.source_bucket_arn),
            destination_bucket: self.destination_bucket.or(fallback.destination_bucket),
            source_account_id: self.source_account_id.or(fallback.source_account_id),
            source_role_name: self.source_role_name.or(fallback.source_role_name),
            account_list: self.account_list.or(fallback.account_list),
            region_list: self.region_list.or(fallback.region_list),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatorConfig {
    pub target: ReplicationTarget,
    pub source_account_id: String,
    pub source_role_name: String,
    pub session_duration_secs: i32,
    pub checkpoint_bucket: String,
    pub checkpoint_prefix: String,
    pub transfer_mode: TransferMode,
    pub settings: RunSettings,
}

impl ReplicatorConfig {
    pub fn from_env(overrides: &InvocationOverrides) -> Result<Self, ReplicationError> {
        Self::resolve(|name| std::env::var(name).ok(), overrides)
    }

    /// Resolves the configuration from `lookup` (an environment) and the
    /// invocation overrides. Blank values count as unset.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        overrides: &InvocationOverrides,
    ) -> Result<Self, ReplicationError> {
        let env = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let pick = |override_value: &Option<String>, name: &str| {
            override_value
                .clone()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| env(name))
        };

        let source_bucket_arn = required(
            pick(&overrides.source_bucket_arn, "SOURCE_BUCKET_ARN"),
            "SOURCE_BUCKET_ARN",
        )?;
        let destination_bucket = required(
            pick(&overrides.destination_bucket, "DESTINATION_BUCKET"),
            "DESTINATION_BUCKET",
        )?;
        let source_account_id = required(
            pick(&overrides.source_account_id, "SOURCE_ACCOUNT_ID"),
            "SOURCE_ACCOUNT_ID",
        )?;
        if !is_account_id(&source_account_id) {
            return Err(ReplicationError::Configuration(format!(
                "SOURCE_ACCOUNT_ID `{source_account_id}` is not a 12-digit account id"
            )));
        }
        let source_role_name = pick(&overrides.source_role_name, "SOURCE_ROLE_NAME")
            .unwrap_or_else(|| DEFAULT_SOURCE_ROLE_NAME.to_string());

        let account_list = overrides
            .account_list
            .as_ref()
            .map(SelectorList::to_csv)
            .or_else(|| env("ACCOUNT_LIST"))
            .unwrap_or_default();
        let region_list = overrides
            .region_list
            .as_ref()
            .map(SelectorList::to_csv)
            .or_else(|| env("REGION_LIST"))
            .unwrap_or_default();
        let account_ids = parse_selector_list(&account_list);
        if let Some(invalid) = account_ids.iter().find(|id| !is_account_id(id)) {
            return Err(ReplicationError::Configuration(format!(
                "ACCOUNT_LIST entry `{invalid}` is not a 12-digit account id"
            )));
        }
        let filter = FilterSpec {
            account_ids,
            region_ids: parse_selector_list(&region_list),
        };

        let destination_bucket = destination_bucket.trim().to_string();
        let checkpoint_bucket = required(env("CHECKPOINT_BUCKET"), "CHECKPOINT_BUCKET")?
            .trim()
            .to_string();
        if checkpoint_bucket == destination_bucket {
            return Err(ReplicationError::Configuration(format!(
                "CHECKPOINT_BUCKET must differ from the destination bucket `{destination_bucket}`"
            )));
        }
        let target = ReplicationTarget {
            source: SourceLocation::parse(&source_bucket_arn)?,
            destination_bucket: destination_bucket.clone(),
            filter,
        };

        let page_size = parsed(env("PAGE_SIZE"), "PAGE_SIZE", MAX_PAGE_SIZE)?;
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ReplicationError::Configuration(format!(
                "PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }
        let max_concurrent_transfers =
            parsed(env("MAX_CONCURRENT_TRANSFERS"), "MAX_CONCURRENT_TRANSFERS", 8_usize)?;
        if max_concurrent_transfers == 0 {
            return Err(ReplicationError::Configuration(
                "MAX_CONCURRENT_TRANSFERS must be at least 1".to_string(),
            ));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parsed(
                env("RETRY_MAX_ATTEMPTS"),
                "RETRY_MAX_ATTEMPTS",
                defaults.max_attempts,
            )?
            .max(1),
            base_delay: Duration::from_millis(parsed(
                env("RETRY_BASE_DELAY_MS"),
                "RETRY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parsed(
                env("RETRY_MAX_DELAY_MS"),
                "RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            jitter_ratio: defaults.jitter_ratio,
        };

        let transfer_mode = match env("TRANSFER_MODE") {
            Some(value) => value.parse::<TransferMode>().map_err(|error| {
                ReplicationError::Configuration(format!("TRANSFER_MODE: {error}"))
            })?,
            None => TransferMode::default(),
        };

        let session_duration_secs = parsed(
            env("SOURCE_SESSION_DURATION_SECS"),
            "SOURCE_SESSION_DURATION_SECS",
            DEFAULT_SESSION_DURATION_SECS,
        )?;
        if !(900..=43_200).contains(&session_duration_secs) {
            return Err(ReplicationError::Configuration(format!(
                "SOURCE_SESSION_DURATION_SECS must be between 900 and 43200, got {session_duration_secs}"
            )));
        }

        Ok(Self {
            target,
            source_account_id,
            source_role_name,
            session_duration_secs,
            checkpoint_bucket,
            checkpoint_prefix: env("CHECKPOINT_PREFIX")
                .unwrap_or_else(|| DEFAULT_CHECKPOINT_PREFIX.to_string()),
            transfer_mode,
            settings: RunSettings {
                page_size,
                max_concurrent_transfers,
                safety_margin: Duration::from_secs(parsed(
                    env("SAFETY_MARGIN_SECS"),
                    "SAFETY_MARGIN_SECS",
                    60_u64,
                )?),
                retry,
            },
        })
    }

    pub fn source_role_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:role/{}",
            self.source_account_id, self.source_role_name
        )
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ReplicationError> {
    value.ok_or_else(|| ReplicationError::Configuration(format!("{name} must be configured")))
}

fn parsed<T>(value: Option<String>, name: &str, default: T) -> Result<T, ReplicationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|error| {
            ReplicationError::Configuration(format!("{name}=`{raw}` is invalid: {error}"))
        }),
        None => Ok(default),
    }
}
