use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TransferError;
use crate::filter::FilterSpec;
use crate::object_keys::{SourceLocation, SourceObjectDescriptor};

pub const CHECKPOINT_SCHEMA_VERSION: &str = "v1";
pub const RUN_SUMMARY_SCHEMA_VERSION: &str = "v1";

/// What a configured run replicates: where from, where to, and which keys.
/// Its fingerprint identifies the run's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTarget {
    pub source: SourceLocation,
    pub destination_bucket: String,
    pub filter: FilterSpec,
}

impl ReplicationTarget {
    pub fn run_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(stable_contract_json(self));
        format!("{:x}", hasher.finalize())
    }
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyTask {
    pub source: SourceObjectDescriptor,
    pub destination_key: String,
}

impl CopyTask {
    /// Destination keys mirror source keys so the mapping stays trivially
    /// invertible.
    pub fn for_descriptor(source: SourceObjectDescriptor) -> Self {
        let destination_key = source.key.clone();
        Self {
            source,
            destination_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Copied,
    SkippedAlreadyPresent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOutcome {
    pub task: CopyTask,
    pub status: CopyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TransferError>,
}

impl CopyOutcome {
    pub fn copied(task: CopyTask) -> Self {
        Self {
            task,
            status: CopyStatus::Copied,
            error: None,
        }
    }

    pub fn already_present(task: CopyTask) -> Self {
        Self {
            task,
            status: CopyStatus::SkippedAlreadyPresent,
            error: None,
        }
    }

    pub fn failed(task: CopyTask, error: TransferError) -> Self {
        Self {
            task,
            status: CopyStatus::Failed,
            error: Some(error),
        }
    }
}

/// Per-page (and, summed, per-run) object counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTally {
    pub copied: u64,
    pub skipped_already_present: u64,
    pub failed: u64,
    pub unparseable: u64,
    pub filtered_out: u64,
}

impl PageTally {
    pub fn record(&mut self, status: CopyStatus) {
        match status {
            CopyStatus::Copied => self.copied += 1,
            CopyStatus::SkippedAlreadyPresent => self.skipped_already_present += 1,
            CopyStatus::Failed => self.failed += 1,
        }
    }

    pub fn absorb(&mut self, other: &PageTally) {
        self.copied += other.copied;
        self.skipped_already_present += other.skipped_already_present;
        self.failed += other.failed;
        self.unparseable += other.unparseable;
        self.filtered_out += other.filtered_out;
    }

    pub fn objects_seen(&self) -> u64 {
        self.copied
            + self.skipped_already_present
            + self.failed
            + self.unparseable
            + self.filtered_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The namespace was exhausted; the pass is complete.
    Completed,
    /// The deadline stopped the run; the next trigger resumes from the marker.
    Yielded,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedObject {
    pub key: String,
    pub error: TransferError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_code: String,
    pub error_message: String,
}

/// Observable outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_key: String,
    pub status: RunStatus,
    pub record_schema: String,
    pub pass_number: u64,
    pub pages_processed: u64,
    pub tally: PageTally,
    pub failures: Vec<FailedObject>,
    pub continuation_marker: Option<String>,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(account_list: &str) -> ReplicationTarget {
        ReplicationTarget {
            source: SourceLocation {
                bucket: "central-config".to_string(),
                prefix: Some("o-abc123".to_string()),
            },
            destination_bucket: "audit-config".to_string(),
            filter: FilterSpec::from_lists(account_list, "us-east-1"),
        }
    }

    #[test]
    fn run_key_ignores_selector_order() {
        let a = target("111111111111,222222222222");
        let b = target("222222222222, 111111111111");
        assert_eq!(a.run_key(), b.run_key());
        assert_eq!(a.run_key().len(), 64);
    }

    #[test]
    fn run_key_changes_with_filter() {
        assert_ne!(
            target("111111111111").run_key(),
            target("222222222222").run_key()
        );
    }

    #[test]
    fn tally_counts_every_status() {
        let mut tally = PageTally::default();
        tally.record(CopyStatus::Copied);
        tally.record(CopyStatus::Copied);
        tally.record(CopyStatus::SkippedAlreadyPresent);
        tally.record(CopyStatus::Failed);
        tally.unparseable += 1;

        let mut total = PageTally::default();
        total.absorb(&tally);
        total.absorb(&tally);

        assert_eq!(total.copied, 4);
        assert_eq!(total.failed, 2);
        assert_eq!(total.objects_seen(), 10);
    }
}
