//! The only state that survives between invocations.
//!
//! A checkpoint is loaded at the start of a run, advanced once per settled
//! page, and saved back. Its marker always means "this page and everything
//! lexically before it is settled".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::{PageTally, CHECKPOINT_SCHEMA_VERSION};

/// Opaque resume position produced by the namespace enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationMarker(String);

impl ContinuationMarker {
    /// Only enumerator implementations should mint markers; everything else
    /// passes through values they returned.
    pub fn from_listing(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: String,
    pub run_key: String,
    pub pass_number: u64,
    #[serde(default)]
    pub passes_completed: u64,
    pub continuation_marker: Option<ContinuationMarker>,
    #[serde(default)]
    pub objects_copied: u64,
    #[serde(default)]
    pub objects_skipped: u64,
    #[serde(default)]
    pub objects_failed: u64,
    #[serde(default)]
    pub objects_unparseable: u64,
    #[serde(default)]
    pub objects_filtered_out: u64,
    #[serde(default)]
    pub pages_processed: u64,
    pub pass_started_at: DateTime<Utc>,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_ended_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl Checkpoint {
    pub fn fresh(run_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION.to_string(),
            run_key: run_key.into(),
            pass_number: 1,
            passes_completed: 0,
            continuation_marker: None,
            objects_copied: 0,
            objects_skipped: 0,
            objects_failed: 0,
            objects_unparseable: 0,
            objects_filtered_out: 0,
            pages_processed: 0,
            pass_started_at: now,
            last_run_started_at: None,
            last_run_ended_at: None,
            completed: false,
        }
    }

    /// Prepares a loaded checkpoint for a new invocation. A completed pass
    /// rolls over into the next one starting from the beginning of the
    /// namespace; an unfinished pass resumes from its marker.
    pub fn begin_invocation(mut self, now: DateTime<Utc>) -> Self {
        if self.completed {
            self = Self {
                pass_number: self.pass_number + 1,
                passes_completed: self.passes_completed,
                last_run_ended_at: self.last_run_ended_at,
                ..Self::fresh(self.run_key, now)
            };
        }
        self.last_run_started_at = Some(now);
        self
    }

    /// Records a fully settled page. `next_marker == None` means the
    /// enumerator reached the end of the namespace.
    pub fn record_page(
        &mut self,
        tally: &PageTally,
        next_marker: Option<ContinuationMarker>,
        now: DateTime<Utc>,
    ) {
        self.objects_copied += tally.copied;
        self.objects_skipped += tally.skipped_already_present;
        self.objects_failed += tally.failed;
        self.objects_unparseable += tally.unparseable;
        self.objects_filtered_out += tally.filtered_out;
        self.pages_processed += 1;
        self.last_run_ended_at = Some(now);

        if next_marker.is_none() {
            self.completed = true;
            self.passes_completed += 1;
        }
        self.continuation_marker = next_marker;
    }

    /// Closes an invocation that stopped between pages. Position and counters
    /// stay where the last settled page left them.
    pub fn record_yield(&mut self, now: DateTime<Utc>) {
        self.last_run_ended_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn tally(copied: u64, skipped: u64) -> PageTally {
        PageTally {
            copied,
            skipped_already_present: skipped,
            ..PageTally::default()
        }
    }

    #[test]
    fn record_page_accumulates_and_advances_marker() {
        let mut checkpoint = Checkpoint::fresh("run", at(0)).begin_invocation(at(0));
        checkpoint.record_page(
            &tally(3, 1),
            Some(ContinuationMarker::from_listing("AWSLogs/1/a")),
            at(1),
        );
        checkpoint.record_page(
            &tally(2, 0),
            Some(ContinuationMarker::from_listing("AWSLogs/1/b")),
            at(2),
        );

        assert_eq!(checkpoint.objects_copied, 5);
        assert_eq!(checkpoint.objects_skipped, 1);
        assert_eq!(checkpoint.pages_processed, 2);
        assert_eq!(
            checkpoint.continuation_marker.as_ref().map(ContinuationMarker::as_str),
            Some("AWSLogs/1/b")
        );
        assert!(!checkpoint.completed);
        assert_eq!(checkpoint.last_run_ended_at, Some(at(2)));
    }

    #[test]
    fn final_page_completes_the_pass() {
        let mut checkpoint = Checkpoint::fresh("run", at(0));
        checkpoint.record_page(&tally(1, 0), None, at(1));

        assert!(checkpoint.completed);
        assert_eq!(checkpoint.passes_completed, 1);
        assert_eq!(checkpoint.continuation_marker, None);
    }

    #[test]
    fn completed_checkpoint_rolls_into_next_pass() {
        let mut checkpoint = Checkpoint::fresh("run", at(0));
        checkpoint.record_page(&tally(7, 2), None, at(1));

        let next = checkpoint.begin_invocation(at(5));
        assert_eq!(next.pass_number, 2);
        assert_eq!(next.passes_completed, 1);
        assert_eq!(next.objects_copied, 0);
        assert_eq!(next.objects_skipped, 0);
        assert!(!next.completed);
        assert_eq!(next.pass_started_at, at(5));
        assert_eq!(next.last_run_started_at, Some(at(5)));
        assert_eq!(next.last_run_ended_at, Some(at(1)));
    }

    #[test]
    fn unfinished_checkpoint_resumes_in_place() {
        let mut checkpoint = Checkpoint::fresh("run", at(0));
        checkpoint.record_page(
            &tally(4, 0),
            Some(ContinuationMarker::from_listing("k")),
            at(1),
        );

        let resumed = checkpoint.clone().begin_invocation(at(3));
        assert_eq!(resumed.pass_number, 1);
        assert_eq!(resumed.objects_copied, 4);
        assert_eq!(resumed.continuation_marker, checkpoint.continuation_marker);
    }

    #[test]
    fn yield_stamps_the_end_of_the_invocation_only() {
        let mut checkpoint = Checkpoint::fresh("run", at(0));
        checkpoint.record_page(&tally(2, 0), None, at(1));
        let mut next = checkpoint.begin_invocation(at(4));
        let before = next.clone();

        next.record_yield(at(5));

        assert_eq!(next.last_run_started_at, Some(at(4)));
        assert_eq!(next.last_run_ended_at, Some(at(5)));
        assert_eq!(
            Checkpoint {
                last_run_ended_at: before.last_run_ended_at,
                ..next
            },
            before
        );
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let mut checkpoint = Checkpoint::fresh("run", at(0));
        checkpoint.record_page(
            &tally(1, 0),
            Some(ContinuationMarker::from_listing("AWSLogs/111111111111/x")),
            at(1),
        );

        let json = serde_json::to_string(&checkpoint).expect("checkpoint should serialize");
        assert!(json.contains("\"continuation_marker\":\"AWSLogs/111111111111/x\""));
        let decoded: Checkpoint = serde_json::from_str(&json).expect("checkpoint should parse");
        assert_eq!(decoded, checkpoint);
    }
}
