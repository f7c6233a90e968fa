use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::object_keys::{KeyParseError, ListedObject, SourceObjectDescriptor};

/// Account and region selectors. An empty set selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub account_ids: BTreeSet<String>,
    #[serde(default)]
    pub region_ids: BTreeSet<String>,
}

impl FilterSpec {
    pub fn new<A, R>(account_ids: A, region_ids: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            account_ids: account_ids.into_iter().map(Into::into).collect(),
            region_ids: region_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a spec from comma-separated selector lists such as
    /// `"111111111111, 222222222222"`.
    pub fn from_lists(account_list: &str, region_list: &str) -> Self {
        Self {
            account_ids: parse_selector_list(account_list),
            region_ids: parse_selector_list(region_list),
        }
    }

    pub fn matches_all(&self) -> bool {
        self.account_ids.is_empty() && self.region_ids.is_empty()
    }
}

pub fn parse_selector_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn matches(descriptor: &SourceObjectDescriptor, spec: &FilterSpec) -> bool {
    (spec.account_ids.is_empty() || spec.account_ids.contains(&descriptor.account_id))
        && (spec.region_ids.is_empty() || spec.region_ids.contains(&descriptor.region))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Matched(SourceObjectDescriptor),
    FilteredOut(SourceObjectDescriptor),
    Unparseable { key: String, reason: KeyParseError },
}

/// Parses a listed key and evaluates it against the spec. Keys that do not
/// follow the delivery path convention come back as `Unparseable` instead of
/// an error so that one odd object cannot stop a run.
pub fn classify(bucket: &str, object: ListedObject, spec: &FilterSpec) -> Classification {
    let key = object.key.clone();
    match SourceObjectDescriptor::from_listing(bucket, object) {
        Ok(descriptor) if matches(&descriptor, spec) => Classification::Matched(descriptor),
        Ok(descriptor) => Classification::FilteredOut(descriptor),
        Err(reason) => Classification::Unparseable { key, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(account_id: &str, region: &str) -> SourceObjectDescriptor {
        SourceObjectDescriptor {
            bucket: "central-config".to_string(),
            key: format!("AWSLogs/{account_id}/Config/{region}/2024/5/17/ConfigHistory/a.json.gz"),
            account_id: account_id.to_string(),
            service: "Config".to_string(),
            region: region.to_string(),
            size: 1,
            fingerprint: "etag".to_string(),
            last_modified: None,
        }
    }

    #[test]
    fn empty_spec_matches_everything() {
        let spec = FilterSpec::default();
        assert!(spec.matches_all());
        assert!(matches(&descriptor("111111111111", "us-east-1"), &spec));
        assert!(matches(&descriptor("999999999999", "ap-south-1"), &spec));
    }

    #[test]
    fn account_and_region_must_both_match() {
        let spec = FilterSpec::new(["111111111111"], ["us-east-1", "eu-west-1"]);
        assert!(matches(&descriptor("111111111111", "us-east-1"), &spec));
        assert!(matches(&descriptor("111111111111", "eu-west-1"), &spec));
        assert!(!matches(&descriptor("111111111111", "us-west-2"), &spec));
        assert!(!matches(&descriptor("222222222222", "us-east-1"), &spec));
    }

    #[test]
    fn empty_account_list_filters_by_region_only() {
        let spec = FilterSpec::new(Vec::<String>::new(), ["us-east-1"]);
        assert!(matches(&descriptor("111111111111", "us-east-1"), &spec));
        assert!(matches(&descriptor("222222222222", "us-east-1"), &spec));
        assert!(!matches(&descriptor("222222222222", "eu-west-1"), &spec));
    }

    #[test]
    fn empty_region_list_filters_by_account_only() {
        let spec = FilterSpec::new(["222222222222"], Vec::<String>::new());
        assert!(matches(&descriptor("222222222222", "us-east-1"), &spec));
        assert!(matches(&descriptor("222222222222", "sa-east-1"), &spec));
        assert!(!matches(&descriptor("111111111111", "us-east-1"), &spec));
    }

    #[test]
    fn selector_lists_are_trimmed_and_deduplicated() {
        let spec = FilterSpec::from_lists(" 111111111111,,222222222222 ,111111111111", "");
        assert_eq!(
            spec.account_ids.into_iter().collect::<Vec<_>>(),
            vec!["111111111111".to_string(), "222222222222".to_string()]
        );
        assert!(spec.region_ids.is_empty());
    }

    #[test]
    fn classify_separates_unparseable_keys() {
        let spec = FilterSpec::new(["111111111111"], Vec::<String>::new());
        let listed = |key: &str| ListedObject {
            key: key.to_string(),
            size: 3,
            etag: "\"abc\"".to_string(),
            last_modified: None,
        };

        assert!(matches!(
            classify("b", listed("AWSLogs/111111111111/Config/us-east-1/x.json"), &spec),
            Classification::Matched(_)
        ));
        assert!(matches!(
            classify("b", listed("AWSLogs/222222222222/Config/us-east-1/x.json"), &spec),
            Classification::FilteredOut(_)
        ));
        assert!(matches!(
            classify("b", listed("AWSLogs/111111111111/Config/ConfigWritabilityCheckFile"), &spec),
            Classification::Unparseable { .. }
        ));
    }
}
