use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SummaryError;

/// Canonical per-PR snapshot handed to the cache.
///
/// Field names here are the contract: `head_branch` and `merged_at` (RFC 3339
/// or absent). The provider's own field spellings never leave this crate;
/// anything that cannot be mapped cleanly fails construction instead of
/// producing a partially-populated summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub number: u64,
    pub head_branch: String,
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequestSummary {
    pub fn new(
        number: u64,
        head_branch: impl Into<String>,
        merged_at: Option<&str>,
    ) -> Result<Self, SummaryError> {
        let head_branch = head_branch.into();
        if head_branch.trim().is_empty() {
            return Err(SummaryError::EmptyHeadBranch);
        }
        let merged_at = match merged_at {
            None => None,
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|_| SummaryError::BadMergeTimestamp {
                        value: raw.to_string(),
                    })?,
            ),
        };
        Ok(Self {
            number,
            head_branch,
            merged_at,
        })
    }
}

/// One record as `gh pr list --json number,headRefName,mergedAt` emits it.
/// `deny_unknown_fields` keeps provider schema drift loud instead of silent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GhPullRequest {
    pub number: u64,
    #[serde(rename = "headRefName")]
    pub head_ref_name: String,
    #[serde(rename = "mergedAt")]
    pub merged_at: Option<String>,
}

impl GhPullRequest {
    pub(crate) fn into_summary(self) -> Result<PullRequestSummary, SummaryError> {
        PullRequestSummary::new(self.number, self.head_ref_name, self.merged_at.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_parses_rfc3339_merge_timestamp() {
        let summary = PullRequestSummary::new(7, "user/feature", Some("2026-08-01T12:00:00Z"))
            .expect("summary should build");
        assert_eq!(summary.number, 7);
        assert_eq!(
            summary.merged_at.expect("merged").to_rfc3339(),
            "2026-08-01T12:00:00+00:00"
        );
    }

    #[test]
    fn summary_rejects_empty_head_branch() {
        let err = PullRequestSummary::new(7, "   ", None).expect_err("must fail");
        assert_eq!(err, SummaryError::EmptyHeadBranch);
    }

    #[test]
    fn summary_rejects_malformed_timestamp() {
        let err = PullRequestSummary::new(7, "user/feature", Some("yesterday"))
            .expect_err("must fail");
        assert!(matches!(err, SummaryError::BadMergeTimestamp { .. }));
    }

    #[test]
    fn gh_record_with_unknown_fields_fails_to_parse() {
        let raw = r#"{"number":1,"headRefName":"x","mergedAt":null,"headBranch":"alias"}"#;
        let parsed: Result<GhPullRequest, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn gh_record_maps_into_canonical_summary() {
        let raw = r#"{"number":12,"headRefName":"user/fix","mergedAt":null}"#;
        let parsed: GhPullRequest = serde_json::from_str(raw).expect("parse");
        let summary = parsed.into_summary().expect("map");
        assert_eq!(summary.head_branch, "user/fix");
        assert!(summary.merged_at.is_none());
    }
}
