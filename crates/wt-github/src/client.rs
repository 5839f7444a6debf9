use crate::command::GhCli;
use crate::error::GitHubUnavailable;
use crate::types::{GhPullRequest, PullRequestSummary};

/// Lists open pull requests for one repository. Every failure, from a
/// missing `gh` binary to a rate-limit response to malformed JSON, comes
/// back as `GitHubUnavailable` — the adapter never throws uncaught into its
/// callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubClient {
    cli: GhCli,
    repo: String,
}

impl GithubClient {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            cli: GhCli::default(),
            repo: repo.into(),
        }
    }

    pub fn with_cli(repo: impl Into<String>, cli: GhCli) -> Self {
        Self {
            cli,
            repo: repo.into(),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn fetch_open_pull_requests(&self) -> Result<Vec<PullRequestSummary>, GitHubUnavailable> {
        let output = self
            .cli
            .run([
                "pr",
                "list",
                "--repo",
                &self.repo,
                "--state",
                "open",
                "--json",
                "number,headRefName,mergedAt",
                "--limit",
                "200",
            ])
            .map_err(|err| GitHubUnavailable::new(err.to_string()))?;

        parse_pr_list(&output.stdout)
    }
}

fn parse_pr_list(raw: &str) -> Result<Vec<PullRequestSummary>, GitHubUnavailable> {
    let records: Vec<GhPullRequest> = serde_json::from_str(raw)
        .map_err(|err| GitHubUnavailable::new(format!("unparseable pr list: {err}")))?;

    records
        .into_iter()
        .map(|record| {
            record
                .into_summary()
                .map_err(|err| GitHubUnavailable::new(format!("malformed pr summary: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_pr_list() {
        let raw = r#"[
            {"number":3,"headRefName":"user/one","mergedAt":null},
            {"number":9,"headRefName":"user/two","mergedAt":"2026-07-30T08:00:00Z"}
        ]"#;
        let summaries = parse_pr_list(raw).expect("parse");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].head_branch, "user/one");
        assert!(summaries[1].merged_at.is_some());
    }

    #[test]
    fn empty_list_is_fine() {
        let summaries = parse_pr_list("[]").expect("parse");
        assert!(summaries.is_empty());
    }

    #[test]
    fn garbage_output_becomes_unavailable() {
        let err = parse_pr_list("rate limit exceeded").expect_err("must fail");
        assert!(err.cause.contains("unparseable"));
    }

    #[test]
    fn malformed_summary_becomes_unavailable_not_partial_data() {
        let raw = r#"[{"number":3,"headRefName":"","mergedAt":null}]"#;
        let err = parse_pr_list(raw).expect_err("must fail");
        assert!(err.cause.contains("malformed pr summary"));
    }

    #[test]
    fn missing_gh_binary_becomes_unavailable() {
        let client =
            GithubClient::with_cli("acme/widgets", GhCli::new("/definitely/missing/gh-binary"));
        let err = client
            .fetch_open_pull_requests()
            .expect_err("missing binary must be unavailable");
        assert!(err.cause.contains("failed to start"));
    }
}
