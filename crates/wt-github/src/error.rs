use std::string::FromUtf8Error;

/// The adapter's single failure mode: whatever went wrong talking to GitHub
/// (spawn failure, auth, rate limit, network, unparseable output) is
/// normalized into this one result so callers never see a raw transport
/// error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("github unavailable: {cause}")]
pub struct GitHubUnavailable {
    pub cause: String,
}

impl GitHubUnavailable {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// Internal command-level failures, folded into `GitHubUnavailable` at the
/// client boundary.
#[derive(Debug, thiserror::Error)]
pub enum GhCommandError {
    #[error("gh command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("gh command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("gh command output was not valid UTF-8 ({command}): {source}")]
    NonUtf8Output {
        command: String,
        #[source]
        source: FromUtf8Error,
    },
}

/// A pull-request summary that violates the canonical field contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryError {
    #[error("pull request summary has an empty head branch")]
    EmptyHeadBranch,
    #[error("pull request merge timestamp is not RFC 3339: {value}")]
    BadMergeTimestamp { value: String },
}
