pub mod client;
pub mod command;
pub mod error;
pub mod types;

pub use client::GithubClient;
pub use command::{GhCli, GhOutput};
pub use error::{GitHubUnavailable, SummaryError};
pub use types::PullRequestSummary;
