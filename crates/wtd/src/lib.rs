pub mod cache;
pub mod client;
pub mod copy;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod hook;
pub mod locks;
pub mod procscan;
pub mod refresh;
pub mod rpc;
pub mod server;
pub mod state;

pub use cache::{PrCache, PullRequestSource, PullRequestState, RefreshOutcome};
pub use client::DaemonClient;
pub use daemon::{run_daemon, run_until_shutdown};
pub use engine::{RemovalRefusal, WorktreeEngine};
pub use error::DaemonError;
pub use refresh::{RefreshConfig, RefreshScheduler};
pub use state::DaemonState;
