pub mod command;
pub mod error;
pub mod repo;
pub mod worktree;

pub use command::{GitCli, GitOutput};
pub use error::GitError;
pub use repo::{discover_repo, RepoHandle};
pub use worktree::{ListedWorktree, WorktreeRoot};
