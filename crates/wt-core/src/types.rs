use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable identifier for a worktree; doubles as the directory name under the
/// worktree root. Unique within a configured root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorktreeName(pub String);

impl WorktreeName {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorktreeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One checked-out worktree known to the daemon.
///
/// Created when a worktree is added (create or copy), destroyed on removal.
/// A record whose path no longer exists on disk is reported as stale rather
/// than silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub name: WorktreeName,
    pub path: PathBuf,
    pub branch: String,
    /// False when the recorded path is missing on disk; reconciled on the
    /// next listing.
    pub present: bool,
}

impl WorktreeRecord {
    pub fn is_stale(&self) -> bool {
        !self.present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_with_missing_path_is_stale() {
        let record = WorktreeRecord {
            name: WorktreeName::new("wt"),
            path: PathBuf::from("/nonexistent"),
            branch: "user/wt".to_string(),
            present: false,
        };
        assert!(record.is_stale());
    }
}
