use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::WorktreeName;

/// Lifecycle events the worktree engine emits. The daemon forwards these to
/// its operation log; persistence and formatting are the consumer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationEvent {
    WorktreeCreated {
        name: WorktreeName,
        branch: String,
        path: PathBuf,
        at: DateTime<Utc>,
    },
    WorktreeCopied {
        source: WorktreeName,
        dest: WorktreeName,
        strategy: String,
        at: DateTime<Utc>,
    },
    WorktreeRemoved {
        name: WorktreeName,
        forced: bool,
        at: DateTime<Utc>,
    },
}

impl OperationEvent {
    pub fn worktree(&self) -> &WorktreeName {
        match self {
            OperationEvent::WorktreeCreated { name, .. } => name,
            OperationEvent::WorktreeCopied { dest, .. } => dest,
            OperationEvent::WorktreeRemoved { name, .. } => name,
        }
    }
}
