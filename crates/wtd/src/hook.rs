//! Post-creation hook: a configured executable run inside a freshly created
//! worktree, bounded by a timeout, with output captured for the caller.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to start hook {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect hook output for {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to a hook run. A non-zero exit is an outcome, not an error;
/// only failing to run the hook at all is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HookOutcome {
    Completed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        timeout_secs: u64,
    },
}

/// Run `hook` with the worktree path as its working directory and sole
/// argument. Stdin is closed; stdout and stderr are captured. A run that
/// outlives `timeout` is killed and reported as `TimedOut`.
pub async fn run_post_create_hook(
    hook: &Path,
    worktree_path: &Path,
    timeout: Duration,
) -> Result<HookOutcome, HookError> {
    let rendered = format!("{} {}", hook.display(), worktree_path.display());
    let child = Command::new(hook)
        .arg(worktree_path)
        .current_dir(worktree_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| HookError::Spawn {
            command: rendered.clone(),
            source,
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(collected) => {
            let output = collected.map_err(|source| HookError::Wait {
                command: rendered,
                source,
            })?;
            Ok(HookOutcome::Completed {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Err(_elapsed) => {
            // kill_on_drop reaps the child once the future is dropped here.
            warn!(hook = %rendered, timeout_secs = timeout.as_secs(), "post-create hook timed out");
            Ok(HookOutcome::TimedOut {
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}
