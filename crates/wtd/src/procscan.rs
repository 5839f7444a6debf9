//! Process probes: which pids have files open under a path, and whether a
//! recorded pid is still alive.

use std::path::{Path, PathBuf};
use std::process::Command;

/// `lsof`-backed occupancy probe. The binary path is injectable for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessProbe {
    pub binary: PathBuf,
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("lsof"),
        }
    }
}

impl ProcessProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Pids with open files rooted under `path`. `None` when the probe
    /// itself is unavailable (missing `lsof`), which callers treat as "no
    /// occupancy information" rather than a refusal.
    pub fn pids_under(&self, path: &Path) -> Option<Vec<u32>> {
        let output = Command::new(&self.binary)
            .arg("-t")
            .arg("+D")
            .arg(path)
            .output()
            .ok()?;
        // lsof exits 1 when nothing matched; only the spawn failure above
        // means the probe is unusable.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let pids = stdout
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect();
        Some(pids)
    }
}

/// Liveness via signal 0. A pid that no longer exists means the recorded
/// daemon is stale.
pub fn pid_is_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
