//! Daemon configuration, loaded from the tool's YAML config file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// How worktree duplication copies the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStrategy {
    /// Try reflink first, fall back to a full copy.
    Auto,
    /// Reflink only; fail when the filesystem does not support it.
    Reflink,
    /// Always full copy.
    Full,
}

impl Default for CopyStrategy {
    fn default() -> Self {
        Self::Auto
    }
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_hook_timeout_secs() -> u64 {
    120
}

fn default_github_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WtConfig {
    /// Path of the main repository checkout.
    pub repo_path: PathBuf,
    /// Directory under which worktrees are created.
    pub worktrees_dir: PathBuf,
    /// Prefix prepended to worktree names to form branch names.
    pub branch_prefix: String,
    /// Branch new worktrees fork from.
    pub upstream_branch: String,
    /// GitHub repository identifier, `owner/repo`.
    pub github_repo: String,
    #[serde(default = "default_github_enabled")]
    pub github_enabled: bool,
    #[serde(default)]
    pub copy_strategy: CopyStrategy,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub post_create_hook: Option<PathBuf>,
    #[serde(default = "default_hook_timeout_secs")]
    pub post_create_hook_timeout_secs: u64,
    #[serde(default)]
    pub log_operations: bool,
}

impl WtConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "repo_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.worktrees_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "worktrees_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.upstream_branch.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "upstream_branch",
                reason: "must not be empty".to_string(),
            });
        }
        if self.github_enabled {
            let parts: Vec<&str> = self.github_repo.split('/').collect();
            if parts.len() != 2 || parts.iter().any(|part| part.trim().is_empty()) {
                return Err(ConfigError::InvalidField {
                    field: "github_repo",
                    reason: format!("expected owner/repo, got {:?}", self.github_repo),
                });
            }
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidField {
                field: "refresh_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Where the daemon's pid file lives for this worktree root.
    pub fn pid_file(&self) -> PathBuf {
        self.worktrees_dir.join("daemon.pid")
    }

    /// Where the daemon's socket lives for this worktree root.
    pub fn socket_file(&self) -> PathBuf {
        self.worktrees_dir.join("daemon.sock")
    }
}

pub fn parse_config(contents: &str) -> Result<WtConfig, serde_yaml::Error> {
    serde_yaml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<WtConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    let config = parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
