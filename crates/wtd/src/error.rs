//! Daemon-level error type. Component errors bubble up with `#[from]`;
//! startup-specific failures carry their own variants so the binary can
//! print an actionable diagnostic and exit non-zero.

use std::path::PathBuf;

use wt_core::config::ConfigError;
use wt_git::GitError;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("daemon already running with pid {pid}")]
    AlreadyRunning { pid: u32 },
    #[error("pid file at {path} is unreadable or corrupt: {reason}")]
    PidFileCorrupt { path: PathBuf, reason: String },
    #[error("another daemon is already serving the socket at {path}")]
    SocketInUse { path: PathBuf },
    #[error("failed to bind socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
