//! Daemon lifecycle: pid file, socket, deterministic first cache fill,
//! signal handling, drain, cleanup.
//!
//! One daemon per worktree root. Respawning after a crash is the client's
//! job; this process only ever refuses to start twice.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{info, warn};
use wt_core::config::WtConfig;
use wt_git::{discover_repo, GitCli, WorktreeRoot};
use wt_github::GithubClient;

use crate::cache::{PrCache, PullRequestSource, RefreshOutcome};
use crate::engine::WorktreeEngine;
use crate::error::DaemonError;
use crate::procscan::pid_is_alive;
use crate::refresh::{RefreshConfig, RefreshScheduler};
use crate::server::serve;
use crate::state::DaemonState;

/// Exclusive pid file. Acquiring fails when the recorded pid is still alive;
/// a stale record is removed and replaced. Released on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let pid = contents.trim().parse::<u32>().map_err(|_| {
                    DaemonError::PidFileCorrupt {
                        path: path.to_path_buf(),
                        reason: format!("expected a pid, found {:?}", contents.trim()),
                    }
                })?;
                if pid_is_alive(pid) {
                    return Err(DaemonError::AlreadyRunning { pid });
                }
                info!(stale_pid = pid, "removing stale pid file");
                fs::remove_file(path).map_err(|source| {
                    DaemonError::io(format!("remove stale pid file {}", path.display()), source)
                })?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(DaemonError::io(
                    format!("read pid file {}", path.display()),
                    source,
                ))
            }
        }

        fs::write(path, std::process::id().to_string()).map_err(|source| {
            DaemonError::io(format!("write pid file {}", path.display()), source)
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Bind the daemon socket, recovering from a leftover socket file when no
/// daemon answers on it.
pub async fn bind_socket(path: &Path) -> Result<UnixListener, DaemonError> {
    if path.exists() {
        match UnixStream::connect(path).await {
            Ok(_live) => {
                return Err(DaemonError::SocketInUse {
                    path: path.to_path_buf(),
                });
            }
            Err(_refused) => {
                info!(socket = %path.display(), "removing stale socket file");
                fs::remove_file(path).map_err(|source| {
                    DaemonError::io(format!("remove stale socket {}", path.display()), source)
                })?;
            }
        }
    }
    UnixListener::bind(path).map_err(|source| DaemonError::Bind {
        path: path.to_path_buf(),
        source,
    })
}

fn build_state(config: WtConfig) -> Result<DaemonState, DaemonError> {
    let git = GitCli::default();
    // Resolves the configured path to the checkout's top level and refuses
    // to start against a directory that is not a repository.
    let repo = discover_repo(&config.repo_path, &git)?;
    let root = WorktreeRoot::new(
        git.clone(),
        repo.root,
        config.worktrees_dir.clone(),
        config.branch_prefix.clone(),
    );
    let engine = WorktreeEngine::new(
        root,
        git,
        config.copy_strategy,
        config.upstream_branch.clone(),
        config.log_operations,
    );

    let cache = if config.github_enabled {
        let client = GithubClient::new(config.github_repo.clone());
        Some(Arc::new(PrCache::new(
            Arc::new(client) as Arc<dyn PullRequestSource>
        )))
    } else {
        None
    };

    Ok(DaemonState::new(config, engine, cache))
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "cannot install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "cannot install SIGINT handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

/// Run the daemon until a shutdown signal arrives. Blocks the caller for the
/// process lifetime.
pub async fn run_daemon(config: WtConfig) -> Result<(), DaemonError> {
    config.validate()?;
    let state = Arc::new(build_state(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_until_shutdown(state, shutdown_rx).await
}

/// The daemon lifecycle proper: pid file, socket, first cache fill, accept
/// loop, drain, cleanup. Exits when `shutdown` flips.
pub async fn run_until_shutdown(
    state: Arc<DaemonState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    fs::create_dir_all(&state.config.worktrees_dir).map_err(|source| {
        DaemonError::io(
            format!(
                "create worktrees dir {}",
                state.config.worktrees_dir.display()
            ),
            source,
        )
    })?;

    let pid_file = PidFile::acquire(&state.config.pid_file())?;
    let socket_path = state.config.socket_file();
    let listener = bind_socket(&socket_path).await?;

    // First fill happens before the accept loop so the first status response
    // is never racing the scheduler.
    if let Some(cache) = state.cache.as_ref() {
        match cache.refresh().await {
            RefreshOutcome::Refreshed { branches } => {
                info!(branches, "initial pull-request fill complete")
            }
            RefreshOutcome::Unavailable { cause } => {
                warn!(%cause, "initial pull-request fill failed; will retry in background")
            }
            RefreshOutcome::Coalesced => {}
        }
    }

    let refresh_interval = Duration::from_secs(state.config.refresh_interval_secs);
    let scheduler = state.cache.as_ref().map(|cache| {
        RefreshScheduler::start(Arc::clone(cache), RefreshConfig::from_base(refresh_interval))
    });

    info!(socket = %socket_path.display(), pid = std::process::id(), "ready");
    serve(listener, Arc::clone(&state), shutdown).await;

    info!("shutting down");
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    if let Err(err) = fs::remove_file(&socket_path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(%err, socket = %socket_path.display(), "failed to remove socket file");
        }
    }
    drop(pid_file);
    Ok(())
}
