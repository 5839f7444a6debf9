//! Request/response envelope and method dispatch.
//!
//! The wire format is one JSON object per line. Every response carries the
//! request id when one was supplied; protocol errors are structured
//! `{ kind, message }` objects, never dropped connections.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use wt_core::types::WorktreeName;
use wt_git::GitError;

use crate::cache::RefreshOutcome;
use crate::engine::EngineError;
use crate::hook::run_post_create_hook;
use crate::state::DaemonState;

/// How long a handler waits for a mutation before answering `running` and
/// letting the operation finish in the background.
pub const SLOW_OP_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: Option<u64>, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: String,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            "unknown_method",
            format!(
                "unknown method {method:?}; known methods: ping, status, list, create, copy, \
                 remove, resolve-path, refresh"
            ),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", message)
    }
}

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::Refused { refusal } => Self::new(refusal.kind(), err.to_string()),
            EngineError::Git(GitError::UnknownWorktree { .. }) => {
                Self::new("unknown_worktree", err.to_string())
            }
            EngineError::SourceMissing { .. } => Self::new("source_missing", err.to_string()),
            EngineError::DestinationExists { .. } => {
                Self::new("destination_exists", err.to_string())
            }
            EngineError::Copy(_) => Self::new("copy_failed", err.to_string()),
            EngineError::Git(_) => Self::new("git_error", err.to_string()),
            EngineError::TaskFailed { .. } => Self::internal(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CopyParams {
    source: String,
    dest: String,
}

#[derive(Debug, Deserialize)]
struct RemoveParams {
    name: String,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    current_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ResolvePathParams {
    target: String,
    path: String,
    current_path: PathBuf,
}

/// Handle one request end to end. Never panics, never returns a transport
/// error; every failure becomes a structured error in the response.
pub async fn dispatch(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id;
    let outcome = match request.method.as_str() {
        "ping" => Ok(json!({ "pong": true })),
        "status" => handle_status(&state).await,
        "list" => handle_list(&state).await,
        "refresh" => handle_refresh(&state).await,
        "create" => bounded(handle_create(Arc::clone(&state), request.params)).await,
        "copy" => bounded(handle_copy(Arc::clone(&state), request.params)).await,
        "remove" => bounded(handle_remove(Arc::clone(&state), request.params)).await,
        "resolve-path" => handle_resolve_path(&state, request.params).await,
        other => Err(RpcError::unknown_method(other)),
    };
    match outcome {
        Ok(result) => RpcResponse::ok(id, result),
        Err(error) => RpcResponse::fail(id, error),
    }
}

/// Run a mutation with the slow-operation deadline. The spawned task keeps
/// running after a timeout answer; a client disconnect never cancels work.
async fn bounded<F>(work: F) -> Result<Value, RpcError>
where
    F: std::future::Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    let mut handle = tokio::spawn(work);
    match tokio::time::timeout(SLOW_OP_DEADLINE, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            error!(%join_err, "rpc handler task failed");
            Err(RpcError::internal("handler task failed"))
        }
        Err(_elapsed) => Ok(json!({ "state": "running" })),
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|err| RpcError::bad_request(format!("invalid params: {err}")))
}

async fn handle_status(state: &DaemonState) -> Result<Value, RpcError> {
    let worktrees = state.engine.list().await.map_err(RpcError::from)?.len();
    let github = state.cache.as_ref().map(|cache| {
        let status = cache.status();
        json!({
            "branches": cache.snapshot().len(),
            "last_success": status.last_success,
            "last_error": status.last_error,
            "last_error_message": status.last_error_message,
        })
    });
    Ok(json!({
        "pid": std::process::id(),
        "started_at": state.started_at,
        "worktrees": worktrees,
        "github": github,
    }))
}

async fn handle_list(state: &DaemonState) -> Result<Value, RpcError> {
    let records = state.engine.list().await.map_err(RpcError::from)?;
    let worktrees: Vec<Value> = records
        .into_iter()
        .map(|record| {
            let pull_request = state
                .cache
                .as_ref()
                .and_then(|cache| cache.get(&record.branch));
            json!({
                "name": record.name,
                "path": record.path,
                "branch": record.branch,
                "present": record.present,
                "pull_request": pull_request,
            })
        })
        .collect();
    Ok(json!({ "worktrees": worktrees }))
}

async fn handle_refresh(state: &DaemonState) -> Result<Value, RpcError> {
    let Some(cache) = state.cache.as_ref() else {
        return Err(RpcError::new(
            "github_disabled",
            "the github integration is disabled in this daemon's configuration",
        ));
    };
    let result = match cache.refresh().await {
        RefreshOutcome::Refreshed { branches } => {
            json!({ "outcome": "refreshed", "branches": branches })
        }
        RefreshOutcome::Coalesced => json!({ "outcome": "coalesced" }),
        RefreshOutcome::Unavailable { cause } => {
            json!({ "outcome": "unavailable", "cause": cause })
        }
    };
    Ok(result)
}

async fn handle_create(state: Arc<DaemonState>, params: Value) -> Result<Value, RpcError> {
    let params: CreateParams = parse_params(params)?;
    let name = WorktreeName::new(params.name);
    let record = state.engine.create(&name).await.map_err(RpcError::from)?;

    let hook = match state.config.post_create_hook.as_ref() {
        Some(hook_path) => {
            let timeout = Duration::from_secs(state.config.post_create_hook_timeout_secs);
            let outcome = run_post_create_hook(hook_path, &record.path, timeout)
                .await
                .map_err(|err| RpcError::new("hook_failed", err.to_string()))?;
            Some(outcome)
        }
        None => None,
    };

    Ok(json!({ "worktree": record, "hook": hook }))
}

async fn handle_copy(state: Arc<DaemonState>, params: Value) -> Result<Value, RpcError> {
    let params: CopyParams = parse_params(params)?;
    let source = WorktreeName::new(params.source);
    let dest = WorktreeName::new(params.dest);
    let (record, applied) = state
        .engine
        .copy(&source, &dest)
        .await
        .map_err(RpcError::from)?;
    Ok(json!({ "worktree": record, "strategy": applied.as_str() }))
}

async fn handle_remove(state: Arc<DaemonState>, params: Value) -> Result<Value, RpcError> {
    let params: RemoveParams = parse_params(params)?;
    let name = WorktreeName::new(params.name);
    state
        .engine
        .remove(&name, params.current_path.as_deref(), params.force)
        .await
        .map_err(RpcError::from)?;
    Ok(json!({ "removed": name }))
}

async fn handle_resolve_path(state: &DaemonState, params: Value) -> Result<Value, RpcError> {
    let params: ResolvePathParams = parse_params(params)?;
    let target = WorktreeName::new(params.target);
    let resolved = state
        .engine
        .resolve_path(&target, &params.path, &params.current_path)
        .await
        .map_err(RpcError::from)?;
    Ok(json!({ "path": resolved }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use wt_core::config::{CopyStrategy, WtConfig};
    use wt_git::{GitCli, WorktreeRoot};

    use crate::engine::WorktreeEngine;

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo(root: &Path) {
        run_git(root, &["init", "-b", "main"]);
        fs::write(root.join("README.md"), "init\n").expect("write file");
        run_git(root, &["add", "README.md"]);
        run_git(
            root,
            &[
                "-c",
                "user.name=Test User",
                "-c",
                "user.email=test@example.com",
                "commit",
                "-m",
                "init",
            ],
        );
    }

    fn mk_state(dir: &Path) -> Arc<DaemonState> {
        let repo = dir.join("repo");
        fs::create_dir_all(&repo).expect("create repo dir");
        init_repo(&repo);
        let worktrees = dir.join("worktrees");
        let config = WtConfig {
            repo_path: repo.clone(),
            worktrees_dir: worktrees.clone(),
            branch_prefix: "user/".to_string(),
            upstream_branch: "main".to_string(),
            github_repo: String::new(),
            github_enabled: false,
            copy_strategy: CopyStrategy::Auto,
            refresh_interval_secs: 60,
            post_create_hook: None,
            post_create_hook_timeout_secs: 120,
            log_operations: false,
        };
        let root = WorktreeRoot::new(GitCli::default(), repo, worktrees, "user/");
        let engine = WorktreeEngine::new(root, GitCli::default(), CopyStrategy::Auto, "main", false);
        Arc::new(DaemonState::new(config, engine, None))
    }

    fn request(method: &str, params: Value, id: u64) -> RpcRequest {
        RpcRequest {
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    #[tokio::test]
    async fn ping_answers_pong_with_matching_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());
        let response = dispatch(state, request("ping", Value::Null, 7)).await;
        assert_eq!(response.id, Some(7));
        assert_eq!(response.result.expect("result"), json!({ "pong": true }));
    }

    #[tokio::test]
    async fn unknown_method_is_a_structured_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());
        let response = dispatch(state, request("frobnicate", Value::Null, 1)).await;
        let error = response.error.expect("error");
        assert_eq!(error.kind, "unknown_method");
    }

    #[tokio::test]
    async fn malformed_params_are_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());
        let response = dispatch(state, request("copy", json!({ "source": "a" }), 2)).await;
        let error = response.error.expect("error");
        assert_eq!(error.kind, "bad_request");
    }

    #[tokio::test]
    async fn refresh_without_github_is_typed_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());
        let response = dispatch(state, request("refresh", Value::Null, 3)).await;
        let error = response.error.expect("error");
        assert_eq!(error.kind, "github_disabled");
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());

        let created = dispatch(
            Arc::clone(&state),
            request("create", json!({ "name": "feature-x" }), 4),
        )
        .await;
        assert!(created.error.is_none(), "create failed: {:?}", created.error);

        let listed = dispatch(state, request("list", Value::Null, 5)).await;
        let result = listed.result.expect("list result");
        let worktrees = result["worktrees"].as_array().expect("array");
        assert_eq!(worktrees.len(), 1);
        assert_eq!(worktrees[0]["branch"], "user/feature-x");
        assert!(worktrees[0]["pull_request"].is_null());
    }

    #[tokio::test]
    async fn remove_of_unknown_worktree_reports_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());
        let response = dispatch(state, request("remove", json!({ "name": "ghost" }), 6)).await;
        let error = response.error.expect("error");
        assert_eq!(error.kind, "unknown_worktree");
    }

    #[tokio::test]
    async fn status_reports_pid_and_worktree_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = mk_state(dir.path());
        let response = dispatch(state, request("status", Value::Null, 8)).await;
        let result = response.result.expect("status result");
        assert_eq!(result["pid"], json!(std::process::id()));
        assert_eq!(result["worktrees"], json!(0));
        assert!(result["github"].is_null());
    }
}
