//! Worktree engine: COW duplication, cross-worktree path resolution, and
//! pre-removal safety checks.
//!
//! Mutating operations are serialized per worktree name and run on the
//! blocking pool so large copies never stall the RPC event loop.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use wt_core::config::CopyStrategy;
use wt_core::events::OperationEvent;
use wt_core::types::{WorktreeName, WorktreeRecord};
use wt_git::repo::has_uncommitted_changes;
use wt_git::{GitCli, GitError, WorktreeRoot};

use crate::copy::{clone_tree, AppliedStrategy, CopyError};
use crate::locks::NameLocks;
use crate::procscan::ProcessProbe;

/// Why a removal was refused. Carried to the RPC boundary as a typed error
/// kind, never a silent `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalRefusal {
    DirtyWorktree { name: WorktreeName },
    ActiveWorktree { name: WorktreeName },
    BusyProcesses { name: WorktreeName, pids: Vec<u32> },
}

impl RemovalRefusal {
    pub fn kind(&self) -> &'static str {
        match self {
            RemovalRefusal::DirtyWorktree { .. } => "dirty_worktree",
            RemovalRefusal::ActiveWorktree { .. } => "active_worktree",
            RemovalRefusal::BusyProcesses { .. } => "busy_processes",
        }
    }
}

impl std::fmt::Display for RemovalRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalRefusal::DirtyWorktree { name } => {
                write!(f, "worktree {name} has uncommitted changes")
            }
            RemovalRefusal::ActiveWorktree { name } => {
                write!(f, "worktree {name} is the currently active worktree")
            }
            RemovalRefusal::BusyProcesses { name, pids } => {
                write!(f, "worktree {name} has live processes inside it: {pids:?}")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error("source worktree {name} is missing on disk")]
    SourceMissing { name: String },
    #[error("destination worktree {name} already exists")]
    DestinationExists { name: String },
    #[error("{refusal}")]
    Refused { refusal: RemovalRefusal },
    #[error("engine task failed: {message}")]
    TaskFailed { message: String },
}

pub struct WorktreeEngine {
    root: WorktreeRoot,
    git: GitCli,
    probe: ProcessProbe,
    locks: NameLocks,
    strategy: CopyStrategy,
    upstream_branch: String,
    log_operations: bool,
}

impl WorktreeEngine {
    pub fn new(
        root: WorktreeRoot,
        git: GitCli,
        strategy: CopyStrategy,
        upstream_branch: impl Into<String>,
        log_operations: bool,
    ) -> Self {
        Self {
            root,
            git,
            probe: ProcessProbe::default(),
            locks: NameLocks::new(),
            strategy,
            upstream_branch: upstream_branch.into(),
            log_operations,
        }
    }

    pub fn with_probe(mut self, probe: ProcessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub async fn list(&self) -> Result<Vec<WorktreeRecord>, EngineError> {
        let root = self.root.clone();
        run_blocking(move || root.records().map_err(EngineError::from)).await
    }

    pub async fn create(&self, name: &WorktreeName) -> Result<WorktreeRecord, EngineError> {
        let lock = self.locks.lock_for(name);
        let _guard = lock.lock().await;

        let root = self.root.clone();
        let name_owned = name.clone();
        let upstream = self.upstream_branch.clone();
        let record =
            run_blocking(move || root.create(&name_owned, &upstream).map_err(EngineError::from))
                .await?;

        self.emit(OperationEvent::WorktreeCreated {
            name: record.name.clone(),
            branch: record.branch.clone(),
            path: record.path.clone(),
            at: Utc::now(),
        });
        Ok(record)
    }

    /// Duplicate `source` into a new worktree `dest`, byte-identical at call
    /// time including untracked and uncommitted files. All-or-nothing: a
    /// failure partway through unregisters and deletes the partial
    /// destination before returning.
    pub async fn copy(
        &self,
        source: &WorktreeName,
        dest: &WorktreeName,
    ) -> Result<(WorktreeRecord, AppliedStrategy), EngineError> {
        let lock = self.locks.lock_for(dest);
        let _guard = lock.lock().await;

        let root = self.root.clone();
        let git = self.git.clone();
        let strategy = self.strategy;
        let source_owned = source.clone();
        let dest_owned = dest.clone();

        let (record, applied) = run_blocking(move || {
            copy_blocking(&root, &git, strategy, &source_owned, &dest_owned)
        })
        .await?;

        self.emit(OperationEvent::WorktreeCopied {
            source: source.clone(),
            dest: dest.clone(),
            strategy: applied.as_str().to_string(),
            at: Utc::now(),
        });
        Ok((record, applied))
    }

    /// Safety check for removal. Returns the record when removal is safe,
    /// or a typed refusal explaining exactly why it is not.
    pub async fn can_remove(
        &self,
        name: &WorktreeName,
        current_position: Option<&Path>,
    ) -> Result<WorktreeRecord, EngineError> {
        let root = self.root.clone();
        let git = self.git.clone();
        let probe = self.probe.clone();
        let name_owned = name.clone();
        let position = current_position.map(Path::to_path_buf);
        run_blocking(move || can_remove_blocking(&root, &git, &probe, &name_owned, position.as_deref()))
            .await
    }

    pub async fn remove(
        &self,
        name: &WorktreeName,
        current_position: Option<&Path>,
        force: bool,
    ) -> Result<(), EngineError> {
        let lock = self.locks.lock_for(name);
        let _guard = lock.lock().await;

        let root = self.root.clone();
        let git = self.git.clone();
        let probe = self.probe.clone();
        let name_owned = name.clone();
        let position = current_position.map(Path::to_path_buf);
        run_blocking(move || {
            if !force {
                can_remove_blocking(&root, &git, &probe, &name_owned, position.as_deref())?;
            }
            root.remove(&name_owned, force).map_err(EngineError::from)
        })
        .await?;

        self.emit(OperationEvent::WorktreeRemoved {
            name: name.clone(),
            forced: force,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Map a path from the caller's worktree into `target`, best effort.
    pub async fn resolve_path(
        &self,
        target: &WorktreeName,
        raw_path: &str,
        current_position: &Path,
    ) -> Result<PathBuf, EngineError> {
        let root = self.root.clone();
        let target_owned = target.clone();
        let raw = raw_path.to_string();
        let position = current_position.to_path_buf();
        run_blocking(move || {
            let record = root.record(&target_owned)?;
            let source_root = containing_root(&root, &position)?;
            Ok(mirror_path(
                &record.path,
                &raw,
                &position,
                source_root.as_deref(),
            ))
        })
        .await
    }

    fn emit(&self, event: OperationEvent) {
        if !self.log_operations {
            return;
        }
        match serde_json::to_string(&event) {
            Ok(payload) => {
                info!(target: "wtd::oplog", worktree = %event.worktree(), event = %payload, "operation")
            }
            Err(_) => info!(target: "wtd::oplog", worktree = %event.worktree(), ?event, "operation"),
        }
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|join_err| EngineError::TaskFailed {
            message: join_err.to_string(),
        })?
}

fn copy_blocking(
    root: &WorktreeRoot,
    git: &GitCli,
    strategy: CopyStrategy,
    source: &WorktreeName,
    dest: &WorktreeName,
) -> Result<(WorktreeRecord, AppliedStrategy), EngineError> {
    let source_record = root.record(source)?;
    if source_record.is_stale() {
        return Err(EngineError::SourceMissing {
            name: source.as_str().to_string(),
        });
    }
    if root.path_for(dest).exists() {
        return Err(EngineError::DestinationExists {
            name: dest.as_str().to_string(),
        });
    }

    let head = git
        .run(&source_record.path, ["rev-parse", "HEAD"])?
        .stdout
        .trim()
        .to_string();

    let dest_record = root.create_unpopulated(dest, &head)?;

    let finish = || -> Result<AppliedStrategy, EngineError> {
        let applied = clone_tree(&source_record.path, &dest_record.path, strategy)?;
        // Point the fresh index at HEAD; the working files are already in
        // place from the clone, so a mixed reset leaves them untouched.
        git.run(&dest_record.path, ["reset", "--quiet"])?;
        Ok(applied)
    };

    match finish() {
        Ok(applied) => Ok((dest_record, applied)),
        Err(err) => {
            cleanup_partial_copy(root, git, &dest_record);
            Err(err)
        }
    }
}

/// Best-effort teardown of a failed duplication: unregister the worktree,
/// delete whatever landed on disk, drop the fresh branch.
fn cleanup_partial_copy(root: &WorktreeRoot, git: &GitCli, dest: &WorktreeRecord) {
    let _ = root.remove(&dest.name, true);
    if dest.path.exists() {
        let _ = std::fs::remove_dir_all(&dest.path);
    }
    let _ = git.run_unchecked(root.repo_root(), ["branch", "-D", &dest.branch]);
}

fn can_remove_blocking(
    root: &WorktreeRoot,
    git: &GitCli,
    probe: &ProcessProbe,
    name: &WorktreeName,
    current_position: Option<&Path>,
) -> Result<WorktreeRecord, EngineError> {
    let record = root.record(name)?;

    if let Some(position) = current_position {
        if position.starts_with(&record.path) {
            return Err(EngineError::Refused {
                refusal: RemovalRefusal::ActiveWorktree { name: name.clone() },
            });
        }
    }

    if record.present {
        if has_uncommitted_changes(&record.path, git)? {
            return Err(EngineError::Refused {
                refusal: RemovalRefusal::DirtyWorktree { name: name.clone() },
            });
        }
        if let Some(pids) = probe.pids_under(&record.path) {
            if !pids.is_empty() {
                return Err(EngineError::Refused {
                    refusal: RemovalRefusal::BusyProcesses {
                        name: name.clone(),
                        pids,
                    },
                });
            }
        }
    }

    Ok(record)
}

/// Which known root (a named worktree or the main checkout) contains
/// `position`, if any.
fn containing_root(
    root: &WorktreeRoot,
    position: &Path,
) -> Result<Option<PathBuf>, EngineError> {
    for record in root.records()? {
        if position.starts_with(&record.path) {
            return Ok(Some(record.path));
        }
    }
    if position.starts_with(root.repo_root()) {
        return Ok(Some(root.repo_root().to_path_buf()));
    }
    Ok(None)
}

/// Best-effort path mirroring into `target_root`.
///
/// Absolute-style paths resolve against the target root. Relative paths
/// preserve the caller's position: the equivalent directory in the target is
/// walked upward until one exists, the relative path is appended, and the
/// nearest existing ancestor of the result is returned when the exact
/// mirrored path is absent.
pub fn mirror_path(
    target_root: &Path,
    raw_path: &str,
    current_position: &Path,
    source_root: Option<&Path>,
) -> PathBuf {
    if raw_path.starts_with('/') {
        let given = Path::new(raw_path);
        if given.starts_with(target_root) {
            return given.to_path_buf();
        }
        return normalize_under(target_root, Path::new(raw_path.trim_start_matches('/')));
    }

    let relative_position = source_root
        .and_then(|source| current_position.strip_prefix(source).ok())
        .unwrap_or_else(|| Path::new(""));

    let mut anchor = target_root.join(relative_position);
    while !anchor.is_dir() && anchor != target_root {
        match anchor.parent() {
            Some(parent) => anchor = parent.to_path_buf(),
            None => break,
        }
    }

    let candidate = normalize_under(target_root, &anchor.join(raw_path));
    best_existing(target_root, candidate)
}

/// Lexically resolve `.`/`..` components without escaping `floor`.
fn normalize_under(floor: &Path, path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.as_path() != floor && !resolved.pop() {
                    resolved = floor.to_path_buf();
                }
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    if resolved.starts_with(floor) {
        resolved
    } else {
        floor.to_path_buf()
    }
}

fn best_existing(floor: &Path, candidate: PathBuf) -> PathBuf {
    let mut current = candidate.clone();
    while !current.exists() && current != floor {
        match current.parent() {
            Some(parent) if parent.starts_with(floor) => current = parent.to_path_buf(),
            _ => return floor.to_path_buf(),
        }
    }
    if current.exists() {
        if current == candidate {
            candidate
        } else {
            current
        }
    } else {
        floor.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;

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

    fn mk_engine(dir: &Path) -> WorktreeEngine {
        let repo = dir.join("repo");
        fs::create_dir_all(&repo).expect("create repo dir");
        init_repo(&repo);
        let root = WorktreeRoot::new(
            GitCli::default(),
            repo,
            dir.join("worktrees"),
            "user/",
        );
        WorktreeEngine::new(root, GitCli::default(), CopyStrategy::Auto, "main", false)
    }

    #[tokio::test]
    async fn copy_duplicates_uncommitted_and_untracked_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = mk_engine(dir.path());
        let src = WorktreeName::new("origin");
        let dst = WorktreeName::new("clone");

        let created = engine.create(&src).await.expect("create source");
        fs::write(created.path.join("README.md"), "modified but not committed\n")
            .expect("dirty edit");
        fs::write(created.path.join("untracked.txt"), "never added\n").expect("untracked");

        let (record, _applied) = engine.copy(&src, &dst).await.expect("copy");
        assert_eq!(
            fs::read_to_string(record.path.join("README.md")).expect("read"),
            "modified but not committed\n"
        );
        assert_eq!(
            fs::read_to_string(record.path.join("untracked.txt")).expect("read"),
            "never added\n"
        );
        assert_eq!(record.branch, "user/clone");
    }

    #[test]
    fn cleanup_unregisters_worktree_directory_and_branch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path().join("repo");
        fs::create_dir_all(&repo).expect("create repo dir");
        init_repo(&repo);
        let git = GitCli::default();
        let root = WorktreeRoot::new(git.clone(), &repo, dir.path().join("worktrees"), "user/");

        let record = root
            .create_unpopulated(&WorktreeName::new("doomed"), "main")
            .expect("register worktree");
        fs::write(record.path.join("partial.txt"), "half-copied\n").expect("write partial");

        cleanup_partial_copy(&root, &git, &record);

        assert!(!record.path.exists());
        assert!(root.records().expect("records").is_empty());
        let branch_probe = git
            .run_unchecked(&repo, ["rev-parse", "--verify", "refs/heads/user/doomed"])
            .expect("spawn git");
        assert_ne!(branch_probe.status, 0, "branch must be deleted");
    }

    #[tokio::test]
    async fn copy_into_existing_destination_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = mk_engine(dir.path());
        let src = WorktreeName::new("origin");
        let dst = WorktreeName::new("taken");
        engine.create(&src).await.expect("create source");
        engine.create(&dst).await.expect("create dest");

        let err = engine.copy(&src, &dst).await.expect_err("must refuse");
        assert!(matches!(err, EngineError::DestinationExists { .. }));
    }

    #[tokio::test]
    async fn copy_from_unknown_source_is_typed_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = mk_engine(dir.path());
        let err = engine
            .copy(&WorktreeName::new("ghost"), &WorktreeName::new("clone"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngineError::Git(GitError::UnknownWorktree { .. })));
    }

    #[tokio::test]
    async fn dirty_worktree_removal_is_refused_then_forced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = mk_engine(dir.path());
        let name = WorktreeName::new("dirty");
        let created = engine.create(&name).await.expect("create");
        fs::write(created.path.join("scratch.txt"), "wip\n").expect("write");

        let err = engine
            .remove(&name, None, false)
            .await
            .expect_err("dirty removal must be refused");
        match err {
            EngineError::Refused { refusal } => {
                assert_eq!(refusal.kind(), "dirty_worktree")
            }
            other => panic!("expected refusal, got {other:?}"),
        }

        engine.remove(&name, None, true).await.expect("forced removal");
        assert!(!created.path.exists());
    }

    #[tokio::test]
    async fn removal_from_inside_the_worktree_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = mk_engine(dir.path());
        let name = WorktreeName::new("active");
        let created = engine.create(&name).await.expect("create");

        let inside = created.path.join("sub");
        let err = engine
            .can_remove(&name, Some(&inside))
            .await
            .expect_err("active worktree must be refused");
        match err {
            EngineError::Refused { refusal } => {
                assert_eq!(refusal.kind(), "active_worktree")
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_inactive_worktree_passes_safety_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = mk_engine(dir.path());
        let name = WorktreeName::new("clean");
        engine.create(&name).await.expect("create");

        let record = engine
            .can_remove(&name, Some(Path::new("/elsewhere")))
            .await
            .expect("clean worktree is removable");
        assert_eq!(record.name, name);
    }

    #[test]
    fn mirror_path_is_idempotent_inside_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("wt");
        fs::create_dir_all(target.join("src")).expect("mkdir");
        let inside = target.join("src").to_string_lossy().into_owned();

        let resolved = mirror_path(&target, &inside, Path::new("/elsewhere"), None);
        assert_eq!(resolved, target.join("src"));
    }

    #[test]
    fn mirror_path_resolves_absolute_style_against_target_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("wt");
        fs::create_dir_all(&target).expect("mkdir");

        let resolved = mirror_path(&target, "/src/lib.rs", Path::new("/elsewhere"), None);
        assert_eq!(resolved, target.join("src/lib.rs"));
    }

    #[test]
    fn mirror_path_preserves_relative_position_when_it_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("a");
        let target = dir.path().join("b");
        fs::create_dir_all(source.join("src/inner")).expect("mkdir");
        fs::create_dir_all(target.join("src/inner")).expect("mkdir");
        fs::write(target.join("src/inner/mod.rs"), "").expect("touch");

        let resolved = mirror_path(
            &target,
            "mod.rs",
            &source.join("src/inner"),
            Some(&source),
        );
        assert_eq!(resolved, target.join("src/inner/mod.rs"));
    }

    #[test]
    fn mirror_path_falls_back_to_nearest_existing_ancestor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("a");
        let target = dir.path().join("b");
        fs::create_dir_all(source.join("src/only_in_a")).expect("mkdir");
        fs::create_dir_all(target.join("src")).expect("mkdir");

        // The mirrored directory src/only_in_a does not exist in the target;
        // the walk lands on src, and the file does not exist there either,
        // so the best existing ancestor is src itself.
        let resolved = mirror_path(
            &target,
            "missing.rs",
            &source.join("src/only_in_a"),
            Some(&source),
        );
        assert_eq!(resolved, target.join("src"));
    }

    #[test]
    fn mirror_path_clamps_parent_escapes_at_target_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("wt");
        fs::create_dir_all(&target).expect("mkdir");

        let resolved = mirror_path(&target, "../../../etc/passwd", &target, Some(&target));
        assert!(resolved.starts_with(&target));
    }
}
