use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wt_core::types::{WorktreeName, WorktreeRecord};

use crate::command::GitCli;
use crate::error::GitError;

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub detached: bool,
}

/// Worktree operations scoped to one configured root.
///
/// Names map to `<worktrees_dir>/<name>` and branches to
/// `<branch_prefix><name>`; the main repository checkout is never treated as
/// a named worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeRoot {
    git: GitCli,
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
    branch_prefix: String,
}

impl WorktreeRoot {
    pub fn new(
        git: GitCli,
        repo_root: impl Into<PathBuf>,
        worktrees_dir: impl Into<PathBuf>,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            git,
            repo_root: absolutize(repo_root.into()),
            worktrees_dir: absolutize(worktrees_dir.into()),
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn path_for(&self, name: &WorktreeName) -> PathBuf {
        self.worktrees_dir.join(name.as_str())
    }

    pub fn branch_for(&self, name: &WorktreeName) -> String {
        format!("{}{}", self.branch_prefix, name.as_str())
    }

    /// Create a worktree with a fresh branch forked from `start_point`.
    pub fn create(
        &self,
        name: &WorktreeName,
        start_point: &str,
    ) -> Result<WorktreeRecord, GitError> {
        self.ensure_dir()?;
        let path = self.path_for(name);
        let branch = self.branch_for(name);
        self.git.run(
            &self.repo_root,
            [
                "worktree",
                "add",
                "-b",
                &branch,
                path.to_string_lossy().as_ref(),
                start_point,
            ],
        )?;
        Ok(WorktreeRecord {
            name: name.clone(),
            path,
            branch,
            present: true,
        })
    }

    /// Register a worktree on a fresh branch without populating the working
    /// tree. The duplication engine fills the tree itself, then checks the
    /// index out once the file copy has landed.
    pub fn create_unpopulated(
        &self,
        name: &WorktreeName,
        start_point: &str,
    ) -> Result<WorktreeRecord, GitError> {
        self.ensure_dir()?;
        let path = self.path_for(name);
        let branch = self.branch_for(name);
        self.git.run(
            &self.repo_root,
            [
                "worktree",
                "add",
                "--no-checkout",
                "-b",
                &branch,
                path.to_string_lossy().as_ref(),
                start_point,
            ],
        )?;
        Ok(WorktreeRecord {
            name: name.clone(),
            path,
            branch,
            present: true,
        })
    }

    pub fn remove(&self, name: &WorktreeName, force: bool) -> Result<(), GitError> {
        let path = self.path_for(name);
        let path_arg = path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_arg);
        self.git.run(&self.repo_root, args)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ListedWorktree>, GitError> {
        let output = self
            .git
            .run(&self.repo_root, ["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&output.stdout)
    }

    /// All named worktrees under this root, with staleness reconciled against
    /// the filesystem. Worktrees living outside `worktrees_dir` (including
    /// the main checkout) are not records of this root.
    pub fn records(&self) -> Result<Vec<WorktreeRecord>, GitError> {
        let listed = self.list()?;
        // Porcelain paths are absolute and resolved; a relative or
        // non-canonical configured dir must not hide its own worktrees.
        let canonical_dir = fs::canonicalize(&self.worktrees_dir)
            .unwrap_or_else(|_| self.worktrees_dir.clone());
        let mut records = Vec::new();
        for entry in listed {
            let parent = entry.path.parent();
            if parent != Some(self.worktrees_dir.as_path())
                && parent != Some(canonical_dir.as_path())
            {
                continue;
            }
            let Some(file_name) = entry.path.file_name() else {
                continue;
            };
            let name = WorktreeName::new(file_name.to_string_lossy().into_owned());
            let branch = entry
                .branch
                .clone()
                .unwrap_or_else(|| self.branch_for(&name));
            let present = entry.path.is_dir();
            records.push(WorktreeRecord {
                name,
                path: entry.path,
                branch,
                present,
            });
        }
        Ok(records)
    }

    /// Look up one record by name; `UnknownWorktree` when absent.
    pub fn record(&self, name: &WorktreeName) -> Result<WorktreeRecord, GitError> {
        self.records()?
            .into_iter()
            .find(|record| record.name == *name)
            .ok_or_else(|| GitError::UnknownWorktree {
                name: name.as_str().to_string(),
            })
    }

    fn ensure_dir(&self) -> Result<(), GitError> {
        fs::create_dir_all(&self.worktrees_dir).map_err(|source| GitError::Io {
            command: format!("create_dir_all {}", self.worktrees_dir.display()),
            source,
        })
    }
}

/// Relative paths would resolve against the process cwd for filesystem
/// calls but against the repository root for `git -C` arguments; pin them
/// to the cwd once, at construction.
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;
    let mut head: Option<String> = None;
    let mut detached = false;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(done) = path.take() {
                listed.push(ListedWorktree {
                    path: done,
                    branch: branch.take(),
                    head: head.take(),
                    detached: std::mem::take(&mut detached),
                });
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest.trim()));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim().trim_start_matches("refs/heads/").to_string());
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.trim().to_string());
        } else if line.trim() == "detached" {
            detached = true;
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }
    Ok(listed)
}
