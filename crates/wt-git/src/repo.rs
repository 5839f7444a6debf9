use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
}

pub fn discover_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let probe = git.run_unchecked(start_path, ["rev-parse", "--is-inside-work-tree"])?;
    if probe.status != 0 || probe.stdout.trim() != "true" {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let top = git.run(start_path, ["rev-parse", "--show-toplevel"])?;
    Ok(RepoHandle {
        root: PathBuf::from(top.stdout.trim()),
    })
}

/// True when the worktree at `path` has staged, unstaged, or untracked
/// changes.
pub fn has_uncommitted_changes(path: &Path, git: &GitCli) -> Result<bool, GitError> {
    let output = git.run(path, ["status", "--porcelain"])?;
    Ok(!output.stdout.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::process::Command;

    use super::{discover_repo, has_uncommitted_changes};
    use crate::command::GitCli;
    use crate::error::GitError;

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

    #[test]
    fn discover_repo_finds_root_from_nested_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_repo(dir.path());
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("create nested dir");

        let git = GitCli::default();
        let repo = discover_repo(&nested, &git).expect("discover repo");
        assert_eq!(
            repo.root.canonicalize().expect("canonicalize"),
            dir.path().canonicalize().expect("canonicalize")
        );
    }

    #[test]
    fn discover_repo_rejects_plain_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = GitCli::default();
        let err = discover_repo(dir.path(), &git).expect_err("expected not a repository");
        assert!(matches!(err, GitError::NotARepository { .. }));
    }

    #[test]
    fn clean_repo_has_no_uncommitted_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_repo(dir.path());
        let git = GitCli::default();
        assert!(!has_uncommitted_changes(dir.path(), &git).expect("status"));
    }

    #[test]
    fn untracked_file_counts_as_uncommitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_repo(dir.path());
        fs::write(dir.path().join("scratch.txt"), "wip\n").expect("write file");
        let git = GitCli::default();
        assert!(has_uncommitted_changes(dir.path(), &git).expect("status"));
    }
}
