//! Working-tree duplication.
//!
//! Strategy order: reflink/clone-on-write first (near-instant, shares
//! blocks), full copy as the fallback when the filesystem cannot reflink.
//! The `.git` entry is never copied — the destination worktree carries its
//! own gitdir pointer.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use wt_core::config::CopyStrategy;

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("copy command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("copy command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to read source tree at {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("filesystem does not support reflink copies: {stderr}")]
    ReflinkUnsupported { stderr: String },
}

/// Which strategy actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedStrategy {
    Reflink,
    Full,
}

impl AppliedStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedStrategy::Reflink => "reflink",
            AppliedStrategy::Full => "full",
        }
    }
}

#[cfg(target_os = "macos")]
fn reflink_flags() -> &'static [&'static str] {
    &["-R", "-p", "-c"]
}

#[cfg(not(target_os = "macos"))]
fn reflink_flags() -> &'static [&'static str] {
    &["-R", "-p", "--reflink=always"]
}

const FULL_FLAGS: &[&str] = &["-R", "-p"];

/// Copy every top-level entry of `src` except `.git` into `dst`.
///
/// Partial output from a failed attempt is removed before returning, so a
/// failure never leaves the destination half-populated. Callers still own
/// unregistering the destination worktree itself.
pub fn clone_tree(
    src: &Path,
    dst: &Path,
    strategy: CopyStrategy,
) -> Result<AppliedStrategy, CopyError> {
    match strategy {
        CopyStrategy::Reflink => {
            attempt(src, dst, reflink_flags()).map(|()| AppliedStrategy::Reflink)
        }
        CopyStrategy::Full => attempt(src, dst, FULL_FLAGS).map(|()| AppliedStrategy::Full),
        CopyStrategy::Auto => match attempt(src, dst, reflink_flags()) {
            Ok(()) => Ok(AppliedStrategy::Reflink),
            Err(CopyError::CommandFailed { .. }) | Err(CopyError::ReflinkUnsupported { .. }) => {
                attempt(src, dst, FULL_FLAGS).map(|()| AppliedStrategy::Full)
            }
            Err(other) => Err(other),
        },
    }
}

fn attempt(src: &Path, dst: &Path, flags: &[&str]) -> Result<(), CopyError> {
    let entries = top_level_entries(src)?;
    let mut copied: Vec<PathBuf> = Vec::new();

    for entry in &entries {
        match copy_entry(entry, dst, flags) {
            Ok(()) => {
                if let Some(file_name) = entry.file_name() {
                    copied.push(dst.join(file_name));
                }
            }
            Err(err) => {
                // The failing entry may itself have landed partially.
                if let Some(file_name) = entry.file_name() {
                    remove_entry(&dst.join(file_name));
                }
                for partial in copied {
                    remove_entry(&partial);
                }
                return Err(classify(err, flags));
            }
        }
    }
    Ok(())
}

fn top_level_entries(src: &Path) -> Result<Vec<PathBuf>, CopyError> {
    let read_dir = fs::read_dir(src).map_err(|source| CopyError::ReadSource {
        path: src.to_path_buf(),
        source,
    })?;
    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| CopyError::ReadSource {
            path: src.to_path_buf(),
            source,
        })?;
        if entry.file_name() == ".git" {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn copy_entry(entry: &Path, dst: &Path, flags: &[&str]) -> Result<(), CopyError> {
    let rendered = format!("cp {} {} {}/", flags.join(" "), entry.display(), dst.display());
    let output = Command::new("cp")
        .args(flags)
        .arg(entry)
        .arg(dst)
        .output()
        .map_err(|source| CopyError::Io {
            command: rendered.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(CopyError::CommandFailed {
            command: rendered,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

fn classify(err: CopyError, flags: &[&str]) -> CopyError {
    let is_reflink = flags.iter().any(|flag| flag.contains("reflink") || *flag == "-c");
    match err {
        CopyError::CommandFailed { stderr, .. } if is_reflink => {
            CopyError::ReflinkUnsupported { stderr }
        }
        other => other,
    }
}

fn remove_entry(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else {
        let _ = fs::remove_file(path);
    }
}
