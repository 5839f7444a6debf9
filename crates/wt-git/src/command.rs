use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

/// Typed wrapper over the `git` binary. The binary path is injectable so
/// tests can point at a missing executable and assert error classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run git in `cwd`; non-zero exit becomes `GitError::CommandFailed`.
    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (rendered, output) = self.exec(cwd, args)?;
        if output.status != 0 {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: Some(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Run git and hand back the exit status instead of classifying it.
    /// Used where a non-zero exit is an answer, not a failure (for example
    /// `git merge-base --is-ancestor`).
    pub fn run_unchecked<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (_, output) = self.exec(cwd, args)?;
        Ok(output)
    }

    fn exec<I, S>(&self, cwd: &Path, args: I) -> Result<(String, GitOutput), GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, cwd, &owned_args);

        let output = Command::new(&self.binary)
            .arg("-C")
            .arg(cwd)
            .args(&owned_args)
            .output()
            .map_err(|source| GitError::Io {
                command: rendered.clone(),
                source,
            })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        let status = output.status.code().unwrap_or(-1);
        Ok((
            rendered,
            GitOutput {
                stdout,
                stderr,
                status,
            },
        ))
    }
}

fn render_command(binary: &Path, cwd: &Path, args: &[OsString]) -> String {
    let mut rendered = format!("{} -C {}", binary.display(), cwd.display());
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
