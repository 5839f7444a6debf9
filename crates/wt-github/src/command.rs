use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Command;

use crate::error::GhCommandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhOutput {
    pub stdout: String,
}

/// Wrapper over the `gh` binary, injectable for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhCli {
    pub binary: PathBuf,
}

impl Default for GhCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gh"),
        }
    }
}

impl GhCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn run<I, S>(&self, args: I) -> Result<GhOutput, GhCommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, &owned_args);

        let output = Command::new(&self.binary)
            .args(&owned_args)
            .output()
            .map_err(|source| GhCommandError::Io {
                command: rendered.clone(),
                source,
            })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GhCommandError::NonUtf8Output {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(GhCommandError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stderr,
            });
        }

        Ok(GhOutput { stdout })
    }
}

fn render_command(binary: &std::path::Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
