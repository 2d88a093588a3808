use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

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

    /// Run git in `cwd`, failing on non-zero exit.
    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (rendered, output) = self.spawn(cwd, args)?;

        let stdout = decode(output.stdout, &rendered, "stdout")?;
        let stderr = decode(output.stderr, &rendered, "stderr")?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(GitOutput { stdout, stderr })
    }

    /// Run git and report only whether it exited zero. Probe commands like
    /// `merge-base --is-ancestor` signal their answer through the exit code,
    /// so a non-zero exit is an answer rather than an error here.
    pub fn run_ok<I, S>(&self, cwd: &Path, args: I) -> Result<bool, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (_, output) = self.spawn(cwd, args)?;
        Ok(output.status.success())
    }

    /// Run git and return trimmed stdout.
    pub fn stdout<I, S>(&self, cwd: &Path, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self.run(cwd, args)?.stdout.trim().to_string())
    }

    fn spawn<I, S>(&self, cwd: &Path, args: I) -> Result<(String, std::process::Output), GitError>
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
            .current_dir(cwd)
            .args(&owned_args)
            .output()
            .map_err(|source| GitError::Io {
                command: rendered.clone(),
                source,
            })?;
        Ok((rendered, output))
    }
}

fn decode(bytes: Vec<u8>, command: &str, stream: &'static str) -> Result<String, GitError> {
    String::from_utf8(bytes).map_err(|source| GitError::NonUtf8Output {
        command: command.to_string(),
        stream,
        source,
    })
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
