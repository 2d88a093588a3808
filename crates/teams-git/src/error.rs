use std::path::PathBuf;
use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("refusing to operate on the primary repository checkout: {path}")]
    PrimaryRepoRefused { path: PathBuf },
    #[error("primary repository has tracked uncommitted changes: {path}")]
    DirtyPrimary { path: PathBuf },
    #[error("fast-forward of {branch} into {base} failed: {detail}")]
    FastForwardFailed {
        base: String,
        branch: String,
        detail: String,
    },
    #[error("rebase of {branch} onto {base} hit conflicts and was aborted")]
    RebaseConflict { base: String, branch: String },
    #[error("failed to quarantine stale worktree path {path}: {source}")]
    Quarantine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}
