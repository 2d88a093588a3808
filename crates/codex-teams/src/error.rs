//! Contractual error kinds.
//!
//! Each variant's message begins with its literal kind prefix; the smoke
//! suite anchors on those prefixes, so the mapping from library errors into
//! kinds lives here and nowhere else.

use teams_board::table::BoardError;
use teams_board::specs::SpecError;
use teams_core::config::ConfigError;
use teams_git::GitError;
use teams_launch::LaunchError;
use teams_state::StateError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("MissingPrerequisite: {0}")]
    MissingPrerequisite(String),
    #[error("LockConflict: {0}")]
    LockConflict(String),
    #[error("StateInvariant: {0}")]
    StateInvariant(String),
    #[error("MergeFailed: {0}")]
    MergeFailed(String),
    #[error("NotFound: {0}")]
    NotFound(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("WorkerLaunch: {0}")]
    WorkerLaunch(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("state error: {0}")]
    State(StateError),
    #[error("git error: {0}")]
    Git(GitError),
    #[error("board error: {0}")]
    Board(BoardError),
}

impl From<StateError> for EngineError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::LockHeld {
                scope,
                owner,
                task_id,
            } => EngineError::LockConflict(format!(
                "scope {scope} is locked by {owner} for {task_id}"
            )),
            StateError::LockMissing { scope } => {
                EngineError::NotFound(format!("no lock for scope {scope}"))
            }
            StateError::RunLockHeld { pid } => EngineError::LockConflict(format!(
                "scheduler already running (run lock pid {pid})"
            )),
            StateError::PidMetaPathOccupied { path } => EngineError::StateInvariant(format!(
                "pid metadata path is a directory: {}",
                path.display()
            )),
            other => EngineError::State(other),
        }
    }
}

impl From<GitError> for EngineError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::NotARepository { path } => EngineError::MissingPrerequisite(format!(
                "not inside a git repository: {}",
                path.display()
            )),
            GitError::DirtyPrimary { path } => EngineError::StateInvariant(format!(
                "primary repository has tracked uncommitted changes: {}",
                path.display()
            )),
            GitError::PrimaryRepoRefused { path } => EngineError::StateInvariant(format!(
                "refusing to remove the primary repository checkout: {}",
                path.display()
            )),
            GitError::FastForwardFailed {
                base,
                branch,
                detail,
            } => EngineError::MergeFailed(format!(
                "fast-forward of {branch} into {base} failed: {detail}"
            )),
            GitError::RebaseConflict { base, branch } => EngineError::MergeFailed(format!(
                "rebase of {branch} onto {base} aborted on conflicts"
            )),
            other => EngineError::Git(other),
        }
    }
}

impl From<BoardError> for EngineError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::TaskNotFound { task_id } => {
                EngineError::NotFound(format!("task id not on board: {task_id}"))
            }
            BoardError::Missing { path } => {
                EngineError::NotFound(format!("TODO file not found: {}", path.display()))
            }
            BoardError::DuplicateTask { task_id } => {
                EngineError::Rejected(format!("duplicate task id: {task_id}"))
            }
            BoardError::InvalidTaskId { task_id, reason } => {
                EngineError::Rejected(format!("invalid task id {task_id}: {reason}"))
            }
            BoardError::InvalidDep { dep } => {
                EngineError::Rejected(format!("invalid dependency: {dep}"))
            }
            BoardError::InvalidStatus { status } => {
                EngineError::Rejected(format!("invalid status value: {status}"))
            }
            other => EngineError::Board(other),
        }
    }
}

impl From<LaunchError> for EngineError {
    fn from(err: LaunchError) -> Self {
        EngineError::WorkerLaunch(err.to_string())
    }
}

impl From<SpecError> for EngineError {
    fn from(err: SpecError) -> Self {
        match err {
            SpecError::AlreadyExists { path } => {
                EngineError::Rejected(format!("task spec already exists: {}", path.display()))
            }
            other => EngineError::Rejected(other.to_string()),
        }
    }
}
