use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("lock already held for scope {scope} (owner={owner}, task={task_id})")]
    LockHeld {
        scope: String,
        owner: String,
        task_id: String,
    },
    #[error("no lock found for scope {scope}")]
    LockMissing { scope: String },
    #[error("scheduler already running (run lock pid {pid})")]
    RunLockHeld { pid: u32 },
    #[error("pid metadata path {path} is occupied by a directory")]
    PidMetaPathOccupied { path: PathBuf },
}
