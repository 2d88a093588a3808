use std::path::PathBuf;

use teams_state::StateError;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("tmux backend unavailable: {detail}")]
    TmuxUnavailable { detail: String },
    #[error("failed to spawn worker ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker exited immediately after launch (pid {pid})")]
    WorkerDiedImmediately { pid: u32 },
    #[error("failed to resolve worker pid for tmux session {session}: {detail}")]
    PidCapture { session: String, detail: String },
    #[error("failed to prepare worker log file {path}: {source}")]
    LogSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write pid metadata: {source}")]
    PidMetaWrite {
        #[source]
        source: StateError,
    },
}
