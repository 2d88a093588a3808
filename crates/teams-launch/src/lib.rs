//! Worker launch backends.
//!
//! The launcher turns a ready task into a detached worker process plus its
//! pid metadata and exit watcher. The spawned children must outlive the
//! short-lived CLI, so everything detaches into a new session.

pub mod backend;
pub mod error;
pub mod prompt;
pub mod spawn;

pub use backend::{apply_sandbox_policy, resolve_backend, split_flags, ResolvedBackend};
pub use error::LaunchError;
pub use prompt::{render_worker_prompt, WorkerPromptInputs};
pub use spawn::{LaunchRequest, LaunchedWorker, Launcher};
