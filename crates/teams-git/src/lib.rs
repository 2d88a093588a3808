//! Git plumbing for codex-teams.
//!
//! Everything shells out to the `git` binary; nothing here keeps state. The
//! worktree module owns the task-worktree naming scheme and the quarantine
//! path for orphaned directories; the merge module owns the ff-only /
//! rebase-then-ff ladder used by the completion pipeline.

pub mod command;
pub mod error;
pub mod merge;
pub mod repo;
pub mod worktree;

pub use command::GitCli;
pub use error::GitError;
pub use merge::{MergeOutcome, MergeStrategy};
pub use repo::RepoHandle;
pub use worktree::{EnsureOutcome, WorktreeManager};
