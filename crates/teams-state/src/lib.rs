//! On-disk coordination state for codex-teams.
//!
//! Everything here is plain files under the configured state directory:
//! `key=value` records for scope locks and worker pid metadata, a
//! `mkdir`-based run lock for the scheduler, and the append-only update log.
//! Every record write is write-temp-then-rename in the same directory.

pub mod error;
pub mod lock;
pub mod pidmeta;
pub mod process;
pub mod record;
pub mod runlock;
pub mod updates;

pub use error::StateError;
pub use lock::ScopeLock;
pub use pidmeta::PidMeta;
pub use runlock::RunLockGuard;
pub use updates::UpdateEntry;
