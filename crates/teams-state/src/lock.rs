//! Per-scope coordination locks.
//!
//! A scope lock is a payload-bearing `key=value` file, so acquisition uses
//! `O_EXCL`-style create-new semantics instead of the run lock's `mkdir`:
//! creating an existing file fails atomically, which is the entire
//! serialization story between concurrent start attempts on one scope.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::StateError;
use crate::record::{read_field, render_pairs, write_pairs_atomic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLock {
    pub owner: String,
    pub scope: String,
    pub task_id: String,
    pub branch: String,
    pub worktree: String,
    pub created_at: String,
    pub heartbeat_at: String,
}

impl ScopeLock {
    pub fn new(
        owner: impl Into<String>,
        scope: impl Into<String>,
        task_id: impl Into<String>,
        branch: impl Into<String>,
        worktree: impl Into<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            owner: owner.into(),
            scope: scope.into(),
            task_id: task_id.into(),
            branch: branch.into(),
            worktree: worktree.into(),
            created_at: now.clone(),
            heartbeat_at: now,
        }
    }

    fn pairs(&self) -> Vec<(String, String)> {
        vec![
            ("owner".to_string(), self.owner.clone()),
            ("scope".to_string(), self.scope.clone()),
            ("task_id".to_string(), self.task_id.clone()),
            ("branch".to_string(), self.branch.clone()),
            ("worktree".to_string(), self.worktree.clone()),
            ("created_at".to_string(), self.created_at.clone()),
            ("heartbeat_at".to_string(), self.heartbeat_at.clone()),
        ]
    }

    /// Acquire the lock at `path`. Fails with [`StateError::LockHeld`] when a
    /// lock file already exists, reporting the current holder.
    pub fn acquire(&self, path: &Path) -> Result<(), StateError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|source| StateError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StateError::LockHeld {
                    scope: self.scope.clone(),
                    owner: read_field(path, "owner"),
                    task_id: read_field(path, "task_id"),
                });
            }
            Err(source) => {
                return Err(StateError::Write {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        file.write_all(render_pairs(&self.pairs()).as_bytes())
            .map_err(|source| StateError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }

    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        Some(Self {
            owner: read_field(path, "owner"),
            scope: read_field(path, "scope"),
            task_id: read_field(path, "task_id"),
            branch: read_field(path, "branch"),
            worktree: read_field(path, "worktree"),
            created_at: read_field(path, "created_at"),
            heartbeat_at: read_field(path, "heartbeat_at"),
        })
    }

    /// Refresh `heartbeat_at` in place (atomic rewrite).
    pub fn heartbeat(path: &Path) -> Result<(), StateError> {
        let lock = Self::load(path).ok_or_else(|| StateError::LockMissing {
            scope: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })?;
        let mut refreshed = lock;
        refreshed.heartbeat_at = Utc::now().to_rfc3339();
        write_pairs_atomic(path, &refreshed.pairs())
    }
}

/// Remove the lock file unconditionally. Missing file is success.
pub fn remove_lock(path: &Path) -> Result<(), StateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StateError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Remove the lock only while it still points at `task_id`. Returns true when
/// a file was removed.
pub fn remove_lock_if_task(path: &Path, task_id: &str) -> Result<bool, StateError> {
    if !path.exists() {
        return Ok(false);
    }
    if read_field(path, "task_id") != task_id {
        return Ok(false);
    }
    remove_lock(path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{remove_lock, remove_lock_if_task, ScopeLock};
    use crate::error::StateError;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("codex-teams-lock-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn sample_lock() -> ScopeLock {
        ScopeLock::new(
            "AgentA",
            "app-shell",
            "T1-001",
            "codex/agenta-t1-001",
            "/tmp/wt",
        )
    }

    #[test]
    fn acquire_then_load_round_trips_payload() {
        let dir = unique_temp_dir("roundtrip");
        let path = dir.join("locks").join("app-shell.lock");

        let lock = sample_lock();
        lock.acquire(&path).expect("acquire");

        let loaded = ScopeLock::load(&path).expect("load");
        assert_eq!(loaded.owner, "AgentA");
        assert_eq!(loaded.task_id, "T1-001");
        assert_eq!(loaded.branch, "codex/agenta-t1-001");
        assert!(!loaded.created_at.is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn second_acquire_fails_atomically_with_holder_details() {
        let dir = unique_temp_dir("conflict");
        let path = dir.join("app-shell.lock");

        sample_lock().acquire(&path).expect("first acquire");
        let err = ScopeLock::new("AgentB", "app-shell", "T2-002", "codex/b", "/tmp/wt2")
            .acquire(&path)
            .expect_err("second acquire must fail");

        match err {
            StateError::LockHeld {
                scope,
                owner,
                task_id,
            } => {
                assert_eq!(scope, "app-shell");
                assert_eq!(owner, "AgentA");
                assert_eq!(task_id, "T1-001");
            }
            other => panic!("expected LockHeld, got {other:?}"),
        }

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn heartbeat_updates_only_the_heartbeat_field() {
        let dir = unique_temp_dir("heartbeat");
        let path = dir.join("app-shell.lock");

        let lock = sample_lock();
        lock.acquire(&path).expect("acquire");
        std::thread::sleep(std::time::Duration::from_millis(5));
        ScopeLock::heartbeat(&path).expect("heartbeat");

        let loaded = ScopeLock::load(&path).expect("load");
        assert_eq!(loaded.created_at, lock.created_at);
        assert_ne!(loaded.heartbeat_at, lock.heartbeat_at);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn heartbeat_on_missing_lock_reports_lock_missing() {
        let dir = unique_temp_dir("heartbeat-missing");
        let err = ScopeLock::heartbeat(&dir.join("app-shell.lock"))
            .expect_err("missing lock must fail");
        assert!(matches!(err, StateError::LockMissing { scope } if scope == "app-shell"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn conditional_removal_checks_task_binding() {
        let dir = unique_temp_dir("conditional");
        let path = dir.join("app-shell.lock");
        sample_lock().acquire(&path).expect("acquire");

        assert!(!remove_lock_if_task(&path, "T9-999").expect("mismatch is no-op"));
        assert!(path.exists());

        assert!(remove_lock_if_task(&path, "T1-001").expect("matching removal"));
        assert!(!path.exists());

        // Removing again (or a never-created lock) is success, not an error.
        assert!(!remove_lock_if_task(&path, "T1-001").expect("idempotent"));
        remove_lock(&path).expect("unconditional removal is idempotent");

        let _ = fs::remove_dir_all(dir);
    }
}
