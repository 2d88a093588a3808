//! Runtime record classification.
//!
//! Joins the pid and lock inventories per task and names the combined state.
//! The active set ({RUNNING, LOCKED, FINALIZING}) feeds the readiness
//! evaluator; the stale set feeds `task cleanup-stale`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use teams_state::pidmeta::{load_pid_inventory, PidInventoryRow};
use teams_state::record::read_field;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeState {
    Running,
    Locked,
    Finalizing,
    LockStale,
    FinalizingExited,
    OrphanLock,
    OrphanPid,
    MissingWorktree,
    Unknown,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Running => "RUNNING",
            RuntimeState::Locked => "LOCKED",
            RuntimeState::Finalizing => "FINALIZING",
            RuntimeState::LockStale => "LOCK_STALE",
            RuntimeState::FinalizingExited => "FINALIZING_EXITED",
            RuntimeState::OrphanLock => "ORPHAN_LOCK",
            RuntimeState::OrphanPid => "ORPHAN_PID",
            RuntimeState::MissingWorktree => "MISSING_WORKTREE",
            RuntimeState::Unknown => "UNKNOWN",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RuntimeState::Running | RuntimeState::Locked | RuntimeState::Finalizing
        )
    }

    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            RuntimeState::LockStale
                | RuntimeState::FinalizingExited
                | RuntimeState::OrphanLock
                | RuntimeState::OrphanPid
                | RuntimeState::MissingWorktree
        )
    }
}

/// One scope lock file, as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInventoryRow {
    pub key: String,
    pub task_id: String,
    pub owner: String,
    pub scope: String,
    pub worktree: String,
    pub lock_file: PathBuf,
}

pub fn load_lock_inventory(lock_dir: &Path) -> Vec<LockInventoryRow> {
    let entries = match fs::read_dir(lock_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "lock"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let task_id = read_field(&path, "task_id");
            let owner = read_field(&path, "owner");
            let scope = read_field(&path, "scope");
            let worktree = read_field(&path, "worktree");
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = if task_id.is_empty() {
                format!("LOCKONLY:{scope}:{owner}:{name}")
            } else {
                task_id.clone()
            };
            LockInventoryRow {
                key,
                task_id,
                owner,
                scope,
                worktree,
                lock_file: path,
            }
        })
        .collect()
}

/// A per-task join of pid metadata, scope lock, and worktree existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeRecord {
    pub key: String,
    pub task_id: String,
    pub owner: String,
    pub scope: String,
    pub state: RuntimeState,
    pub pid: Option<u32>,
    pub pid_alive: bool,
    pub pid_file: Option<String>,
    pub lock_file: Option<String>,
    pub worktree: Option<String>,
    pub tmux_session: Option<String>,
    pub launch_backend: Option<String>,
    pub log_file: Option<String>,
    pub worktree_exists: bool,
    pub stale: bool,
}

pub fn classify_records(
    pid_rows: &[PidInventoryRow],
    lock_rows: &[LockInventoryRow],
) -> Vec<RuntimeRecord> {
    #[derive(Default)]
    struct Combined<'a> {
        pid: Option<&'a PidInventoryRow>,
        lock: Option<&'a LockInventoryRow>,
    }

    let mut by_key: BTreeMap<String, Combined<'_>> = BTreeMap::new();
    for row in pid_rows {
        by_key.entry(row.key.clone()).or_default().pid = Some(row);
    }
    for row in lock_rows {
        by_key.entry(row.key.clone()).or_default().lock = Some(row);
    }

    by_key
        .into_iter()
        .map(|(key, combined)| {
            let pid_row = combined.pid;
            let lock_row = combined.lock;

            let task_id = pid_row
                .map(|r| r.meta.task_id.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| lock_row.map(|r| r.task_id.clone()).filter(|s| !s.is_empty()))
                .unwrap_or_else(|| key.clone());
            let owner = pid_row
                .map(|r| r.meta.owner.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| lock_row.map(|r| r.owner.clone()))
                .unwrap_or_default();
            let scope = pid_row
                .map(|r| r.meta.scope.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| lock_row.map(|r| r.scope.clone()))
                .unwrap_or_default();
            let worktree = pid_row
                .map(|r| r.meta.worktree.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| lock_row.map(|r| r.worktree.clone()).filter(|s| !s.is_empty()));

            let has_pid_file = pid_row.is_some();
            let has_lock_file = lock_row.is_some();
            let pid_alive = pid_row.is_some_and(|r| r.meta.pid_alive());
            let worktree_exists = worktree
                .as_deref()
                .is_some_and(|wt| Path::new(wt).exists());

            let state = match (&worktree, worktree_exists) {
                (Some(_), false) => {
                    if has_lock_file && !has_pid_file {
                        RuntimeState::OrphanLock
                    } else if has_pid_file && !has_lock_file {
                        RuntimeState::OrphanPid
                    } else {
                        RuntimeState::MissingWorktree
                    }
                }
                _ => {
                    if has_pid_file && has_lock_file && pid_alive {
                        RuntimeState::Running
                    } else if has_pid_file && has_lock_file {
                        RuntimeState::LockStale
                    } else if has_pid_file && pid_alive {
                        RuntimeState::Finalizing
                    } else if has_pid_file {
                        RuntimeState::FinalizingExited
                    } else if has_lock_file {
                        // Lock-only is valid for manual work in a dedicated
                        // worktree.
                        RuntimeState::Locked
                    } else {
                        RuntimeState::Unknown
                    }
                }
            };

            RuntimeRecord {
                key,
                task_id,
                owner,
                scope,
                state,
                pid: pid_row.and_then(|r| r.meta.pid.parse().ok()),
                pid_alive,
                pid_file: pid_row.map(|r| r.path.display().to_string()),
                lock_file: lock_row.map(|r| r.lock_file.display().to_string()),
                worktree,
                tmux_session: pid_row
                    .map(|r| r.meta.tmux_session.clone())
                    .filter(|s| !s.is_empty()),
                launch_backend: pid_row
                    .map(|r| r.meta.launch_backend.clone())
                    .filter(|s| !s.is_empty()),
                log_file: pid_row
                    .map(|r| r.meta.log_file.clone())
                    .filter(|s| !s.is_empty()),
                worktree_exists,
                stale: state.is_stale(),
            }
        })
        .collect()
}

pub fn load_runtime_records(orch_dir: &Path, lock_dir: &Path) -> Vec<RuntimeRecord> {
    let pid_rows = load_pid_inventory(orch_dir);
    let lock_rows = load_lock_inventory(lock_dir);
    classify_records(&pid_rows, &lock_rows)
}

pub fn summarize(records: &[RuntimeRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.state.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}
