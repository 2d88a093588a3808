//! Worker pid metadata records and the derived active-pid registry.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StateError;
use crate::process::pid_alive_str;
use crate::record::{read_field, write_atomic, write_pairs_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PidMeta {
    pub pid: String,
    pub task_id: String,
    pub owner: String,
    pub scope: String,
    pub worktree: String,
    pub started_at: String,
    pub launch_backend: String,
    pub launch_label: String,
    pub tmux_session: String,
    pub log_file: String,
    pub trigger: String,
}

impl PidMeta {
    pub fn pairs(&self) -> Vec<(String, String)> {
        vec![
            ("pid".to_string(), self.pid.clone()),
            ("task_id".to_string(), self.task_id.clone()),
            ("owner".to_string(), self.owner.clone()),
            ("scope".to_string(), self.scope.clone()),
            ("worktree".to_string(), self.worktree.clone()),
            ("started_at".to_string(), self.started_at.clone()),
            ("launch_backend".to_string(), self.launch_backend.clone()),
            ("launch_label".to_string(), self.launch_label.clone()),
            ("tmux_session".to_string(), self.tmux_session.clone()),
            ("log_file".to_string(), self.log_file.clone()),
            ("trigger".to_string(), self.trigger.clone()),
        ]
    }

    /// Atomic create-then-rename write. A directory squatting on the pid
    /// path is a distinct, tested failure: the rename would not replace it.
    pub fn write(&self, path: &Path) -> Result<(), StateError> {
        if path.is_dir() {
            return Err(StateError::PidMetaPathOccupied {
                path: path.to_path_buf(),
            });
        }
        write_pairs_atomic(path, &self.pairs())
    }

    pub fn load(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        Some(Self {
            pid: read_field(path, "pid"),
            task_id: read_field(path, "task_id"),
            owner: read_field(path, "owner"),
            scope: read_field(path, "scope"),
            worktree: read_field(path, "worktree"),
            started_at: read_field(path, "started_at"),
            launch_backend: read_field(path, "launch_backend"),
            launch_label: read_field(path, "launch_label"),
            tmux_session: read_field(path, "tmux_session"),
            log_file: read_field(path, "log_file"),
            trigger: read_field(path, "trigger"),
        })
    }

    pub fn pid_alive(&self) -> bool {
        pid_alive_str(&self.pid)
    }
}

/// One inventory row: the record plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidInventoryRow {
    pub meta: PidMeta,
    pub path: PathBuf,
    /// `task_id`, or `PIDONLY:<stem>` for records missing one.
    pub key: String,
}

/// List every `*.pid` record under the orchestrator dir, sorted by file name.
/// Missing directory yields an empty inventory.
pub fn load_pid_inventory(orch_dir: &Path) -> Vec<PidInventoryRow> {
    let entries = match fs::read_dir(orch_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "pid"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| {
            let meta = PidMeta::load(&path)?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = if meta.task_id.is_empty() {
                format!("PIDONLY:{stem}")
            } else {
                meta.task_id.clone()
            };
            Some(PidInventoryRow { meta, path, key })
        })
        .collect()
}

/// Rebuild the derived `active_pids.tsv` snapshot. Non-authoritative; callers
/// refresh it on demand and tolerate write failures upstream.
pub fn refresh_registry(orch_dir: &Path, registry_path: &Path) -> Result<usize, StateError> {
    let rows = load_pid_inventory(orch_dir);
    let mut body = String::from("task_id\towner\tscope\tpid\talive\tbackend\tworktree\tlog_file\n");
    for row in &rows {
        let alive = if row.meta.pid_alive() { "1" } else { "0" };
        body.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            row.meta.task_id,
            row.meta.owner,
            row.meta.scope,
            row.meta.pid,
            alive,
            row.meta.launch_backend,
            row.meta.worktree,
            row.meta.log_file,
        ));
    }
    write_atomic(registry_path, &body)?;
    Ok(rows.len())
}

/// Remove a pid record. Missing file is success.
pub fn remove_pid_meta(path: &Path) -> Result<(), StateError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StateError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
