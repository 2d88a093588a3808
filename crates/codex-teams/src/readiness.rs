//! Readiness evaluation: board rows against runtime signals.
//!
//! Pure function of a snapshot taken while the run lock is held. Exclusion
//! reasons are evaluated in fixed priority order and the first match wins,
//! so repeated evaluation over identical inputs is deterministic.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use teams_board::{Board, SpecIndex, SpecStatus};
use teams_core::context::Context;
use teams_core::types::owner_key;

use crate::error::EngineError;
use crate::inventory::{LockInventoryRow, RuntimeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    UnmappedOwner,
    ActiveWorker,
    ActiveLock,
    ActiveSignalConflict,
    OwnerBusy,
    MissingTaskSpec,
    InvalidTaskSpec,
    DepsNotReady,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::UnmappedOwner => "unmapped_owner",
            ExclusionReason::ActiveWorker => "active_worker",
            ExclusionReason::ActiveLock => "active_lock",
            ExclusionReason::ActiveSignalConflict => "active_signal_conflict",
            ExclusionReason::OwnerBusy => "owner_busy",
            ExclusionReason::MissingTaskSpec => "missing_task_spec",
            ExclusionReason::InvalidTaskSpec => "invalid_task_spec",
            ExclusionReason::DepsNotReady => "deps_not_ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyTask {
    pub task_id: String,
    pub title: String,
    pub owner: String,
    pub owner_key: String,
    pub scope: String,
    pub deps: String,
    pub status: String,
    pub spec_rel_path: String,
    pub goal_summary: String,
    pub in_scope_summary: String,
    pub acceptance_summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedTask {
    pub task_id: String,
    pub title: String,
    pub owner: String,
    pub scope: String,
    pub deps: String,
    pub status: String,
    pub reason: ExclusionReason,
    /// Which signal produced the exclusion: `pid`, `lock`, or `scheduler`.
    pub source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningLock {
    pub task_id: String,
    pub owner: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessSnapshot {
    pub trigger: String,
    pub max_start: u32,
    pub ready_tasks: Vec<ReadyTask>,
    pub excluded_tasks: Vec<ExcludedTask>,
    pub running_locks: Vec<RunningLock>,
}

struct ActiveSignal {
    reason: ExclusionReason,
    source: &'static str,
}

pub fn evaluate(
    ctx: &Context,
    board: &Board,
    spec_index: &SpecIndex,
    records: &[RuntimeRecord],
    lock_rows: &[LockInventoryRow],
    trigger: &str,
    max_start_override: Option<u32>,
) -> Result<ReadinessSnapshot, EngineError> {
    let status_index = board.status_index();
    let gates = board.gates().map_err(EngineError::from)?;

    let (active_by_task, active_owner_keys) = active_maps(records);
    let conflicts = signal_conflicts(records, lock_rows);

    let running_locks = lock_rows
        .iter()
        .map(|lock| RunningLock {
            task_id: lock.task_id.clone(),
            owner: lock.owner.clone(),
            scope: lock.scope.clone(),
        })
        .collect();

    let max_start = max_start_override.unwrap_or(ctx.runtime.max_start);

    let mut ready_tasks = Vec::new();
    let mut excluded_tasks = Vec::new();
    let mut scheduled_owner_keys: BTreeSet<String> = BTreeSet::new();

    for row in board.list_tasks() {
        if row.status.trim() != "TODO" {
            continue;
        }

        let key = owner_key(&row.owner);
        let scope = ctx
            .owners_by_key
            .get(&key)
            .cloned()
            .unwrap_or_default();

        let exclude = |reason: ExclusionReason, source: &'static str,
                       excluded: &mut Vec<ExcludedTask>| {
            excluded.push(ExcludedTask {
                task_id: row.id.clone(),
                title: row.title.clone(),
                owner: row.owner.clone(),
                scope: scope.clone(),
                deps: row.deps.clone(),
                status: row.status.clone(),
                reason,
                source,
            });
        };

        if scope.is_empty() {
            exclude(ExclusionReason::UnmappedOwner, "scheduler", &mut excluded_tasks);
            continue;
        }

        if let Some(signal) = active_by_task.get(&row.id) {
            exclude(signal.reason, signal.source, &mut excluded_tasks);
            continue;
        }

        if conflicts.contains(&row.id) {
            exclude(
                ExclusionReason::ActiveSignalConflict,
                "both",
                &mut excluded_tasks,
            );
            continue;
        }

        if active_owner_keys.contains(&key) || scheduled_owner_keys.contains(&key) {
            exclude(ExclusionReason::OwnerBusy, "scheduler", &mut excluded_tasks);
            continue;
        }

        let spec = spec_index.validate(&row.id);
        let (goal, in_scope, acceptance) = match spec {
            SpecStatus::Missing => {
                exclude(
                    ExclusionReason::MissingTaskSpec,
                    "scheduler",
                    &mut excluded_tasks,
                );
                continue;
            }
            SpecStatus::Invalid { .. } => {
                exclude(
                    ExclusionReason::InvalidTaskSpec,
                    "scheduler",
                    &mut excluded_tasks,
                );
                continue;
            }
            SpecStatus::Valid {
                goal_summary,
                in_scope_summary,
                acceptance_summary,
            } => (goal_summary, in_scope_summary, acceptance_summary),
        };

        if !board.deps_ready(&row.deps, &status_index, &gates) {
            exclude(ExclusionReason::DepsNotReady, "scheduler", &mut excluded_tasks);
            continue;
        }

        scheduled_owner_keys.insert(key.clone());
        ready_tasks.push(ReadyTask {
            task_id: row.id.clone(),
            title: row.title.clone(),
            owner: row.owner.clone(),
            owner_key: key,
            scope,
            deps: row.deps.clone(),
            status: row.status.clone(),
            spec_rel_path: SpecIndex::rel_path(&row.id).display().to_string(),
            goal_summary: goal,
            in_scope_summary: in_scope,
            acceptance_summary: acceptance,
        });

        if max_start > 0 && ready_tasks.len() >= max_start as usize {
            break;
        }
    }

    Ok(ReadinessSnapshot {
        trigger: trigger.to_string(),
        max_start,
        ready_tasks,
        excluded_tasks,
        running_locks,
    })
}

/// `task_id -> strongest active signal` plus the owner keys of every active
/// record. A live pid outranks a bare lock.
fn active_maps(
    records: &[RuntimeRecord],
) -> (BTreeMap<String, ActiveSignal>, BTreeSet<String>) {
    let mut active_by_task = BTreeMap::new();
    let mut active_owner_keys = BTreeSet::new();

    for record in records {
        if record.task_id.is_empty() || !record.state.is_active() {
            continue;
        }
        if !record.owner.is_empty() {
            active_owner_keys.insert(owner_key(&record.owner));
        }

        if record.pid_alive {
            active_by_task.insert(
                record.task_id.clone(),
                ActiveSignal {
                    reason: ExclusionReason::ActiveWorker,
                    source: "pid",
                },
            );
        } else if record.lock_file.is_some() {
            active_by_task
                .entry(record.task_id.clone())
                .or_insert(ActiveSignal {
                    reason: ExclusionReason::ActiveLock,
                    source: "lock",
                });
        }
    }

    (active_by_task, active_owner_keys)
}

/// Tasks whose scope carries disagreeing signals: the scope lock is bound to
/// one task while pid metadata on the same scope names a different one. The
/// per-row exclusion chain consults this only after the row's own signals,
/// so in practice it catches the side whose own signal has already decayed.
fn signal_conflicts(
    records: &[RuntimeRecord],
    lock_rows: &[LockInventoryRow],
) -> BTreeSet<String> {
    let mut conflicts = BTreeSet::new();
    for lock in lock_rows {
        if lock.task_id.is_empty() || lock.scope.is_empty() {
            continue;
        }
        for record in records {
            if record.pid_file.is_some()
                && record.scope == lock.scope
                && !record.task_id.is_empty()
                && record.task_id != lock.task_id
            {
                conflicts.insert(lock.task_id.clone());
                conflicts.insert(record.task_id.clone());
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use teams_board::{Board, SpecIndex};
    use teams_core::config::OrchestratorConfig;
    use teams_core::context::{default_config_path, Context};
    use teams_state::pidmeta::{load_pid_inventory, PidMeta};

    use super::{evaluate, ExclusionReason};
    use crate::inventory::{classify_records, load_lock_inventory};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("codex-teams-ready-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    struct Fixture {
        repo: PathBuf,
        ctx: Context,
    }

    impl Fixture {
        fn new(prefix: &str) -> Self {
            let repo = unique_temp_dir(prefix);
            let config = OrchestratorConfig::default();
            let ctx = Context::resolve_with(
                &repo,
                &config,
                &default_config_path(&repo),
                None,
                None,
            );
            fs::create_dir_all(&ctx.orch_dir).expect("orch dir");
            fs::create_dir_all(&ctx.lock_dir).expect("lock dir");
            Self { repo, ctx }
        }

        fn write_board(&self, rows: &[(&str, &str, &str, &str, &str)]) {
            let mut body = String::from(
                "# TODO Board\n\n| ID | Title | Owner | Deps | Notes | Status |\n|---|---|---|---|---|---|\n",
            );
            for (id, title, owner, deps, status) in rows {
                body.push_str(&format!("| {id} | {title} | {owner} | {deps} | | {status} |\n"));
            }
            fs::write(&self.ctx.todo_file, body).expect("write board");
        }

        fn write_spec(&self, task_id: &str) {
            SpecIndex::new(&self.repo)
                .scaffold(task_id, "test task", true)
                .expect("scaffold spec");
        }

        fn write_lock(&self, scope: &str, owner: &str, task: &str, worktree: &Path) {
            fs::write(
                self.ctx.lock_path(scope),
                format!(
                    "owner={owner}\nscope={scope}\ntask_id={task}\nworktree={}\n",
                    worktree.display()
                ),
            )
            .expect("write lock");
        }

        fn write_pid(&self, scope: &str, owner: &str, task: &str, pid: &str, worktree: &Path) {
            let meta = PidMeta {
                pid: pid.to_string(),
                task_id: task.to_string(),
                owner: owner.to_string(),
                scope: scope.to_string(),
                worktree: worktree.display().to_string(),
                launch_backend: "tmux".to_string(),
                ..PidMeta::default()
            };
            meta.write(&self.ctx.orch_dir.join(format!("{}.pid", task.to_lowercase())))
                .expect("write pid meta");
        }

        fn snapshot(&self) -> super::ReadinessSnapshot {
            let board = Board::open(&self.ctx.todo_file, &self.ctx.todo).expect("open board");
            let spec_index = SpecIndex::new(&self.repo);
            let lock_rows = load_lock_inventory(&self.ctx.lock_dir);
            let records =
                classify_records(&load_pid_inventory(&self.ctx.orch_dir), &lock_rows);
            evaluate(
                &self.ctx,
                &board,
                &spec_index,
                &records,
                &lock_rows,
                "manual",
                None,
            )
            .expect("evaluate")
        }
    }

    #[test]
    fn excludes_active_busy_and_gated_rows_while_stale_rows_stay_ready() {
        let fx = Fixture::new("matrix");
        fx.write_board(&[
            ("T1-001", "active task", "AgentA", "-", "TODO"),
            ("T1-002", "same owner", "AgentA", "-", "TODO"),
            ("T1-003", "deps blocked", "AgentB", "T9-999", "TODO"),
            ("T1-004", "ready task", "AgentC", "-", "TODO"),
            ("T1-005", "stale metadata", "AgentD", "-", "TODO"),
        ]);
        for task in ["T1-001", "T1-002", "T1-003", "T1-004", "T1-005"] {
            fx.write_spec(task);
        }

        let live_wt = fx.repo.clone();
        let me = std::process::id().to_string();
        fx.write_lock("app-shell", "AgentA", "T1-001", &live_wt);
        fx.write_pid("app-shell", "AgentA", "T1-001", &me, &live_wt);

        // Dead pid + lock: LOCK_STALE, not active, so T1-005 stays ready.
        fx.write_lock("ui-popover", "AgentD", "T1-005", &live_wt);
        fx.write_pid("ui-popover", "AgentD", "T1-005", "99999999", &live_wt);

        let snapshot = fx.snapshot();
        let ready: Vec<_> = snapshot
            .ready_tasks
            .iter()
            .map(|t| t.task_id.as_str())
            .collect();
        assert!(ready.contains(&"T1-004"));
        assert!(ready.contains(&"T1-005"));

        let excluded: std::collections::BTreeMap<_, _> = snapshot
            .excluded_tasks
            .iter()
            .map(|t| (t.task_id.as_str(), t))
            .collect();
        assert_eq!(excluded["T1-001"].reason, ExclusionReason::ActiveWorker);
        assert_eq!(excluded["T1-001"].source, "pid");
        assert_eq!(excluded["T1-002"].reason, ExclusionReason::OwnerBusy);
        assert_eq!(excluded["T1-003"].reason, ExclusionReason::DepsNotReady);

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn lock_without_worker_excludes_as_active_lock() {
        let fx = Fixture::new("active-lock");
        fx.write_board(&[("T1-001", "locked", "AgentA", "-", "TODO")]);
        fx.write_spec("T1-001");
        fx.write_lock("app-shell", "AgentA", "T1-001", &fx.repo);

        let snapshot = fx.snapshot();
        assert!(snapshot.ready_tasks.is_empty());
        assert_eq!(
            snapshot.excluded_tasks[0].reason,
            ExclusionReason::ActiveLock
        );
        assert_eq!(snapshot.excluded_tasks[0].source, "lock");
        assert_eq!(snapshot.running_locks.len(), 1);

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn unmapped_owner_is_excluded_first() {
        let fx = Fixture::new("unmapped");
        fx.write_board(&[("T1-001", "nobody's task", "Stranger", "-", "TODO")]);
        fx.write_spec("T1-001");

        let snapshot = fx.snapshot();
        assert_eq!(
            snapshot.excluded_tasks[0].reason,
            ExclusionReason::UnmappedOwner
        );

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn spec_problems_split_into_missing_and_invalid() {
        let fx = Fixture::new("specs");
        fx.write_board(&[
            ("T1-001", "no spec", "AgentA", "-", "TODO"),
            ("T1-002", "bad spec", "AgentB", "-", "TODO"),
        ]);
        let spec_dir = fx.repo.join("tasks/specs");
        fs::create_dir_all(&spec_dir).expect("specs dir");
        fs::write(spec_dir.join("T1-002.md"), "## Goal\n\n## In Scope\n\nx\n")
            .expect("invalid spec");

        let snapshot = fx.snapshot();
        let excluded: std::collections::BTreeMap<_, _> = snapshot
            .excluded_tasks
            .iter()
            .map(|t| (t.task_id.as_str(), t.reason))
            .collect();
        assert_eq!(excluded["T1-001"], ExclusionReason::MissingTaskSpec);
        assert_eq!(excluded["T1-002"], ExclusionReason::InvalidTaskSpec);

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn conflicting_scope_signals_follow_the_priority_chain() {
        let fx = Fixture::new("conflict");
        fx.write_board(&[
            ("T1-001", "lock says me", "AgentA", "-", "TODO"),
            ("T1-002", "pid says me", "AgentB", "-", "TODO"),
        ]);
        fx.write_spec("T1-001");
        fx.write_spec("T1-002");

        // Same scope, disagreeing task bindings, and the worker already
        // exited: the lock-holding task still reads as active_lock (its own
        // signal wins first), while the dead-pid task has no signal of its
        // own left and surfaces the conflict.
        fx.write_lock("app-shell", "AgentA", "T1-001", &fx.repo);
        fx.write_pid("app-shell", "AgentB", "T1-002", "99999999", &fx.repo);

        let snapshot = fx.snapshot();
        let excluded: std::collections::BTreeMap<_, _> = snapshot
            .excluded_tasks
            .iter()
            .map(|t| (t.task_id.as_str(), (t.reason, t.source)))
            .collect();
        assert_eq!(
            excluded["T1-001"],
            (ExclusionReason::ActiveLock, "lock")
        );
        assert_eq!(
            excluded["T1-002"],
            (ExclusionReason::ActiveSignalConflict, "both")
        );

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn gate_deps_gate_readiness() {
        let fx = Fixture::new("gates");
        let mut body = String::from(
            "# TODO Board\n\nGate `G1 (DONE)` shipped. Gate `G2 (open)` pending.\n\n| ID | Title | Owner | Deps | Notes | Status |\n|---|---|---|---|---|---|\n",
        );
        body.push_str("| T1-001 | gate ok | AgentA | G1 | | TODO |\n");
        body.push_str("| T1-002 | gate blocked | AgentB | G2 | | TODO |\n");
        fs::write(&fx.ctx.todo_file, body).expect("write board");
        fx.write_spec("T1-001");
        fx.write_spec("T1-002");

        let snapshot = fx.snapshot();
        let ready: Vec<_> = snapshot
            .ready_tasks
            .iter()
            .map(|t| t.task_id.as_str())
            .collect();
        assert_eq!(ready, vec!["T1-001"]);
        assert_eq!(
            snapshot.excluded_tasks[0].reason,
            ExclusionReason::DepsNotReady
        );

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn max_start_truncates_the_ready_queue() {
        let fx = Fixture::new("maxstart");
        fx.write_board(&[
            ("T1-001", "a", "AgentA", "-", "TODO"),
            ("T1-002", "b", "AgentB", "-", "TODO"),
            ("T1-003", "c", "AgentC", "-", "TODO"),
        ]);
        for task in ["T1-001", "T1-002", "T1-003"] {
            fx.write_spec(task);
        }

        let board = Board::open(&fx.ctx.todo_file, &fx.ctx.todo).expect("open board");
        let spec_index = SpecIndex::new(&fx.repo);
        let snapshot = evaluate(
            &fx.ctx,
            &board,
            &spec_index,
            &[],
            &[],
            "manual",
            Some(2),
        )
        .expect("evaluate");
        assert_eq!(snapshot.ready_tasks.len(), 2);
        assert_eq!(snapshot.max_start, 2);

        let _ = fs::remove_dir_all(&fx.repo);
    }

    #[test]
    fn evaluation_is_deterministic_over_identical_inputs() {
        let fx = Fixture::new("deterministic");
        fx.write_board(&[
            ("T1-001", "a", "AgentA", "-", "TODO"),
            ("T1-002", "b", "AgentB", "T1-001", "TODO"),
        ]);
        fx.write_spec("T1-001");
        fx.write_spec("T1-002");

        let first = fx.snapshot();
        let second = fx.snapshot();
        assert_eq!(first, second);

        let _ = fs::remove_dir_all(&fx.repo);
    }
}
