//! Convergence paths: worker-exit auto-cleanup and operator stop commands.
//!
//! Two distinct rollback policies live here on purpose: the worker-exit
//! watcher never regresses a DONE row, while operator-initiated `task stop`
//! resets any selected row to TODO, DONE included.

use std::process::Command;
use std::time::Duration;

use teams_board::Board;
use teams_core::types::{owner_key, TaskId, TaskStatus};
use teams_git::repo::branch_exists;
use teams_git::worktree::{branch_name, WorktreeManager};
use teams_state::lock::remove_lock_if_task;
use teams_state::pidmeta::{remove_pid_meta, PidMeta};
use teams_state::process::terminate_with_grace;
use teams_state::updates::append_update_best_effort;

use crate::error::EngineError;
use crate::inventory::{load_runtime_records, RuntimeRecord};
use crate::scheduler::ACTOR;
use crate::session::Session;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Which rows a cleanup pass may regress to TODO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Worker-exit path: a DONE row stays DONE.
    SkipDone,
    /// Operator stop: any row goes back to TODO.
    Force,
}

/// `task auto-cleanup-exit <task_id> <expected_pid>`: idempotent convergence
/// after a worker exit. A missing record or a pid mismatch means another
/// actor already converged this task, which is success, not an error.
pub fn auto_cleanup_exit(
    session: &Session,
    task_id: &str,
    expected_pid: u32,
    reason: &str,
) -> Result<(), EngineError> {
    let ctx = &session.ctx;
    let pid_meta_path = ctx.pid_meta_path(&TaskId::new(task_id));

    let Some(meta) = PidMeta::load(&pid_meta_path) else {
        println!("cleanup skipped: no pid metadata for {task_id}");
        return Ok(());
    };
    if meta.pid != expected_pid.to_string() {
        println!(
            "cleanup skipped: pid metadata for {task_id} records pid {}, expected {expected_pid}",
            meta.pid
        );
        return Ok(());
    }

    kill_session_artifacts(&meta);
    cleanup_task_state(session, &meta, reason, RollbackPolicy::SkipDone);
    Ok(())
}

/// Shared teardown: board rollback (policy-gated), lock, worktree, branch,
/// pid metadata. Every step is idempotent and tolerant of prior partial
/// cleanup; failures are reported and do not stop later steps.
pub fn cleanup_task_state(
    session: &Session,
    meta: &PidMeta,
    reason: &str,
    policy: RollbackPolicy,
) {
    let ctx = &session.ctx;
    let task_id = meta.task_id.as_str();

    match Board::open_or_create(&ctx.todo_file, &ctx.todo) {
        Ok(mut board) => {
            let status = board
                .find_task(task_id)
                .map(|row| row.status)
                .unwrap_or_default();
            let is_done = TaskStatus::is_done_keyword(&status, &ctx.todo.done_keywords);
            if is_done && policy == RollbackPolicy::SkipDone {
                println!("TODO rollback skipped: task status is DONE");
            } else if !status.is_empty() && status != "TODO" {
                match board.update_status(task_id, "TODO") {
                    Ok(()) => append_update_best_effort(
                        &ctx.updates_file,
                        &meta.owner,
                        task_id,
                        "TODO",
                        &format!("Stopped by {ACTOR}: {reason}"),
                    ),
                    Err(err) => eprintln!("cleanup: board rollback failed: {err}"),
                }
            }
        }
        Err(err) => eprintln!("cleanup: board unavailable: {err}"),
    }

    if !meta.scope.is_empty() {
        match remove_lock_if_task(&ctx.lock_path(&meta.scope), task_id) {
            Ok(true) => {}
            Ok(false) => {}
            Err(err) => eprintln!("cleanup: lock removal failed: {err}"),
        }
    }

    remove_task_worktree(session, &meta.owner, task_id, &meta.worktree);

    if let Err(err) = remove_pid_meta(&ctx.pid_meta_path(&TaskId::new(task_id))) {
        eprintln!("cleanup: pid metadata removal failed: {err}");
    }
}

fn remove_task_worktree(session: &Session, owner: &str, task_id: &str, recorded_worktree: &str) {
    if owner.is_empty() && recorded_worktree.is_empty() {
        return;
    }
    let branch = branch_name(owner, task_id);
    let manager = WorktreeManager::new(session.git.clone());

    let worktree_path = if recorded_worktree.is_empty() {
        manager.worktree_path(
            &session.ctx.worktree_parent,
            &session.ctx.repo_name,
            owner,
            task_id,
        )
    } else {
        recorded_worktree.into()
    };

    if let Err(err) = manager.remove(&session.primary, &worktree_path, &branch) {
        eprintln!("cleanup: worktree removal failed: {err}");
        // The branch may still be removable even when the worktree was not.
        if let Ok(true) = branch_exists(&session.primary, &session.git, &branch) {
            let _ = session
                .git
                .run_ok(&session.primary.root, ["branch", "-D", &branch]);
        }
    }
}

fn kill_session_artifacts(meta: &PidMeta) {
    if !meta.tmux_session.is_empty() {
        let _ = Command::new("tmux")
            .args(["kill-session", "-t", &meta.tmux_session])
            .output();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopSelector {
    Task(String),
    Owner(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub selected: Vec<String>,
    pub applied: bool,
}

/// `task stop`: preview without `--apply`; with it, SIGTERM → grace → SIGKILL
/// and full state cleanup. Operator-initiated, so DONE rows are reset too.
pub fn run_stop(
    session: &Session,
    selector: &StopSelector,
    reason: &str,
    apply: bool,
) -> Result<StopReport, EngineError> {
    let records = load_runtime_records(&session.ctx.orch_dir, &session.ctx.lock_dir);
    let selected: Vec<RuntimeRecord> = records
        .into_iter()
        .filter(|record| match selector {
            StopSelector::Task(task) => record.task_id == *task,
            StopSelector::Owner(owner) => owner_key(&record.owner) == owner_key(owner),
            StopSelector::All => true,
        })
        .collect();

    for record in &selected {
        println!(
            "{} {} owner={} scope={} state={} pid={}",
            if apply { "[STOP]" } else { "[WOULD STOP]" },
            record.task_id,
            record.owner,
            record.scope,
            record.state.as_str(),
            record.pid.map(|p| p.to_string()).unwrap_or_default(),
        );
    }
    if !apply {
        println!("preview only; re-run with --apply to stop");
        return Ok(StopReport {
            selected: selected.into_iter().map(|r| r.task_id).collect(),
            applied: false,
        });
    }

    for record in &selected {
        if let Some(pid) = record.pid {
            if record.pid_alive && !terminate_with_grace(pid, STOP_GRACE) {
                eprintln!("stop: pid {pid} survived SIGKILL, continuing cleanup");
            }
        }
        let meta = record_meta(record);
        kill_session_artifacts(&meta);
        cleanup_task_state(session, &meta, reason, RollbackPolicy::Force);
    }

    Ok(StopReport {
        selected: selected.into_iter().map(|r| r.task_id).collect(),
        applied: true,
    })
}

/// `task cleanup-stale`: converge records whose worker is already gone.
/// Never touches a live worker, and never regresses DONE (nothing here was
/// operator-initiated against a specific task).
pub fn run_cleanup_stale(
    session: &Session,
    reason: &str,
    apply: bool,
) -> Result<StopReport, EngineError> {
    let records = load_runtime_records(&session.ctx.orch_dir, &session.ctx.lock_dir);
    let selected: Vec<RuntimeRecord> = records
        .into_iter()
        .filter(|record| record.stale && !record.pid_alive)
        .collect();

    for record in &selected {
        println!(
            "{} {} state={} lock={} pid_file={}",
            if apply { "[CLEAN]" } else { "[WOULD CLEAN]" },
            record.task_id,
            record.state.as_str(),
            record.lock_file.as_deref().unwrap_or("-"),
            record.pid_file.as_deref().unwrap_or("-"),
        );
    }
    if !apply {
        println!("preview only; re-run with --apply to clean");
        return Ok(StopReport {
            selected: selected.into_iter().map(|r| r.task_id).collect(),
            applied: false,
        });
    }

    for record in &selected {
        let meta = record_meta(record);
        kill_session_artifacts(&meta);
        cleanup_task_state(session, &meta, reason, RollbackPolicy::SkipDone);
    }

    Ok(StopReport {
        selected: selected.into_iter().map(|r| r.task_id).collect(),
        applied: true,
    })
}

/// `task emergency-stop`: stop everything and release the scheduler mutex.
pub fn run_emergency_stop(session: &Session, reason: &str) -> Result<StopReport, EngineError> {
    let report = run_stop(session, &StopSelector::All, reason, true)?;
    let run_lock = session.ctx.run_lock_dir();
    if run_lock.exists() {
        let _ = std::fs::remove_file(run_lock.join("pid"));
        let _ = std::fs::remove_dir(&run_lock);
    }
    println!("Emergency stop complete: {} workers", report.selected.len());
    Ok(report)
}

/// Rebuild a PidMeta view from a classified record so lock-only records
/// (no pid file) flow through the same cleanup.
fn record_meta(record: &RuntimeRecord) -> PidMeta {
    PidMeta {
        pid: record.pid.map(|p| p.to_string()).unwrap_or_default(),
        task_id: record.task_id.clone(),
        owner: record.owner.clone(),
        scope: record.scope.clone(),
        worktree: record.worktree.clone().unwrap_or_default(),
        tmux_session: record.tmux_session.clone().unwrap_or_default(),
        launch_backend: record.launch_backend.clone().unwrap_or_default(),
        log_file: record.log_file.clone().unwrap_or_default(),
        ..PidMeta::default()
    }
}
