//! Agent- and operator-facing task commands: new, scaffold-specs, update,
//! lock, unlock, heartbeat.

use teams_board::{Board, SpecIndex, SpecStatus};
use teams_core::types::{TaskId, TaskStatus};
use teams_state::lock::{remove_lock, ScopeLock};
use teams_state::record::read_field;
use teams_state::updates::append_update_best_effort;

use crate::error::EngineError;
use crate::session::Session;

/// `task new <task_id> [--deps ...] <summary>`: board row plus scaffolded
/// spec in one step.
pub fn task_new(
    session: &Session,
    task_id: &str,
    summary: &str,
    deps: &[String],
) -> Result<(), EngineError> {
    let ctx = &session.ctx;
    let id = TaskId::new(task_id);
    if !id.is_canonical() {
        return Err(EngineError::Rejected(format!(
            "invalid task id {task_id}: expected T<digits>-<digits>"
        )));
    }
    if summary.trim().is_empty() {
        return Err(EngineError::Rejected("summary must not be empty".to_string()));
    }

    let mut board = Board::open_or_create(&ctx.todo_file, &ctx.todo)?;
    board.append_row(task_id, summary, "", deps, TaskStatus::Todo)?;

    let spec_index = SpecIndex::new(&session.checkout.root);
    match spec_index.scaffold(task_id, summary, false) {
        Ok(path) => println!("Created task {task_id} with spec {}", path.display()),
        Err(teams_board::SpecError::AlreadyExists { path }) => {
            println!("Created task {task_id}; spec already present at {}", path.display());
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// `task scaffold-specs`: create (or with `--force` rewrite) spec files for
/// board rows that lack a valid one.
pub fn scaffold_specs(
    session: &Session,
    only_task: Option<&str>,
    dry_run: bool,
    force: bool,
) -> Result<usize, EngineError> {
    let ctx = &session.ctx;
    let board = Board::open_or_create(&ctx.todo_file, &ctx.todo)?;
    let spec_index = SpecIndex::new(&session.checkout.root);

    let mut written = 0;
    for row in board.list_tasks() {
        if only_task.is_some_and(|t| t != row.id) {
            continue;
        }
        let status = spec_index.validate(&row.id);
        let needs = match status {
            SpecStatus::Missing => true,
            SpecStatus::Invalid { .. } => force,
            SpecStatus::Valid { .. } => false,
        };
        if !needs {
            continue;
        }
        if dry_run {
            println!("[DRY-RUN] would scaffold {}", SpecIndex::rel_path(&row.id).display());
            continue;
        }
        let path = spec_index.scaffold(&row.id, &row.title, force)?;
        println!("Scaffolded {}", path.display());
        written += 1;
    }
    if let Some(task) = only_task {
        if !board.list_tasks().iter().any(|row| row.id == task) {
            return Err(EngineError::NotFound(format!("task id not on board: {task}")));
        }
    }
    Ok(written)
}

/// `task update <agent> <task_id> <status> <summary>`: board flip plus a
/// durable update-log entry. Status must be canonical or a done keyword.
pub fn task_update(
    session: &Session,
    agent: &str,
    task_id: &str,
    status: &str,
    summary: &str,
) -> Result<(), EngineError> {
    let ctx = &session.ctx;
    let canonical = TaskStatus::parse(status).is_some();
    let done_spelling = TaskStatus::is_done_keyword(status, &ctx.todo.done_keywords);
    if !canonical && !done_spelling {
        return Err(EngineError::Rejected(format!("invalid status value: {status}")));
    }

    let mut board = Board::open(&ctx.todo_file, &ctx.todo)?;
    board.update_status(task_id, status.trim())?;
    append_update_best_effort(&ctx.updates_file, agent, task_id, status.trim(), summary);
    println!("Updated {task_id} to {status}");
    Ok(())
}

/// `task lock <agent> <scope> [task_id]`: manual scope acquisition for work
/// outside the scheduler.
pub fn task_lock(
    session: &Session,
    agent: &str,
    scope: &str,
    task_id: Option<&str>,
) -> Result<(), EngineError> {
    let lock = ScopeLock::new(agent, scope, task_id.unwrap_or_default(), "", "");
    lock.acquire(&session.ctx.lock_path(scope))?;
    println!("Locked scope {scope} for {agent}");
    Ok(())
}

/// `task unlock <agent> <scope>`: release a lock we own.
pub fn task_unlock(session: &Session, agent: &str, scope: &str) -> Result<(), EngineError> {
    let path = session.ctx.lock_path(scope);
    if !path.exists() {
        return Err(EngineError::NotFound(format!("no lock for scope {scope}")));
    }
    let owner = read_field(&path, "owner");
    if owner != agent {
        return Err(EngineError::StateInvariant(format!(
            "lock for scope {scope} is owned by {owner}, not {agent}"
        )));
    }
    remove_lock(&path)?;
    println!("Unlocked scope {scope}");
    Ok(())
}

/// `task heartbeat <agent> <scope>`: refresh the lock's heartbeat field.
pub fn task_heartbeat(session: &Session, agent: &str, scope: &str) -> Result<(), EngineError> {
    let path = session.ctx.lock_path(scope);
    if !path.exists() {
        return Err(EngineError::NotFound(format!("no lock for scope {scope}")));
    }
    let owner = read_field(&path, "owner");
    if owner != agent {
        return Err(EngineError::StateInvariant(format!(
            "lock for scope {scope} is owned by {owner}, not {agent}"
        )));
    }
    ScopeLock::heartbeat(&path)?;
    println!("Heartbeat recorded for scope {scope}");
    Ok(())
}
