//! The start pipeline: run lock, readiness snapshot, per-task start with
//! bounded rollback.
//!
//! A failed start attempt must leave state byte-equivalent to the
//! pre-attempt state: lock gone unless it pre-existed, worktree and branch
//! gone unless they pre-existed, board row back to TODO, and no spawned
//! worker process alive.

use std::path::PathBuf;

use teams_board::{Board, SpecIndex};
use teams_launch::backend::ResolvedBackend;
use teams_launch::{
    render_worker_prompt, resolve_backend, LaunchRequest, LaunchedWorker, Launcher,
    WorkerPromptInputs,
};
use teams_state::lock::{remove_lock, ScopeLock};
use teams_state::pidmeta::{refresh_registry, remove_pid_meta};
use teams_state::runlock::RunLockGuard;
use teams_state::updates::append_update_best_effort;
use teams_state::StateError;

use teams_git::repo::branch_exists;
use teams_git::worktree::{branch_name, EnsureOutcome, WorktreeManager};

use crate::error::EngineError;
use crate::inventory::{load_lock_inventory, load_runtime_records};
use crate::readiness::{evaluate, ReadinessSnapshot, ReadyTask};
use crate::session::Session;

pub const ACTOR: &str = "codex-teams";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub trigger: String,
    pub dry_run: bool,
    pub no_launch: bool,
    pub max_start: Option<u32>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            trigger: "manual".to_string(),
            dry_run: false,
            no_launch: false,
            max_start: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStartReport {
    pub snapshot: ReadinessSnapshot,
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub fn run_start(session: &Session, opts: &StartOptions) -> Result<RunStartReport, EngineError> {
    if !session.invoked_from_primary()? && !Session::worktree_run_allowed() {
        return Err(EngineError::MissingPrerequisite(format!(
            "run start must be invoked from the primary checkout (set {}=1 to override)",
            crate::session::ALLOW_WORKTREE_RUN_ENV
        )));
    }

    let no_launch = opts.no_launch || session.ctx.runtime.auto_no_launch;
    let launcher = Launcher::default();
    let backend = if no_launch || opts.dry_run {
        None
    } else {
        Some(
            resolve_backend(session.ctx.runtime.launch_backend, &launcher.tmux_bin).map_err(
                |err| {
                    EngineError::WorkerLaunch(format!("{err}; retry with --no-launch"))
                },
            )?,
        )
    };

    let run_lock = RunLockGuard::acquire(&session.ctx.run_lock_dir()).map_err(|err| match err {
        StateError::RunLockHeld { pid } => {
            EngineError::LockConflict(format!("scheduler already running (pid {pid})"))
        }
        other => EngineError::from(other),
    })?;

    let result = run_under_lock(session, opts, no_launch, backend, &launcher);
    run_lock.release();
    result
}

fn run_under_lock(
    session: &Session,
    opts: &StartOptions,
    no_launch: bool,
    backend: Option<ResolvedBackend>,
    launcher: &Launcher,
) -> Result<RunStartReport, EngineError> {
    let ctx = &session.ctx;
    let mut board = Board::open_or_create(&ctx.todo_file, &ctx.todo)?;
    let spec_index = SpecIndex::new(&session.primary.root);

    let lock_rows = load_lock_inventory(&ctx.lock_dir);
    let records = load_runtime_records(&ctx.orch_dir, &ctx.lock_dir);
    let snapshot = evaluate(
        ctx,
        &board,
        &spec_index,
        &records,
        &lock_rows,
        &opts.trigger,
        opts.max_start,
    )?;

    print_snapshot(&snapshot);

    if opts.dry_run {
        println!("Dry run: not starting tasks");
        println!("Started tasks: 0");
        return Ok(RunStartReport {
            snapshot,
            started: Vec::new(),
            failed: Vec::new(),
        });
    }

    let mut started = Vec::new();
    let mut failed = Vec::new();

    for ready in &snapshot.ready_tasks {
        match start_task(session, &mut board, ready, &opts.trigger, no_launch, backend, launcher) {
            Ok(launched) => {
                if let Some(worker) = launched {
                    println!(
                        "Launched codex worker: task={} agent={} pid={} backend={}",
                        ready.task_id,
                        ready.owner,
                        worker.pid,
                        worker.backend.as_str()
                    );
                }
                started.push(ready.task_id.clone());
            }
            Err(err) => {
                eprintln!("start failed for {}: {err}", ready.task_id);
                failed.push((ready.task_id.clone(), err.to_string()));
            }
        }
    }

    let _ = refresh_registry(&ctx.orch_dir, &ctx.registry_path());
    println!("Started tasks: {}", started.len());

    Ok(RunStartReport {
        snapshot,
        started,
        failed,
    })
}

/// Start one ready task: worktree, scope lock, board flip, worker launch.
/// Rollback on any failure is bounded to this single attempt.
pub fn start_task(
    session: &Session,
    board: &mut Board,
    ready: &ReadyTask,
    trigger: &str,
    no_launch: bool,
    backend: Option<ResolvedBackend>,
    launcher: &Launcher,
) -> Result<Option<LaunchedWorker>, EngineError> {
    let ctx = &session.ctx;
    let branch = branch_name(&ready.owner, &ready.task_id);
    let manager = WorktreeManager::new(session.git.clone());
    let worktree_path = manager.worktree_path(
        &ctx.worktree_parent,
        &ctx.repo_name,
        &ready.owner,
        &ready.task_id,
    );

    // Pre-existence decides what rollback may delete.
    let branch_pre_existed = branch_exists(&session.primary, &session.git, &branch)?;
    let worktree_pre_existed = worktree_path.exists();

    let mut undo = Rollback {
        session,
        task_id: ready.task_id.clone(),
        owner: ready.owner.clone(),
        branch: branch.clone(),
        worktree_path: worktree_path.clone(),
        branch_pre_existed,
        worktree_pre_existed,
        lock_acquired: false,
        row_flipped: false,
    };

    let outcome = match manager.ensure(&session.primary, &ctx.base_branch, &branch, &worktree_path)
    {
        Ok(outcome) => outcome,
        Err(err) => {
            let err = EngineError::from(err);
            undo.run(board);
            return Err(err);
        }
    };
    if let EnsureOutcome::CreatedAfterQuarantine { quarantined, .. } = &outcome {
        println!(
            "quarantined stale worktree path: {}",
            quarantined.display()
        );
    }

    let lock = ScopeLock::new(
        &ready.owner,
        &ready.scope,
        &ready.task_id,
        &branch,
        worktree_path.display().to_string(),
    );
    if let Err(err) = lock.acquire(&ctx.lock_path(&ready.scope)) {
        let err = EngineError::from(err);
        undo.run(board);
        return Err(err);
    }
    undo.lock_acquired = true;

    if let Err(err) = board.update_status(&ready.task_id, "IN_PROGRESS") {
        let err = EngineError::from(err);
        undo.run(board);
        return Err(err);
    }
    undo.row_flipped = true;
    append_update_best_effort(
        &ctx.updates_file,
        &ready.owner,
        &ready.task_id,
        "IN_PROGRESS",
        &format!("worktree start (trigger={trigger})"),
    );

    if no_launch {
        return Ok(None);
    }
    let Some(backend) = backend else {
        return Ok(None);
    };

    let cli_path = session.cli_binary_for_children();
    let prompt = render_worker_prompt(&WorkerPromptInputs {
        agent: &ready.owner,
        scope: &ready.scope,
        task_id: &ready.task_id,
        title: &ready.title,
        worktree: &worktree_path,
        state_dir: &ctx.state_dir,
        repo_root: &session.primary.root,
        cli_path: &cli_path,
        spec_rel_path: &ready.spec_rel_path,
        goal_summary: &ready.goal_summary,
        in_scope_summary: &ready.in_scope_summary,
        acceptance_summary: &ready.acceptance_summary,
        trigger,
    });

    let request = LaunchRequest {
        agent: ready.owner.clone(),
        scope: ready.scope.clone(),
        task_id: ready.task_id.clone(),
        worktree: worktree_path.clone(),
        state_dir: ctx.state_dir.clone(),
        repo_root: session.primary.root.clone(),
        prompt,
        codex_flags: ctx.runtime.codex_flags.clone(),
        backend,
        trigger: trigger.to_string(),
        log_dir: ctx.log_dir(),
        pid_meta_path: ctx.pid_meta_path(&teams_core::types::TaskId::new(&ready.task_id)),
        cli_path,
    };

    match launcher.launch(&request) {
        Ok(worker) => Ok(Some(worker)),
        Err(err) => {
            let err = EngineError::from(err);
            undo.run(board);
            Err(err)
        }
    }
}

/// `worktree create <agent> <task_id>`: branch + worktree only, no lock.
pub fn worktree_create(
    session: &Session,
    agent: &str,
    task_id: &str,
) -> Result<PathBuf, EngineError> {
    let ctx = &session.ctx;
    let branch = branch_name(agent, task_id);
    let manager = WorktreeManager::new(session.git.clone());
    let path = manager.worktree_path(&ctx.worktree_parent, &ctx.repo_name, agent, task_id);

    let outcome = manager.ensure(&session.primary, &ctx.base_branch, &branch, &path)?;
    if let EnsureOutcome::CreatedAfterQuarantine { quarantined, .. } = &outcome {
        println!("quarantined stale worktree path: {}", quarantined.display());
    }
    println!("Worktree ready: {} ({branch})", path.display());
    Ok(path)
}

/// `worktree start <agent> <task_id>`: the scheduler's per-task start path
/// without a worker launch (worktree, scope lock, IN_PROGRESS flip).
pub fn worktree_start(
    session: &Session,
    agent: &str,
    task_id: &str,
    trigger: &str,
) -> Result<(), EngineError> {
    let ctx = &session.ctx;
    let scope = ctx
        .scope_for_owner(agent)
        .map(str::to_string)
        .ok_or_else(|| {
            EngineError::MissingPrerequisite(format!("owner {agent} is not in the [owners] map"))
        })?;

    let mut board = Board::open_or_create(&ctx.todo_file, &ctx.todo)?;
    let row = board
        .find_task(task_id)
        .ok_or_else(|| EngineError::NotFound(format!("task id not on board: {task_id}")))?;

    let spec_index = SpecIndex::new(&session.checkout.root);
    let (goal, in_scope, acceptance) = match spec_index.validate(task_id) {
        teams_board::SpecStatus::Valid {
            goal_summary,
            in_scope_summary,
            acceptance_summary,
        } => (goal_summary, in_scope_summary, acceptance_summary),
        _ => (String::new(), String::new(), String::new()),
    };

    let ready = ReadyTask {
        task_id: task_id.to_string(),
        title: row.title,
        owner: agent.to_string(),
        owner_key: teams_core::types::owner_key(agent),
        scope,
        deps: row.deps,
        status: row.status,
        spec_rel_path: SpecIndex::rel_path(task_id).display().to_string(),
        goal_summary: goal,
        in_scope_summary: in_scope,
        acceptance_summary: acceptance,
    };

    let launcher = Launcher::default();
    start_task(session, &mut board, &ready, trigger, true, None, &launcher)?;
    println!("Started worktree for {task_id} ({})", ready.scope);
    Ok(())
}

/// `worktree list`: the repository's worktrees, primary first.
pub fn worktree_list(session: &Session) -> Result<(), EngineError> {
    let manager = WorktreeManager::new(session.git.clone());
    for entry in manager.list(&session.primary)? {
        println!(
            "{}\t{}",
            entry.path.display(),
            entry.branch.as_deref().unwrap_or("(detached)")
        );
    }
    Ok(())
}

fn print_snapshot(snapshot: &ReadinessSnapshot) {
    println!(
        "Ready tasks: {} (excluded: {}, trigger: {})",
        snapshot.ready_tasks.len(),
        snapshot.excluded_tasks.len(),
        snapshot.trigger
    );
    for task in &snapshot.ready_tasks {
        println!(
            "  [READY] {} owner={} scope={} deps={}",
            task.task_id, task.owner, task.scope, task.deps
        );
    }
    for task in &snapshot.excluded_tasks {
        println!(
            "  [EXCLUDED] {} owner={} reason={} source={}",
            task.task_id,
            task.owner,
            task.reason.as_str(),
            task.source
        );
    }
}

struct Rollback<'a> {
    session: &'a Session,
    task_id: String,
    owner: String,
    branch: String,
    worktree_path: PathBuf,
    branch_pre_existed: bool,
    worktree_pre_existed: bool,
    lock_acquired: bool,
    row_flipped: bool,
}

impl Rollback<'_> {
    /// Best-effort, single-shot undo of a failed start attempt. The launcher
    /// kills its own spawned worker before surfacing a launch error, so by
    /// the time this runs no worker process from the attempt is alive.
    fn run(&mut self, board: &mut Board) {
        let ctx = &self.session.ctx;

        let _ = remove_pid_meta(&ctx.pid_meta_path(&teams_core::types::TaskId::new(&self.task_id)));

        if self.lock_acquired {
            let scope = ctx
                .owners_by_key
                .get(&teams_core::types::owner_key(&self.owner))
                .cloned()
                .unwrap_or_default();
            if !scope.is_empty() {
                let _ = remove_lock(&ctx.lock_path(&scope));
            }
        }

        if self.row_flipped {
            if board.update_status(&self.task_id, "TODO").is_ok() {
                append_update_best_effort(
                    &ctx.updates_file,
                    &self.owner,
                    &self.task_id,
                    "TODO",
                    &format!("Stopped by {ACTOR}: start rollback"),
                );
            }
        }

        if !self.worktree_pre_existed || !self.branch_pre_existed {
            let manager = WorktreeManager::new(self.session.git.clone());
            if !self.worktree_pre_existed {
                if let Err(err) =
                    manager.remove(&self.session.primary, &self.worktree_path, &self.branch)
                {
                    eprintln!("rollback: worktree removal failed: {err}");
                }
            } else if !self.branch_pre_existed {
                let _ = self
                    .session
                    .git
                    .run_ok(&self.session.primary.root, ["branch", "-D", &self.branch]);
            }
        }
    }
}
