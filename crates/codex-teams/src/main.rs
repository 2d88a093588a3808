use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use codex_teams::cleanup::{
    auto_cleanup_exit, run_cleanup_stale, run_emergency_stop, run_stop, StopSelector,
};
use codex_teams::complete::{run_complete, CompleteOptions};
use codex_teams::init::{run_init, GitignoreMode};
use codex_teams::scheduler::{
    run_start, worktree_create, worktree_list, worktree_start, StartOptions,
};
use codex_teams::status::{build_status, render_json, render_text};
use codex_teams::tasks::{
    scaffold_specs, task_heartbeat, task_lock, task_new, task_unlock, task_update,
};
use codex_teams::{EngineError, Session};
use teams_git::merge::MergeStrategy;

#[derive(Parser)]
#[command(name = "codex-teams")]
#[command(version, about = "Orchestrate parallel AI coding workers in git worktrees")]
struct Cli {
    /// Git repository root or any path inside it
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// State directory override (also: AI_STATE_DIR)
    #[arg(long = "state-dir", global = true)]
    state_dir: Option<String>,

    /// Config path override
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap config, board, and state layout
    Init(InitArgs),
    /// Task-level commands
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Worktree-level commands
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommands,
    },
    /// Scheduler commands
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Unified status view
    Status(StatusArgs),
    /// Alias for the status text view
    Dashboard(StatusArgs),
}

#[derive(Args)]
struct InitArgs {
    /// Whether to add state entries to .gitignore
    #[arg(long, default_value = "ask", value_parser = parse_gitignore_mode)]
    gitignore: GitignoreMode,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Alias of the top-level init
    Init(InitArgs),
    /// Add a board row and scaffold its spec
    New {
        task_id: String,
        /// Comma-separated dependency ids (tasks or gates)
        #[arg(long, value_delimiter = ',')]
        deps: Vec<String>,
        summary: String,
    },
    /// Create spec files for rows that lack a valid one
    ScaffoldSpecs {
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Manually acquire a scope lock
    Lock {
        agent: String,
        scope: String,
        task_id: Option<String>,
    },
    /// Release an owned scope lock
    Unlock { agent: String, scope: String },
    /// Refresh an owned lock's heartbeat
    Heartbeat { agent: String, scope: String },
    /// Flip a board row and append to the update log
    Update {
        agent: String,
        task_id: String,
        status: String,
        summary: String,
    },
    /// Finalize a finished task: merge, unlock, cleanup
    Complete {
        agent: String,
        scope: String,
        task_id: String,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long, default_value = "task-complete")]
        trigger: String,
        #[arg(long)]
        no_run_start: bool,
        #[arg(long, value_parser = parse_merge_strategy)]
        merge_strategy: Option<MergeStrategy>,
    },
    /// Stop workers and converge their state
    Stop {
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "operator stop")]
        reason: String,
        #[arg(long)]
        apply: bool,
    },
    /// Converge records whose worker is already gone
    CleanupStale {
        #[arg(long)]
        apply: bool,
    },
    /// Stop everything and release the scheduler mutex
    EmergencyStop {
        #[arg(long, default_value = "emergency stop")]
        reason: String,
        #[arg(long)]
        yes: bool,
    },
    /// Worker-exit convergence (invoked by the exit watcher)
    AutoCleanupExit {
        task_id: String,
        expected_pid: u32,
        #[arg(long, default_value = "worker exited")]
        reason: String,
    },
}

#[derive(Subcommand)]
enum WorktreeCommands {
    /// Create the task worktree and branch
    Create { agent: String, task_id: String },
    /// Start path without a worker: worktree, lock, IN_PROGRESS
    Start {
        agent: String,
        task_id: String,
        #[arg(long, default_value = "manual")]
        trigger: String,
    },
    /// List the repository's worktrees
    List,
}

#[derive(Subcommand)]
enum RunCommands {
    /// Evaluate readiness and start ready tasks
    Start {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_launch: bool,
        #[arg(long, default_value = "manual")]
        trigger: String,
        #[arg(long)]
        max_start: Option<u32>,
    },
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long)]
    json: bool,
    /// Interactive dashboard flag; falls back to the text rendering
    #[arg(long)]
    tui: bool,
    #[arg(long, default_value = "manual")]
    trigger: String,
    #[arg(long)]
    max_start: Option<u32>,
}

fn parse_gitignore_mode(raw: &str) -> Result<GitignoreMode, String> {
    GitignoreMode::parse(raw).ok_or_else(|| format!("expected ask|yes|no, got {raw}"))
}

fn parse_merge_strategy(raw: &str) -> Result<MergeStrategy, String> {
    MergeStrategy::parse(raw).ok_or_else(|| format!("expected ff-only|rebase-then-ff, got {raw}"))
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let session = Session::load(
        cli.repo.as_deref(),
        cli.state_dir.as_deref(),
        cli.config.as_deref(),
    )?;

    match cli.command {
        Commands::Init(args) => run_init(&session, args.gitignore)?,
        Commands::Task { command } => dispatch_task(&session, command)?,
        Commands::Worktree { command } => match command {
            WorktreeCommands::Create { agent, task_id } => {
                worktree_create(&session, &agent, &task_id)?;
            }
            WorktreeCommands::Start {
                agent,
                task_id,
                trigger,
            } => worktree_start(&session, &agent, &task_id, &trigger)?,
            WorktreeCommands::List => worktree_list(&session)?,
        },
        Commands::Run { command } => match command {
            RunCommands::Start {
                dry_run,
                no_launch,
                trigger,
                max_start,
            } => {
                let report = run_start(
                    &session,
                    &StartOptions {
                        trigger: trigger.clone(),
                        dry_run,
                        no_launch,
                        max_start,
                    },
                )?;
                if !report.started.is_empty() && !dry_run {
                    let payload = build_status(&session, &trigger, max_start)?;
                    println!();
                    println!("{}", render_text(&payload));
                }
            }
        },
        Commands::Status(args) | Commands::Dashboard(args) => {
            let payload = build_status(&session, &args.trigger, args.max_start)?;
            // --tui falls back to the deterministic text rendering; the
            // interactive dashboard is a separate surface.
            if args.json && !args.tui {
                println!("{}", render_json(&payload));
            } else {
                println!("{}", render_text(&payload));
            }
        }
    }
    Ok(())
}

fn dispatch_task(session: &Session, command: TaskCommands) -> Result<()> {
    match command {
        TaskCommands::Init(args) => run_init(session, args.gitignore)?,
        TaskCommands::New {
            task_id,
            deps,
            summary,
        } => task_new(session, &task_id, &summary, &deps)?,
        TaskCommands::ScaffoldSpecs {
            task,
            dry_run,
            force,
        } => {
            scaffold_specs(session, task.as_deref(), dry_run, force)?;
        }
        TaskCommands::Lock {
            agent,
            scope,
            task_id,
        } => task_lock(session, &agent, &scope, task_id.as_deref())?,
        TaskCommands::Unlock { agent, scope } => task_unlock(session, &agent, &scope)?,
        TaskCommands::Heartbeat { agent, scope } => task_heartbeat(session, &agent, &scope)?,
        TaskCommands::Update {
            agent,
            task_id,
            status,
            summary,
        } => task_update(session, &agent, &task_id, &status, &summary)?,
        TaskCommands::Complete {
            agent,
            scope,
            task_id,
            summary,
            trigger,
            no_run_start,
            merge_strategy,
        } => run_complete(
            session,
            &agent,
            &scope,
            &task_id,
            &CompleteOptions {
                summary,
                trigger,
                no_run_start,
                merge_strategy,
            },
        )?,
        TaskCommands::Stop {
            task,
            owner,
            all,
            reason,
            apply,
        } => {
            let selector = match (task, owner, all) {
                (Some(task), None, false) => StopSelector::Task(task),
                (None, Some(owner), false) => StopSelector::Owner(owner),
                (None, None, true) => StopSelector::All,
                _ => {
                    return Err(EngineError::Rejected(
                        "task stop requires exactly one of --task, --owner, --all".to_string(),
                    )
                    .into());
                }
            };
            run_stop(session, &selector, &reason, apply)?;
        }
        TaskCommands::CleanupStale { apply } => {
            run_cleanup_stale(session, "stale cleanup", apply)?;
        }
        TaskCommands::EmergencyStop { reason, yes } => {
            if !yes {
                return Err(EngineError::Rejected(
                    "emergency-stop needs --yes to run non-interactively".to_string(),
                )
                .into());
            }
            run_emergency_stop(session, &reason)?;
        }
        TaskCommands::AutoCleanupExit {
            task_id,
            expected_pid,
            reason,
        } => auto_cleanup_exit(session, &task_id, expected_pid, &reason)?,
    }
    Ok(())
}
