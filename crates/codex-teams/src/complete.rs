//! The completion pipeline.
//!
//! Invoked from inside the agent worktree once the worker has committed its
//! deliverables and flipped the board row to a done status. Steps are
//! totally ordered: update log, merge, unlock, worktree/branch removal, pid
//! cleanup, optional scheduler re-entry. Completion never creates commits.

use std::path::Path;
use std::process::Command;

use teams_board::Board;
use teams_core::types::{TaskId, TaskStatus};
use teams_git::merge::{merge_into, MergeStrategy};
use teams_git::repo::{current_branch, has_tracked_changes};
use teams_git::worktree::{WorktreeManager, BRANCH_PREFIX};
use teams_state::lock::{remove_lock, ScopeLock};
use teams_state::pidmeta::remove_pid_meta;
use teams_state::updates::append_update_best_effort;

use crate::error::EngineError;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteOptions {
    pub summary: Option<String>,
    pub trigger: String,
    pub no_run_start: bool,
    pub merge_strategy: Option<MergeStrategy>,
}

pub fn run_complete(
    session: &Session,
    agent: &str,
    scope: &str,
    task_id: &str,
    opts: &CompleteOptions,
) -> Result<(), EngineError> {
    let ctx = &session.ctx;

    // Precondition 1: we are in a task worktree on a codex/ branch.
    if session.invoked_from_primary()? {
        return Err(EngineError::MissingPrerequisite(
            "task complete must run from the agent worktree, not the primary repo".to_string(),
        ));
    }
    let branch = current_branch(&session.checkout, &session.git)?;
    if !branch.starts_with(BRANCH_PREFIX) {
        return Err(EngineError::MissingPrerequisite(format!(
            "current branch {branch} is not a {BRANCH_PREFIX}* task branch"
        )));
    }

    // Precondition 2: the scope lock is ours and bound to this task.
    let lock_path = ctx.lock_path(scope);
    let lock = ScopeLock::load(&lock_path).ok_or_else(|| {
        EngineError::NotFound(format!("no lock for scope {scope}"))
    })?;
    if lock.owner != agent || lock.task_id != task_id {
        return Err(EngineError::StateInvariant(format!(
            "lock for scope {scope} is bound to owner={} task={}, not owner={agent} task={task_id}",
            lock.owner, lock.task_id
        )));
    }

    // Precondition 3: the worktree has no tracked uncommitted changes.
    if has_tracked_changes(&session.checkout, &session.git)? {
        return Err(EngineError::MissingPrerequisite(
            "worktree has tracked uncommitted changes; commit deliverables first".to_string(),
        ));
    }

    // Precondition 4: the board row already reads as done.
    let board = Board::open(&ctx.todo_file, &ctx.todo)?;
    let row = board
        .find_task(task_id)
        .ok_or_else(|| EngineError::NotFound(format!("task id not on board: {task_id}")))?;
    if !TaskStatus::is_done_keyword(&row.status, &ctx.todo.done_keywords) {
        return Err(EngineError::MissingPrerequisite(format!(
            "board row for {task_id} is {}, expected a done status",
            row.status
        )));
    }

    // Step 1: durable DONE entry.
    let summary = opts
        .summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "task complete".to_string());
    append_update_best_effort(&ctx.updates_file, agent, task_id, "DONE", &summary);

    // Step 2: resolve the CLI binary for the post-completion scheduler call
    // before the worktree (and any binary inside it) disappears.
    let cli = session.cli_binary_for_children();

    // Step 3: merge.
    let strategy = opts.merge_strategy.unwrap_or_else(|| {
        MergeStrategy::parse(&ctx.runtime.merge_strategy).unwrap_or(MergeStrategy::RebaseThenFf)
    });
    merge_into(
        &session.primary,
        &session.git,
        &ctx.base_branch,
        &branch,
        &session.checkout.root,
        strategy,
    )?;
    println!("Merged branch into primary");

    // Step 4: unlock.
    remove_lock(&lock_path)?;

    // Step 5: remove worktree and branch.
    let manager = WorktreeManager::new(session.git.clone());
    manager.remove(&session.primary, &session.checkout.root, &branch)?;

    // Step 6: drop pid metadata, if the worker left any.
    remove_pid_meta(&ctx.pid_meta_path(&TaskId::new(task_id)))?;

    // Step 7: hand the scheduler the next round.
    if !opts.no_run_start {
        reenter_scheduler(&cli, &session.primary.root, ctx.state_dir.as_path(), &opts.trigger);
    }

    Ok(())
}

/// Re-enter the scheduler through the resolved CLI binary, from the primary
/// repo. A subprocess (not an in-process call) because the current process
/// still has the removed worktree as its working directory.
fn reenter_scheduler(cli: &Path, primary_root: &Path, state_dir: &Path, trigger: &str) {
    let status = Command::new(cli)
        .current_dir(primary_root)
        .args([
            "--repo",
            &primary_root.display().to_string(),
            "--state-dir",
            &state_dir.display().to_string(),
            "run",
            "start",
            "--trigger",
            trigger,
        ])
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => eprintln!(
            "warning: post-completion run start exited with {:?}",
            status.code()
        ),
        Err(err) => eprintln!("warning: post-completion run start failed to spawn: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::time::{SystemTime, UNIX_EPOCH};

    use teams_board::Board;
    use teams_git::repo::branch_exists;
    use teams_git::worktree::{branch_name, WorktreeManager};
    use teams_state::lock::ScopeLock;
    use teams_state::pidmeta::PidMeta;

    use super::{run_complete, CompleteOptions};
    use crate::session::Session;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("codex-teams-complete-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn commit_all(cwd: &Path, message: &str) {
        run_git(cwd, &["add", "-A"]);
        run_git(
            cwd,
            &[
                "-c",
                "user.name=Test User",
                "-c",
                "user.email=test@example.com",
                "commit",
                "-m",
                message,
            ],
        );
    }

    struct Fixture {
        base: PathBuf,
        root: PathBuf,
        state_dir: PathBuf,
        worktree: PathBuf,
        branch: String,
    }

    impl Fixture {
        /// A repo with one started task: worktree, branch, lock, pid meta,
        /// and a board row, matching what the start pipeline leaves behind.
        fn started(prefix: &str, board_status: &str) -> Self {
            let base = unique_temp_dir(prefix);
            let root = base.join("repo");
            fs::create_dir_all(&root).expect("repo dir");
            run_git(&root, &["init", "-b", "main"]);
            fs::write(root.join("README.md"), "init\n").expect("seed file");
            commit_all(&root, "init");

            let primary_session = Session::load(Some(&root), None, None).expect("session");
            let ctx = &primary_session.ctx;
            fs::write(
                &ctx.todo_file,
                format!(
                    "# TODO Board\n\n| ID | Title | Owner | Deps | Notes | Status |\n|---|---|---|---|---|---|\n| T1-001 | shell | AgentA | - | | {board_status} |\n"
                ),
            )
            .expect("board");
            commit_all(&root, "board");

            let branch = branch_name("AgentA", "T1-001");
            let worktree = ctx.worktree_parent.join(format!(
                "{}-agenta-t1-001",
                ctx.repo_name
            ));
            WorktreeManager::new(primary_session.git.clone())
                .ensure(&primary_session.primary, "main", &branch, &worktree)
                .expect("worktree");

            ScopeLock::new(
                "AgentA",
                "app-shell",
                "T1-001",
                &branch,
                worktree.display().to_string(),
            )
            .acquire(&ctx.lock_path("app-shell"))
            .expect("lock");

            PidMeta {
                pid: "99999999".to_string(),
                task_id: "T1-001".to_string(),
                owner: "AgentA".to_string(),
                scope: "app-shell".to_string(),
                worktree: worktree.display().to_string(),
                ..PidMeta::default()
            }
            .write(&ctx.pid_meta_path(&teams_core::types::TaskId::new("T1-001")))
            .expect("pid meta");

            let state_dir = ctx.state_dir.clone();
            Self {
                base,
                root,
                state_dir,
                worktree,
                branch,
            }
        }

        /// Agent-side session: invoked from the worktree with the shared
        /// state dir passed explicitly, as the worker prompt instructs.
        fn worktree_session(&self) -> Session {
            let state_dir = self.state_dir.display().to_string();
            Session::load(Some(&self.worktree), Some(state_dir.as_str()), None)
                .expect("worktree session")
        }

        fn opts() -> CompleteOptions {
            CompleteOptions {
                summary: Some("shipped".to_string()),
                trigger: "test".to_string(),
                no_run_start: true,
                merge_strategy: None,
            }
        }
    }

    #[test]
    fn happy_path_merges_and_cleans_the_whole_tuple() {
        let fx = Fixture::started("happy", "TODO");

        // Worker flow: deliverable commit, row flip, done-marker commit.
        fs::write(fx.worktree.join("feature.txt"), "work\n").expect("deliverable");
        commit_all(&fx.worktree, "feat: T1-001 work");
        let session = fx.worktree_session();
        let mut board = Board::open(&session.ctx.todo_file, &session.ctx.todo).expect("board");
        board.update_status("T1-001", "DONE").expect("flip row");
        commit_all(&fx.worktree, "chore: mark T1-001 done");

        run_complete(&session, "AgentA", "app-shell", "T1-001", &Fixture::opts())
            .expect("complete");

        assert!(fx.root.join("feature.txt").exists(), "merged into primary");
        assert!(!session.ctx.lock_path("app-shell").exists(), "lock gone");
        assert!(!fx.worktree.exists(), "worktree gone");
        assert!(
            !branch_exists(&session.primary, &session.git, &fx.branch).expect("probe"),
            "branch gone"
        );
        assert!(
            !session
                .ctx
                .pid_meta_path(&teams_core::types::TaskId::new("T1-001"))
                .exists(),
            "pid meta gone"
        );

        // The board flip travelled with the merge: the primary's board now
        // carries the DONE row.
        let primary_board = fs::read_to_string(fx.root.join("TODO.md")).expect("primary board");
        assert!(primary_board.contains("| T1-001 | shell | AgentA | - | | DONE |"));

        let updates = fs::read_to_string(&session.ctx.updates_file).expect("updates");
        assert!(updates.contains("| DONE | shipped |"));

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn localized_done_statuses_pass_the_row_guard() {
        let fx = Fixture::started("localized", "완료");
        fs::write(fx.worktree.join("feature.txt"), "work\n").expect("deliverable");
        commit_all(&fx.worktree, "feat: work");
        let session = fx.worktree_session();

        run_complete(&session, "AgentA", "app-shell", "T1-001", &Fixture::opts())
            .expect("complete with localized done");

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn refuses_from_the_primary_checkout() {
        let fx = Fixture::started("primary", "DONE");
        let session = Session::load(Some(&fx.root), None, None).expect("primary session");

        let err = run_complete(&session, "AgentA", "app-shell", "T1-001", &Fixture::opts())
            .expect_err("primary must refuse");
        assert!(err.to_string().starts_with("MissingPrerequisite: "));

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn refuses_when_the_lock_is_bound_elsewhere() {
        let fx = Fixture::started("lock-mismatch", "DONE");
        let session = fx.worktree_session();

        let err = run_complete(&session, "AgentB", "app-shell", "T1-001", &Fixture::opts())
            .expect_err("foreign owner must refuse");
        assert!(err.to_string().starts_with("StateInvariant: "));

        let missing = run_complete(&session, "AgentA", "ui-popover", "T1-001", &Fixture::opts())
            .expect_err("missing lock must refuse");
        assert!(missing.to_string().starts_with("NotFound: "));

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn refuses_on_tracked_uncommitted_changes() {
        let fx = Fixture::started("dirty", "DONE");
        fs::write(fx.worktree.join("README.md"), "edited\n").expect("dirty tracked file");
        let session = fx.worktree_session();

        let err = run_complete(&session, "AgentA", "app-shell", "T1-001", &Fixture::opts())
            .expect_err("dirty worktree must refuse");
        assert!(err.to_string().starts_with("MissingPrerequisite: "));
        assert!(err.to_string().contains("uncommitted"));

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn refuses_when_the_row_is_not_done() {
        let fx = Fixture::started("not-done", "IN_PROGRESS");
        let session = fx.worktree_session();

        let err = run_complete(&session, "AgentA", "app-shell", "T1-001", &Fixture::opts())
            .expect_err("non-done row must refuse");
        let rendered = err.to_string();
        assert!(rendered.starts_with("MissingPrerequisite: "));
        assert!(rendered.contains("IN_PROGRESS"));

        // Nothing was destroyed by the refused attempt.
        assert!(fx.worktree.exists());
        assert!(session.ctx.lock_path("app-shell").exists());

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn missing_summary_falls_back_to_the_literal_text() {
        let fx = Fixture::started("fallback", "DONE");
        let session = fx.worktree_session();
        let opts = CompleteOptions {
            summary: None,
            ..Fixture::opts()
        };

        run_complete(&session, "AgentA", "app-shell", "T1-001", &opts).expect("complete");

        let updates = fs::read_to_string(&session.ctx.updates_file).expect("updates");
        assert!(updates.contains("| DONE | task complete |"));

        let _ = fs::remove_dir_all(&fx.base);
    }

    #[test]
    fn merge_conflict_surfaces_as_merge_failed_and_keeps_the_lock() {
        let fx = Fixture::started("conflict", "DONE");

        fs::write(fx.worktree.join("clash.txt"), "branch side\n").expect("branch side");
        commit_all(&fx.worktree, "feat: branch side");
        fs::write(fx.root.join("clash.txt"), "base side\n").expect("base side");
        commit_all(&fx.root, "chore: base side");

        let session = fx.worktree_session();
        let err = run_complete(&session, "AgentA", "app-shell", "T1-001", &Fixture::opts())
            .expect_err("conflicting merge must fail");
        assert!(err.to_string().starts_with("MergeFailed: "));

        // Failure before unlock is non-destructive.
        assert!(session.ctx.lock_path("app-shell").exists());
        assert!(fx.worktree.exists());

        let _ = fs::remove_dir_all(&fx.base);
    }
}
