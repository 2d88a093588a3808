//! Merging a task branch back into the base branch.
//!
//! The ladder: refuse on a dirty primary, no-op when already merged, try
//! fast-forward, and under `rebase-then-ff` rebase the branch in its own
//! worktree (aborting on conflict) before one more fast-forward attempt.

use std::path::Path;

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::{has_tracked_changes, RepoHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    FfOnly,
    RebaseThenFf,
}

impl MergeStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ff-only" => Some(MergeStrategy::FfOnly),
            "rebase-then-ff" => Some(MergeStrategy::RebaseThenFf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::FfOnly => "ff-only",
            MergeStrategy::RebaseThenFf => "rebase-then-ff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Branch was already an ancestor of base; nothing moved.
    AlreadyMerged,
    FastForwarded,
    RebasedThenFastForwarded,
}

/// Merge `branch` into `base` inside the primary repository.
pub fn merge_into(
    primary: &RepoHandle,
    git: &GitCli,
    base: &str,
    branch: &str,
    worktree_path: &Path,
    strategy: MergeStrategy,
) -> Result<MergeOutcome, GitError> {
    if has_tracked_changes(primary, git)? {
        return Err(GitError::DirtyPrimary {
            path: primary.root.clone(),
        });
    }

    if git.run_ok(
        &primary.root,
        ["merge-base", "--is-ancestor", branch, base],
    )? {
        return Ok(MergeOutcome::AlreadyMerged);
    }

    match fast_forward(primary, git, base, branch) {
        Ok(()) => return Ok(MergeOutcome::FastForwarded),
        Err(ff_err) => {
            if strategy == MergeStrategy::FfOnly {
                return Err(ff_err);
            }
        }
    }

    // rebase-then-ff: replay the branch onto base inside its own worktree so
    // the primary checkout never leaves the base branch.
    match git.run(worktree_path, ["rebase", base]) {
        Ok(_) => {}
        Err(GitError::CommandFailed { .. }) => {
            let _ = git.run_ok(worktree_path, ["rebase", "--abort"]);
            return Err(GitError::RebaseConflict {
                base: base.to_string(),
                branch: branch.to_string(),
            });
        }
        Err(err) => return Err(err),
    }

    fast_forward(primary, git, base, branch)?;
    Ok(MergeOutcome::RebasedThenFastForwarded)
}

fn fast_forward(
    primary: &RepoHandle,
    git: &GitCli,
    base: &str,
    branch: &str,
) -> Result<(), GitError> {
    let head = git.stdout(&primary.root, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    let result = if head == base {
        // Base is checked out here: a plain ff merge also updates the tree.
        git.run(&primary.root, ["merge", "--ff-only", branch])
    } else {
        // Base is not checked out; fetch can move the ref directly.
        git.run(&primary.root, ["fetch", ".", &format!("{branch}:{base}")])
    };

    match result {
        Ok(_) => Ok(()),
        Err(GitError::CommandFailed { stderr, .. }) => Err(GitError::FastForwardFailed {
            base: base.to_string(),
            branch: branch.to_string(),
            detail: stderr.lines().next().unwrap_or("non-fast-forward").to_string(),
        }),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{merge_into, MergeOutcome, MergeStrategy};
    use crate::command::GitCli;
    use crate::error::GitError;
    use crate::repo::discover_repo;
    use crate::worktree::{branch_name, WorktreeManager};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("codex-teams-merge-{prefix}-{now}"))
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

    fn commit_file(cwd: &Path, name: &str, content: &str, message: &str) {
        fs::write(cwd.join(name), content).expect("write file");
        run_git(cwd, &["add", name]);
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

    fn init_repo(prefix: &str) -> PathBuf {
        let root = unique_temp_dir(prefix);
        fs::create_dir_all(&root).expect("create temp repo");
        run_git(&root, &["init", "-b", "main"]);
        commit_file(&root, "README.md", "init\n", "init");
        root
    }

    fn setup_task_worktree(root: &Path, agent: &str, task: &str) -> (PathBuf, String) {
        let git = GitCli::default();
        let repo = discover_repo(root, &git).expect("discover");
        let manager = WorktreeManager::new(git);
        let branch = branch_name(agent, task);
        let path = root.parent().unwrap().join(format!(
            "{}-{}",
            root.file_name().unwrap().to_string_lossy(),
            branch.trim_start_matches("codex/")
        ));
        manager.ensure(&repo, "main", &branch, &path).expect("ensure worktree");
        (path, branch)
    }

    #[test]
    fn fast_forward_merge_moves_base_to_branch_tip() {
        let root = init_repo("ff");
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover");
        let (wt, branch) = setup_task_worktree(&root, "AgentA", "T1-001");

        commit_file(&wt, "feature.txt", "work\n", "feat: task work");

        let outcome = merge_into(&repo, &git, "main", &branch, &wt, MergeStrategy::FfOnly)
            .expect("merge");
        assert_eq!(outcome, MergeOutcome::FastForwarded);
        assert!(root.join("feature.txt").exists(), "primary tree synced");

        let _ = fs::remove_dir_all(&wt);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn merging_an_ancestor_branch_is_a_noop() {
        let root = init_repo("noop");
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover");
        let (wt, branch) = setup_task_worktree(&root, "AgentA", "T1-002");

        let outcome = merge_into(&repo, &git, "main", &branch, &wt, MergeStrategy::FfOnly)
            .expect("merge");
        assert_eq!(outcome, MergeOutcome::AlreadyMerged);

        let _ = fs::remove_dir_all(&wt);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn dirty_primary_refuses_to_merge() {
        let root = init_repo("dirty");
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover");
        let (wt, branch) = setup_task_worktree(&root, "AgentA", "T1-003");
        commit_file(&wt, "feature.txt", "work\n", "feat: work");

        fs::write(root.join("README.md"), "local edits\n").expect("dirty the primary");
        let err = merge_into(&repo, &git, "main", &branch, &wt, MergeStrategy::FfOnly)
            .expect_err("dirty primary must refuse");
        assert!(matches!(err, GitError::DirtyPrimary { .. }));

        let _ = fs::remove_dir_all(&wt);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn diverged_branch_fails_ff_only_but_rebases_under_the_fallback() {
        let root = init_repo("diverge");
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover");
        let (wt, branch) = setup_task_worktree(&root, "AgentA", "T1-004");

        commit_file(&wt, "feature.txt", "work\n", "feat: work");
        commit_file(&root, "base.txt", "base moved\n", "chore: base advance");

        let err = merge_into(&repo, &git, "main", &branch, &wt, MergeStrategy::FfOnly)
            .expect_err("ff-only must fail after divergence");
        assert!(matches!(err, GitError::FastForwardFailed { .. }));

        let outcome = merge_into(
            &repo,
            &git,
            "main",
            &branch,
            &wt,
            MergeStrategy::RebaseThenFf,
        )
        .expect("rebase-then-ff");
        assert_eq!(outcome, MergeOutcome::RebasedThenFastForwarded);
        assert!(root.join("feature.txt").exists());
        assert!(root.join("base.txt").exists());

        let _ = fs::remove_dir_all(&wt);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn conflicting_rebase_is_aborted_and_surfaces_a_merge_error() {
        let root = init_repo("conflict");
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).expect("discover");
        let (wt, branch) = setup_task_worktree(&root, "AgentA", "T1-005");

        commit_file(&wt, "clash.txt", "branch side\n", "feat: branch side");
        commit_file(&root, "clash.txt", "base side\n", "chore: base side");

        let err = merge_into(
            &repo,
            &git,
            "main",
            &branch,
            &wt,
            MergeStrategy::RebaseThenFf,
        )
        .expect_err("conflict must surface");
        assert!(matches!(err, GitError::RebaseConflict { .. }));

        // The worktree is left in a usable (non-mid-rebase) state.
        let status = GitCli::default()
            .run(&wt, ["status", "--porcelain"])
            .expect("status after abort");
        assert!(!status.stdout.contains("UU "), "no unresolved conflicts remain");

        let _ = fs::remove_dir_all(&wt);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn strategy_parsing_matches_cli_spellings() {
        assert_eq!(MergeStrategy::parse("ff-only"), Some(MergeStrategy::FfOnly));
        assert_eq!(
            MergeStrategy::parse("rebase-then-ff"),
            Some(MergeStrategy::RebaseThenFf)
        );
        assert_eq!(MergeStrategy::parse("merge"), None);
    }
}
