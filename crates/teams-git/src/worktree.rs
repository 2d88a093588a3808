//! Task worktrees and their branches.
//!
//! Naming scheme: worktree `<parent>/<repo_name>-<agent_slug>-<task_slug>`
//! on branch `codex/<agent_slug>-<task_slug>`. A directory squatting on the
//! canonical path that is not a worktree of this repository is quarantined
//! by an atomic rename so operators can inspect it later.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use teams_core::types::slug;

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::{branch_exists, RepoHandle};

pub const BRANCH_PREFIX: &str = "codex/";

pub fn branch_name(agent: &str, task_id: &str) -> String {
    format!("{BRANCH_PREFIX}{}-{}", slug(agent), slug(task_id))
}

pub fn worktree_dir_name(repo_name: &str, agent: &str, task_id: &str) -> String {
    format!("{repo_name}-{}-{}", slug(agent), slug(task_id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created { path: PathBuf },
    Reused { path: PathBuf },
    CreatedAfterQuarantine { path: PathBuf, quarantined: PathBuf },
}

impl EnsureOutcome {
    pub fn path(&self) -> &Path {
        match self {
            EnsureOutcome::Created { path }
            | EnsureOutcome::Reused { path }
            | EnsureOutcome::CreatedAfterQuarantine { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorktreeManager {
    git: GitCli,
}

impl WorktreeManager {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    pub fn worktree_path(
        &self,
        parent_dir: &Path,
        repo_name: &str,
        agent: &str,
        task_id: &str,
    ) -> PathBuf {
        parent_dir.join(worktree_dir_name(repo_name, agent, task_id))
    }

    /// Materialize the worktree for `branch` at `path`, creating the branch
    /// from `base_branch` when it does not exist yet.
    pub fn ensure(
        &self,
        repo: &RepoHandle,
        base_branch: &str,
        branch: &str,
        path: &Path,
    ) -> Result<EnsureOutcome, GitError> {
        let mut quarantined = None;

        if path.exists() {
            if self.path_is_worktree_of(repo, path)? {
                return Ok(EnsureOutcome::Reused {
                    path: path.to_path_buf(),
                });
            }
            // Orphaned directory: move it aside intact and build fresh.
            let stamp = Utc::now().format("%Y%m%d%H%M%S");
            let target = PathBuf::from(format!("{}.orphan-{stamp}", path.display()));
            fs::rename(path, &target).map_err(|source| GitError::Quarantine {
                path: path.to_path_buf(),
                source,
            })?;
            quarantined = Some(target);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| GitError::Io {
                command: format!("create_dir_all {}", parent.display()),
                source,
            })?;
        }

        if branch_exists(repo, &self.git, branch)? {
            self.git.run(
                &repo.root,
                ["worktree", "add", &path.display().to_string(), branch],
            )?;
        } else {
            self.git.run(
                &repo.root,
                [
                    "worktree",
                    "add",
                    "-b",
                    branch,
                    &path.display().to_string(),
                    base_branch,
                ],
            )?;
        }

        Ok(match quarantined {
            Some(quarantined) => EnsureOutcome::CreatedAfterQuarantine {
                path: path.to_path_buf(),
                quarantined,
            },
            None => EnsureOutcome::Created {
                path: path.to_path_buf(),
            },
        })
    }

    pub fn list(&self, repo: &RepoHandle) -> Result<Vec<ListedWorktree>, GitError> {
        let output = self
            .git
            .run(&repo.root, ["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&output.stdout)
    }

    pub fn find_worktree_for_branch(
        &self,
        repo: &RepoHandle,
        branch: &str,
    ) -> Result<Option<PathBuf>, GitError> {
        Ok(self
            .list(repo)?
            .into_iter()
            .find(|entry| entry.branch.as_deref() == Some(branch))
            .map(|entry| entry.path))
    }

    /// Force-remove the worktree and delete its branch. Removing the primary
    /// checkout is refused. Missing worktree or branch are tolerated: the
    /// cleanup paths re-run this after partial failures.
    pub fn remove(
        &self,
        repo: &RepoHandle,
        worktree_path: &Path,
        branch: &str,
    ) -> Result<(), GitError> {
        if same_path(worktree_path, &repo.root) {
            return Err(GitError::PrimaryRepoRefused {
                path: worktree_path.to_path_buf(),
            });
        }

        if worktree_path.exists() {
            self.git.run(
                &repo.root,
                [
                    "worktree",
                    "remove",
                    "--force",
                    &worktree_path.display().to_string(),
                ],
            )?;
        } else {
            // Directory already gone; clear the stale registration.
            let _ = self.git.run_ok(&repo.root, ["worktree", "prune"]);
        }

        if branch_exists(repo, &self.git, branch)? {
            self.git.run(&repo.root, ["branch", "-D", branch])?;
        }
        Ok(())
    }

    fn path_is_worktree_of(&self, repo: &RepoHandle, path: &Path) -> Result<bool, GitError> {
        if !path.join(".git").exists() {
            return Ok(false);
        }
        Ok(self
            .list(repo)?
            .iter()
            .any(|entry| same_path(&entry.path, path)))
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    let canon_a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let canon_b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    canon_a == canon_b
}

fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_branch: Option<String> = None;
    let mut current_head: Option<String> = None;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(path) = current_path.take() {
                listed.push(ListedWorktree {
                    path,
                    branch: current_branch.take(),
                    head: current_head.take(),
                });
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest.trim()));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            current_branch = Some(rest.trim().trim_start_matches("refs/heads/").to_string());
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.trim().to_string());
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }
    Ok(listed)
}
