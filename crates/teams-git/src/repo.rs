use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
    pub git_dir: PathBuf,
}

pub fn discover_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let inside = match git.run(start_path, ["rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => output.stdout.trim() == "true",
        Err(GitError::CommandFailed { .. }) => false,
        Err(err) => return Err(err),
    };
    if !inside {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let root = PathBuf::from(git.stdout(start_path, ["rev-parse", "--show-toplevel"])?);
    let git_dir_rel = PathBuf::from(git.stdout(&root, ["rev-parse", "--git-dir"])?);
    let git_dir = if git_dir_rel.is_absolute() {
        git_dir_rel
    } else {
        root.join(git_dir_rel)
    };

    Ok(RepoHandle { root, git_dir })
}

/// Resolve the primary (top-level) checkout for a repository, even when
/// `start_path` is inside a linked worktree. The common git dir's parent is
/// the primary clone.
pub fn discover_primary_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let checkout = discover_repo(start_path, git)?;
    let common = PathBuf::from(git.stdout(&checkout.root, ["rev-parse", "--git-common-dir"])?);
    let common = if common.is_absolute() {
        common
    } else {
        checkout.root.join(common)
    };

    let primary_root = common
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| checkout.root.clone());
    discover_repo(&primary_root, git)
}

/// True when `path` sits in the primary checkout rather than a linked
/// worktree: for the primary, git-dir and git-common-dir coincide.
pub fn is_primary_checkout(path: &Path, git: &GitCli) -> Result<bool, GitError> {
    let repo = discover_repo(path, git)?;
    let common = PathBuf::from(git.stdout(&repo.root, ["rev-parse", "--git-common-dir"])?);
    let common = if common.is_absolute() {
        common
    } else {
        repo.root.join(common)
    };
    Ok(normalized(&repo.git_dir) == normalized(&common))
}

pub fn current_branch(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    git.stdout(&repo.root, ["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Tracked modifications only; untracked files are a worker's business.
pub fn has_tracked_changes(repo: &RepoHandle, git: &GitCli) -> Result<bool, GitError> {
    let output = git.run(&repo.root, ["status", "--porcelain", "-uno"])?;
    Ok(!output.stdout.trim().is_empty())
}

pub fn branch_exists(repo: &RepoHandle, git: &GitCli, branch: &str) -> Result<bool, GitError> {
    git.run_ok(
        &repo.root,
        [
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ],
    )
}

fn normalized(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
