//! Resolved filesystem context for one CLI invocation.
//!
//! All state-layout decisions live here: where the TODO board, the lock
//! directory, the orchestrator pid records, and the update log sit relative
//! to the repository and the configured (or overridden) state directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::config::{OrchestratorConfig, RuntimeConfig, TodoSchemaConfig};
use crate::types::{owner_key, slug, TaskId};

pub const STATE_DIR_ENV: &str = "AI_STATE_DIR";

#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub repo_root: PathBuf,
    pub repo_name: String,
    pub base_branch: String,
    pub todo_file: PathBuf,
    pub state_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub orch_dir: PathBuf,
    pub updates_file: PathBuf,
    pub worktree_parent: PathBuf,
    pub config_path: PathBuf,
    pub runtime: RuntimeConfig,
    pub todo: TodoSchemaConfig,
    /// Display owner name -> scope.
    pub owners: BTreeMap<String, String>,
    /// owner_key(name) -> scope.
    pub owners_by_key: BTreeMap<String, String>,
}

impl Context {
    /// Resolve paths from the loaded config. `state_dir_arg` is the
    /// `--state-dir` override; the `AI_STATE_DIR` environment variable is
    /// consulted when it is absent.
    pub fn resolve(
        repo_root: &Path,
        config: &OrchestratorConfig,
        config_path: &Path,
        state_dir_arg: Option<&str>,
    ) -> Self {
        let env_override = std::env::var(STATE_DIR_ENV).ok();
        Self::resolve_with(repo_root, config, config_path, state_dir_arg, env_override)
    }

    pub fn resolve_with(
        repo_root: &Path,
        config: &OrchestratorConfig,
        config_path: &Path,
        state_dir_arg: Option<&str>,
        env_state_dir: Option<String>,
    ) -> Self {
        // A config living at <repo>/.state/orchestrator.toml anchors the
        // board, worktree parent, and state dir at that repo even when the
        // CLI was invoked from elsewhere.
        let config_repo_root = config_repo_root(config_path, repo_root);
        let repo_name = config_repo_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let todo_file = to_abs(&config_repo_root, &config.repo.todo_file);
        let worktree_parent = to_abs(
            &config_repo_root,
            &config.repo.worktree_parent.replace("<repo>", &repo_name),
        );

        let override_src = state_dir_arg
            .map(str::to_string)
            .or(env_state_dir)
            .filter(|s| !s.trim().is_empty());
        let state_dir = match &override_src {
            Some(src) => to_abs(repo_root, src),
            None => to_abs(&config_repo_root, &config.repo.state_dir),
        };

        let lock_dir = state_dir.join("locks");
        let orch_dir = state_dir.join("orchestrator");
        let updates_file = state_dir.join("LATEST_UPDATES.md");

        let owners = config.owners.clone();
        let owners_by_key = owners
            .iter()
            .map(|(name, scope)| (owner_key(name), scope.clone()))
            .collect();

        Self {
            repo_root: repo_root.to_path_buf(),
            repo_name: repo_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            base_branch: config.repo.base_branch.clone(),
            todo_file,
            state_dir,
            lock_dir,
            orch_dir,
            updates_file,
            worktree_parent,
            config_path: config_path.to_path_buf(),
            runtime: config.runtime.clone(),
            todo: config.todo.clone(),
            owners,
            owners_by_key,
        }
    }

    pub fn scope_for_owner(&self, owner: &str) -> Option<&str> {
        self.owners_by_key
            .get(&owner_key(owner))
            .map(String::as_str)
    }

    pub fn lock_path(&self, scope: &str) -> PathBuf {
        self.lock_dir.join(format!("{scope}.lock"))
    }

    pub fn pid_meta_path(&self, task_id: &TaskId) -> PathBuf {
        self.orch_dir.join(format!("{}.pid", slug(&task_id.0)))
    }

    pub fn run_lock_dir(&self) -> PathBuf {
        self.orch_dir.join("run.lock")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.orch_dir.join("active_pids.tsv")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.orch_dir.join("logs")
    }
}

/// Default config location for a repository.
pub fn default_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".state").join("orchestrator.toml")
}

fn config_repo_root(config_path: &Path, fallback: &Path) -> PathBuf {
    let parent = match config_path.parent() {
        Some(parent) => parent,
        None => return fallback.to_path_buf(),
    };
    if parent.file_name().is_some_and(|n| n == ".state") {
        if let Some(repo) = parent.parent() {
            return repo.to_path_buf();
        }
    }
    fallback.to_path_buf()
}

fn to_abs(base: &Path, value: &str) -> PathBuf {
    let candidate = PathBuf::from(value);
    if candidate.is_absolute() {
        normalize(&candidate)
    } else {
        normalize(&base.join(candidate))
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching the
/// filesystem, so paths that do not exist yet still compare canonically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{default_config_path, normalize, Context};
    use crate::config::OrchestratorConfig;
    use crate::types::TaskId;

    fn resolve(repo: &str, state_arg: Option<&str>, env: Option<&str>) -> Context {
        let repo_root = PathBuf::from(repo);
        let config = OrchestratorConfig::default();
        Context::resolve_with(
            &repo_root,
            &config,
            &default_config_path(&repo_root),
            state_arg,
            env.map(str::to_string),
        )
    }

    #[test]
    fn default_layout_hangs_off_repo_state_dir() {
        let ctx = resolve("/work/myrepo", None, None);

        assert_eq!(ctx.state_dir, PathBuf::from("/work/myrepo/.state"));
        assert_eq!(ctx.lock_dir, PathBuf::from("/work/myrepo/.state/locks"));
        assert_eq!(
            ctx.orch_dir,
            PathBuf::from("/work/myrepo/.state/orchestrator")
        );
        assert_eq!(
            ctx.updates_file,
            PathBuf::from("/work/myrepo/.state/LATEST_UPDATES.md")
        );
        assert_eq!(ctx.todo_file, PathBuf::from("/work/myrepo/TODO.md"));
        assert_eq!(
            ctx.worktree_parent,
            PathBuf::from("/work/myrepo-worktrees")
        );
    }

    #[test]
    fn state_dir_argument_wins_over_environment() {
        let ctx = resolve("/work/myrepo", Some("/tmp/override"), Some("/tmp/env"));
        assert_eq!(ctx.state_dir, PathBuf::from("/tmp/override"));

        let ctx = resolve("/work/myrepo", None, Some("/tmp/env"));
        assert_eq!(ctx.state_dir, PathBuf::from("/tmp/env"));
    }

    #[test]
    fn relative_state_override_resolves_from_invocation_repo() {
        let ctx = resolve("/work/myrepo", Some(".coord"), None);
        assert_eq!(ctx.state_dir, PathBuf::from("/work/myrepo/.coord"));
    }

    #[test]
    fn owner_lookup_is_key_insensitive() {
        let ctx = resolve("/work/myrepo", None, None);
        assert_eq!(ctx.scope_for_owner("AgentA"), Some("app-shell"));
        assert_eq!(ctx.scope_for_owner("agent-a"), Some("app-shell"));
        assert_eq!(ctx.scope_for_owner("Nobody"), None);
    }

    #[test]
    fn state_paths_use_task_slug() {
        let ctx = resolve("/work/myrepo", None, None);
        assert_eq!(
            ctx.pid_meta_path(&TaskId::new("T9-301")),
            PathBuf::from("/work/myrepo/.state/orchestrator/t9-301.pid")
        );
        assert_eq!(
            ctx.lock_path("app-shell"),
            PathBuf::from("/work/myrepo/.state/locks/app-shell.lock")
        );
        assert_eq!(
            ctx.run_lock_dir(),
            PathBuf::from("/work/myrepo/.state/orchestrator/run.lock")
        );
    }

    #[test]
    fn normalize_is_lexical() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize(Path::new("/a/..")), PathBuf::from("/"));
    }

    #[test]
    fn config_anchored_in_foreign_state_dir_rebases_board_paths() {
        let repo_root = PathBuf::from("/work/invoked");
        let config = OrchestratorConfig::default();
        let ctx = Context::resolve_with(
            &repo_root,
            &config,
            Path::new("/work/other/.state/orchestrator.toml"),
            None,
            None,
        );

        assert_eq!(ctx.todo_file, PathBuf::from("/work/other/TODO.md"));
        assert_eq!(ctx.state_dir, PathBuf::from("/work/other/.state"));
        assert_eq!(ctx.worktree_parent, PathBuf::from("/work/other-worktrees"));
    }
}
