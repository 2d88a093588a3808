//! Per-invocation session: repo discovery, config load, resolved context.

use std::path::{Path, PathBuf};

use teams_core::config::load_or_bootstrap_config;
use teams_core::context::{default_config_path, Context};
use teams_git::repo::{discover_primary_repo, discover_repo, is_primary_checkout};
use teams_git::{GitCli, RepoHandle};

use crate::error::EngineError;

pub const ALLOW_WORKTREE_RUN_ENV: &str = "AI_ORCH_ALLOW_WORKTREE_RUN";

#[derive(Debug, Clone)]
pub struct Session {
    pub ctx: Context,
    pub git: GitCli,
    /// The checkout the CLI was invoked from (may be a linked worktree).
    pub checkout: RepoHandle,
    /// The primary clone, resolved through the common git dir.
    pub primary: RepoHandle,
}

impl Session {
    /// Load config and resolve paths for one invocation. `repo_arg` anchors
    /// discovery; otherwise the current directory does.
    pub fn load(
        repo_arg: Option<&Path>,
        state_dir_arg: Option<&str>,
        config_arg: Option<&Path>,
    ) -> Result<Self, EngineError> {
        let git = GitCli::default();
        let start = match repo_arg {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir().map_err(|err| {
                EngineError::MissingPrerequisite(format!("cannot resolve working directory: {err}"))
            })?,
        };

        let checkout = discover_repo(&start, &git)?;
        let primary = discover_primary_repo(&checkout.root, &git)?;

        // Anchor config and board at the invoked checkout: inside a linked
        // worktree the board lives (and is committed) there, while the
        // shared coordination state arrives via --state-dir / AI_STATE_DIR.
        let config_path = match config_arg {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => checkout.root.join(path),
            None => default_config_path(&checkout.root),
        };
        let repo_name = checkout
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let config = load_or_bootstrap_config(&config_path, &repo_name)?;
        let ctx = Context::resolve(&checkout.root, &config, &config_path, state_dir_arg);

        Ok(Self {
            ctx,
            git,
            checkout,
            primary,
        })
    }

    pub fn invoked_from_primary(&self) -> Result<bool, EngineError> {
        Ok(is_primary_checkout(&self.checkout.root, &self.git)?)
    }

    pub fn worktree_run_allowed() -> bool {
        std::env::var(ALLOW_WORKTREE_RUN_ENV)
            .map(|v| v.trim() == "1")
            .unwrap_or(false)
    }

    /// The binary to hand to workers and watchers. Prefers a copy inside the
    /// primary repo, then the running executable when it lives outside every
    /// worktree, then plain PATH lookup.
    pub fn cli_binary_for_children(&self) -> PathBuf {
        resolve_cli_binary(&self.primary.root, std::env::current_exe().ok())
    }
}

/// Binary resolution ladder shared by launch and completion: a worktree-local
/// copy dies with its worktree, so it is never handed out.
pub fn resolve_cli_binary(primary_root: &Path, current_exe: Option<PathBuf>) -> PathBuf {
    if let Some(exe) = current_exe {
        if exe.starts_with(primary_root) {
            return exe;
        }
        // A build living inside some other checkout (a worktree) would
        // vanish on cleanup; map it to the primary's copy when one exists.
        if let Some(name) = exe.file_name() {
            let candidate = primary_root.join("target").join("release").join(name);
            if candidate.is_file() {
                return candidate;
            }
        }
        if !exe.as_os_str().is_empty() {
            return exe;
        }
    }
    PathBuf::from("codex-teams")
}
