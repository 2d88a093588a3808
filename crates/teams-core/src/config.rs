use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::LaunchBackend;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub repo: RepoConfig,
    pub owners: BTreeMap<String, String>,
    pub runtime: RuntimeConfig,
    pub todo: TodoSchemaConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let owners = [
            ("AgentA", "app-shell"),
            ("AgentB", "domain-core"),
            ("AgentC", "provider-openai"),
            ("AgentD", "ui-popover"),
            ("AgentE", "ci-release"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            repo: RepoConfig::default(),
            owners,
            runtime: RuntimeConfig::default(),
            todo: TodoSchemaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub base_branch: String,
    pub todo_file: String,
    pub state_dir: String,
    /// May contain the `<repo>` placeholder, expanded at resolve time.
    pub worktree_parent: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            todo_file: "TODO.md".to_string(),
            state_dir: ".state".to_string(),
            worktree_parent: "../<repo>-worktrees".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 0 means "no cap" on how many ready tasks a single run may start.
    pub max_start: u32,
    pub launch_backend: LaunchBackend,
    pub auto_no_launch: bool,
    pub codex_flags: String,
    pub merge_strategy: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_start: 0,
            launch_backend: LaunchBackend::Tmux,
            auto_no_launch: false,
            codex_flags:
                "--full-auto -m gpt-5.3-codex -c model_reasoning_effort=\"medium\"".to_string(),
            merge_strategy: "rebase-then-ff".to_string(),
        }
    }
}

/// Column numbers are 1-based over the pipe-split row including the empty
/// edge cells, matching the on-disk schema contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodoSchemaConfig {
    pub id_col: usize,
    pub title_col: usize,
    pub owner_col: usize,
    pub deps_col: usize,
    pub notes_col: usize,
    pub status_col: usize,
    pub gate_regex: String,
    pub done_keywords: Vec<String>,
}

impl Default for TodoSchemaConfig {
    fn default() -> Self {
        Self {
            id_col: 2,
            title_col: 3,
            owner_col: 4,
            deps_col: 5,
            notes_col: 6,
            status_col: 7,
            gate_regex: r"`(G[0-9]+ \([^)]+\))`".to_string(),
            done_keywords: vec![
                "DONE".to_string(),
                "완료".to_string(),
                "Complete".to_string(),
                "complete".to_string(),
            ],
        }
    }
}

pub fn parse_config(contents: &str, path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig =
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<OrchestratorConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body, path_ref)
}

/// Load the config, writing the default template first when the file does not
/// exist yet. `repo_name` fills the `<repo>` placeholder in the template so a
/// freshly bootstrapped file is immediately usable.
pub fn load_or_bootstrap_config(
    path: impl AsRef<Path>,
    repo_name: &str,
) -> Result<OrchestratorConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        bootstrap_config(path_ref, repo_name)?;
    }
    load_config(path_ref)
}

pub fn bootstrap_config(path: &Path, repo_name: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut config = OrchestratorConfig::default();
    config.repo.worktree_parent = config.repo.worktree_parent.replace("<repo>", repo_name);

    let body = toml::to_string_pretty(&config).map_err(|source| ConfigError::Invalid {
        message: format!("default config did not serialize: {source}"),
    })?;
    fs::write(path, body).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn validate_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.owners.is_empty() {
        return Err(ConfigError::Invalid {
            message: "[owners] must be a non-empty table".to_string(),
        });
    }

    for (name, col) in [
        ("id_col", config.todo.id_col),
        ("title_col", config.todo.title_col),
        ("owner_col", config.todo.owner_col),
        ("deps_col", config.todo.deps_col),
        ("status_col", config.todo.status_col),
    ] {
        if col < 1 {
            return Err(ConfigError::Invalid {
                message: format!("todo.{name} must be an integer >= 1"),
            });
        }
    }

    if config.todo.done_keywords.is_empty() {
        return Err(ConfigError::Invalid {
            message: "todo.done_keywords must be a non-empty list".to_string(),
        });
    }

    match config.runtime.merge_strategy.as_str() {
        "ff-only" | "rebase-then-ff" => {}
        other => {
            return Err(ConfigError::Invalid {
                message: format!(
                    "runtime.merge_strategy must be ff-only or rebase-then-ff, got {other}"
                ),
            });
        }
    }

    Ok(())
}
