//! Shared types, configuration, and resolved path context for codex-teams.

pub mod config;
pub mod context;
pub mod types;

pub use config::{load_or_bootstrap_config, ConfigError, OrchestratorConfig};
pub use context::Context;
pub use types::{owner_key, slug, AgentName, LaunchBackend, Scope, TaskId, TaskStatus};
