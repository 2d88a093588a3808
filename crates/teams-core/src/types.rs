//! Core identifiers for the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier as written on the TODO board, e.g. `T1-001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Canonical form is `T<digits>-<digits>`.
    pub fn is_canonical(&self) -> bool {
        let rest = match self.0.strip_prefix('T') {
            Some(rest) => rest,
            None => return false,
        };
        let mut parts = rest.splitn(2, '-');
        let (lhs, rhs) = match (parts.next(), parts.next()) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => return false,
        };
        !lhs.is_empty()
            && !rhs.is_empty()
            && lhs.chars().all(|c| c.is_ascii_digit())
            && rhs.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Worker identity as written in the Owner column, e.g. `AgentA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentName(pub String);

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutex domain name; at most one active lock per scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(pub String);

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gate dependency token, e.g. `G3`.
pub fn is_gate_id(token: &str) -> bool {
    token
        .strip_prefix('G')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// Canonical board statuses. The board itself stores free text; localized
/// "done" spellings are matched through [`TaskStatus::is_done_keyword`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "TODO" => Some(TaskStatus::Todo),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "BLOCKED" => Some(TaskStatus::Blocked),
            "DONE" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    /// True when `raw` spells "done" under the configured keyword set.
    /// Matching is case-insensitive, as `Complete`/`complete` share an entry.
    pub fn is_done_keyword(raw: &str, done_keywords: &[String]) -> bool {
        let needle = raw.trim().to_lowercase();
        done_keywords.iter().any(|kw| kw.to_lowercase() == needle)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker launch backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchBackend {
    Auto,
    Tmux,
    CodexExec,
}

impl LaunchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchBackend::Auto => "auto",
            LaunchBackend::Tmux => "tmux",
            LaunchBackend::CodexExec => "codex_exec",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Some(LaunchBackend::Auto),
            "tmux" => Some(LaunchBackend::Tmux),
            "codex_exec" => Some(LaunchBackend::CodexExec),
            _ => None,
        }
    }
}

impl fmt::Display for LaunchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case- and punctuation-insensitive owner projection. `AgentA`, `agent-a`,
/// and `agenta` all address the same owner map entry.
pub fn owner_key(owner: &str) -> String {
    owner
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Filesystem/branch-safe projection: lowercase, alphanumerics kept, every
/// other run of characters becomes a single `-`, edges trimmed.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
