//! Backend selection and worker flag policy.

use std::process::Command;

use teams_core::types::LaunchBackend;

use crate::error::LaunchError;

pub const BYPASS_FLAG: &str = "--dangerously-bypass-approvals-and-sandbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBackend {
    Tmux,
    CodexExec,
}

impl ResolvedBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedBackend::Tmux => "tmux",
            ResolvedBackend::CodexExec => "codex_exec",
        }
    }
}

/// Resolve the configured backend, validating it before any mutation.
///
/// An explicit `tmux` selection fails fast when the binary is unusable; the
/// scheduler turns that into a suggestion to retry with `--no-launch`. Only
/// `auto` may fall back to the direct backend.
pub fn resolve_backend(
    configured: LaunchBackend,
    tmux_bin: &str,
) -> Result<ResolvedBackend, LaunchError> {
    match configured {
        LaunchBackend::Tmux => {
            tmux_usable(tmux_bin)?;
            Ok(ResolvedBackend::Tmux)
        }
        LaunchBackend::CodexExec => Ok(ResolvedBackend::CodexExec),
        LaunchBackend::Auto => match tmux_usable(tmux_bin) {
            Ok(()) => Ok(ResolvedBackend::Tmux),
            Err(_) => Ok(ResolvedBackend::CodexExec),
        },
    }
}

fn tmux_usable(tmux_bin: &str) -> Result<(), LaunchError> {
    let output = Command::new(tmux_bin)
        .arg("-V")
        .output()
        .map_err(|err| LaunchError::TmuxUnavailable {
            detail: format!("{tmux_bin}: {err}"),
        })?;
    if !output.status.success() {
        return Err(LaunchError::TmuxUnavailable {
            detail: format!(
                "{tmux_bin} -V exited with {:?}",
                output.status.code()
            ),
        });
    }
    Ok(())
}

/// Workers need write access to git lock files under `.git/worktrees`, which
/// the default `--full-auto` sandbox forbids. When the configured flags set
/// no sandbox mode themselves, swap `--full-auto` for the bypass flag (or add
/// it when neither is present).
pub fn apply_sandbox_policy(flags: &str) -> Vec<String> {
    let mut tokens = split_flags(flags);
    let sets_sandbox = tokens
        .iter()
        .any(|t| t == "--sandbox" || t.starts_with("--sandbox=") || t == BYPASS_FLAG);
    if sets_sandbox {
        return tokens;
    }

    if let Some(slot) = tokens.iter_mut().find(|t| t.as_str() == "--full-auto") {
        *slot = BYPASS_FLAG.to_string();
    } else {
        tokens.push(BYPASS_FLAG.to_string());
    }
    tokens
}

/// Shell-style flag splitting: whitespace separated, single and double quotes
/// group, backslash escapes inside double quotes.
pub fn split_flags(flags: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut has_token = false;

    for c in flags.chars() {
        if escaped {
            buf.push(c);
            escaped = false;
            continue;
        }
        if in_single {
            if c == '\'' {
                in_single = false;
            } else {
                buf.push(c);
            }
            continue;
        }
        if in_double {
            match c {
                '"' => in_double = false,
                '\\' => escaped = true,
                other => buf.push(other),
            }
            continue;
        }
        match c {
            '\'' => {
                in_single = true;
                has_token = true;
            }
            '"' => {
                in_double = true;
                has_token = true;
            }
            c if c.is_whitespace() => {
                if has_token {
                    tokens.push(std::mem::take(&mut buf));
                    has_token = false;
                }
            }
            other => {
                buf.push(other);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(buf);
    }
    tokens
}

/// Single-quote a value for embedding into a shell command line.
pub fn shell_quote(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}
