//! `init` / `task init`: bootstrap the config, the board, and (optionally)
//! the gitignore entries for orchestrator state.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::Path;

use teams_board::Board;

use crate::error::EngineError;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitignoreMode {
    Ask,
    Yes,
    No,
}

impl GitignoreMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ask" => Some(GitignoreMode::Ask),
            "yes" => Some(GitignoreMode::Yes),
            "no" => Some(GitignoreMode::No),
            _ => None,
        }
    }
}

/// Session loading has already bootstrapped the config file; this makes the
/// rest of the layout real (board, state dirs, gitignore entries).
pub fn run_init(session: &Session, gitignore: GitignoreMode) -> Result<(), EngineError> {
    let ctx = &session.ctx;

    let board = Board::open_or_create(&ctx.todo_file, &ctx.todo)?;
    println!("TODO board: {}", board.path().display());
    println!("Config: {}", ctx.config_path.display());

    for dir in [&ctx.lock_dir, &ctx.orch_dir, &ctx.log_dir()] {
        fs::create_dir_all(dir).map_err(|source| {
            EngineError::from(teams_state::StateError::CreateDir {
                path: dir.clone(),
                source,
            })
        })?;
    }
    println!("State dir: {}", ctx.state_dir.display());

    let apply_ignore = match gitignore {
        GitignoreMode::Yes => true,
        GitignoreMode::No => false,
        GitignoreMode::Ask => prompt_yes_no(
            "Add orchestrator state entries to .gitignore? [y/N] ",
        ),
    };
    if apply_ignore {
        let added = ensure_gitignore_entries(&session.checkout.root, &ignore_entries(session))
            .map_err(|source| {
                EngineError::from(teams_state::StateError::Write {
                    path: session.checkout.root.join(".gitignore"),
                    source,
                })
            })?;
        if added > 0 {
            println!("Added {added} entries to .gitignore");
        } else {
            println!(".gitignore already covers orchestrator state");
        }
    }

    Ok(())
}

fn ignore_entries(session: &Session) -> Vec<String> {
    let mut entries = vec![".state/".to_string()];
    // The worktree parent only needs ignoring when it nests inside the repo.
    if let Ok(rel) = session
        .ctx
        .worktree_parent
        .strip_prefix(&session.checkout.root)
    {
        if !rel.as_os_str().is_empty() {
            entries.push(format!("{}/", rel.display()));
        }
    }
    entries
}

/// Append missing entries; returns how many were added.
fn ensure_gitignore_entries(repo_root: &Path, entries: &[String]) -> std::io::Result<usize> {
    let path = repo_root.join(".gitignore");
    let existing: Vec<String> = match fs::read_to_string(&path) {
        Ok(body) => body.lines().map(|l| l.trim().to_string()).collect(),
        Err(_) => Vec::new(),
    };

    let missing: Vec<&String> = entries
        .iter()
        .filter(|entry| {
            !existing.iter().any(|line| {
                line.as_str() == entry.trim_end_matches('/') || line.as_str() == entry.as_str()
            })
        })
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let needs_newline = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
        && !existing.is_empty();
    if needs_newline {
        // Appending to a file whose last line may lack a terminator.
        writeln!(file)?;
    }
    for entry in &missing {
        writeln!(file, "{entry}")?;
    }
    Ok(missing.len())
}

fn prompt_yes_no(question: &str) -> bool {
    print!("{question}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}
