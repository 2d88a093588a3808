//! Append-only update log (`LATEST_UPDATES.md`).
//!
//! A markdown table the operators actually read, so appends preserve the
//! table shape. The log is advisory: callers report append failures and move
//! on rather than aborting their pipeline.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::StateError;

const HEADER: &str = "| Timestamp (UTC) | Agent | Task | Status | Summary |\n|---|---|---|---|---|\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntry {
    pub timestamp: String,
    pub agent: String,
    pub task_id: String,
    pub status: String,
    pub summary: String,
}

/// Append one timestamped row, creating the file with its header on first
/// use. Cell content is pipe-escaped so summaries cannot break the table.
pub fn append_update(
    path: &Path,
    agent: &str,
    task_id: &str,
    status: &str,
    summary: &str,
) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StateError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let fresh = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StateError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    let mut body = String::new();
    if fresh {
        body.push_str(HEADER);
    }
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    body.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n",
        timestamp,
        escape_cell(agent),
        escape_cell(task_id),
        escape_cell(status),
        escape_cell(summary),
    ));

    file.write_all(body.as_bytes())
        .map_err(|source| StateError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Advisory append: failures go to stderr, never to the caller.
pub fn append_update_best_effort(path: &Path, agent: &str, task_id: &str, status: &str, summary: &str) {
    if let Err(err) = append_update(path, agent, task_id, status, summary) {
        eprintln!("warning: update log append failed: {err}");
    }
}

/// Read the newest `limit` entries, newest first. Missing or unreadable file
/// yields an empty list.
pub fn read_recent(path: &Path, limit: usize) -> Vec<UpdateEntry> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(_) => return Vec::new(),
    };

    let mut entries: Vec<UpdateEntry> = body.lines().filter_map(parse_row).collect();
    if limit > 0 && entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
    entries.reverse();
    entries
}

fn parse_row(line: &str) -> Option<UpdateEntry> {
    let text = line.trim();
    if !text.starts_with('|') || !text.ends_with('|') {
        return None;
    }

    let cells = split_cells(text);
    if cells.len() < 5 {
        return None;
    }
    if cells[0].to_lowercase().starts_with("timestamp") {
        return None;
    }
    if cells
        .iter()
        .all(|cell| cell.is_empty() || cell.chars().all(|c| c == '-'))
    {
        return None;
    }

    Some(UpdateEntry {
        timestamp: cells[0].clone(),
        agent: cells[1].clone(),
        task_id: cells[2].clone(),
        status: cells[3].clone(),
        summary: cells[4].clone(),
    })
}

fn split_cells(text: &str) -> Vec<String> {
    let inner = &text[1..text.len() - 1];
    let mut cells = Vec::new();
    let mut buf = String::new();
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            if c != '|' {
                buf.push('\\');
            }
            buf.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '|' => {
                cells.push(buf.trim().to_string());
                buf.clear();
            }
            other => buf.push(other),
        }
    }
    if escaped {
        buf.push('\\');
    }
    cells.push(buf.trim().to_string());
    cells
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}
