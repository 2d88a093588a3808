//! Markdown TODO table model.
//!
//! The board is operator-authored markdown; mutations must leave everything
//! the operator wrote untouched. Rows are addressed through the configured
//! column schema (1-based over the pipe-split row including the empty edge
//! cells) and rewrites replace exactly one cell of one line, via a
//! write-temp-then-rename of the whole file.

use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use teams_core::config::TodoSchemaConfig;
use teams_core::types::{is_gate_id, TaskStatus};

pub const DEFAULT_BOARD_HEADER: &str = "# TODO Board

| ID | Title | Owner | Deps | Notes | Status |
|---|---|---|---|---|---|
";

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("TODO file not found: {path}")]
    Missing { path: PathBuf },
    #[error("failed to read TODO file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write TODO file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("task id not found on board: {task_id}")]
    TaskNotFound { task_id: String },
    #[error("task id already present on board: {task_id}")]
    DuplicateTask { task_id: String },
    #[error("invalid task id {task_id}: {reason}")]
    InvalidTaskId { task_id: String, reason: String },
    #[error("invalid dependency {dep}: not an existing task id or gate")]
    InvalidDep { dep: String },
    #[error("invalid status value: {status}")]
    InvalidStatus { status: String },
    #[error("row for {task_id} has no cell at status column {column}")]
    StatusColumnOutOfRange { task_id: String, column: usize },
    #[error("invalid gate regex {pattern}: {source}")]
    GateRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub deps: String,
    pub notes: String,
    pub status: String,
    line_index: usize,
}

impl TaskRow {
    /// Dep tokens, skipping blanks; the `-` sentinel yields none.
    pub fn dep_tokens(&self) -> Vec<String> {
        let raw = self.deps.trim();
        if raw.is_empty() || raw == "-" {
            return Vec::new();
        }
        raw.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug)]
pub struct Board {
    path: PathBuf,
    schema: TodoSchemaConfig,
    lines: Vec<String>,
}

impl Board {
    /// Load the board, creating a header-only file when missing.
    pub fn open_or_create(
        path: impl Into<PathBuf>,
        schema: &TodoSchemaConfig,
    ) -> Result<Self, BoardError> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| BoardError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, DEFAULT_BOARD_HEADER).map_err(|source| BoardError::Write {
                path: path.clone(),
                source,
            })?;
        }
        Self::open(path, schema)
    }

    pub fn open(path: impl Into<PathBuf>, schema: &TodoSchemaConfig) -> Result<Self, BoardError> {
        let path = path.into();
        if !path.exists() {
            return Err(BoardError::Missing { path });
        }
        let body = fs::read_to_string(&path).map_err(|source| BoardError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            schema: schema.clone(),
            lines: body.lines().map(str::to_string).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All data rows, in file order.
    pub fn list_tasks(&self) -> Vec<TaskRow> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(line_index, line)| self.parse_task_row(line, line_index))
            .collect()
    }

    pub fn find_task(&self, task_id: &str) -> Option<TaskRow> {
        self.list_tasks().into_iter().find(|row| row.id == task_id)
    }

    /// `task_id -> raw status` index over the current rows.
    pub fn status_index(&self) -> BTreeMap<String, String> {
        self.list_tasks()
            .into_iter()
            .map(|row| (row.id, row.status))
            .collect()
    }

    /// Gate markers anywhere in the file: `gate_id -> "DONE" | "PENDING"`.
    pub fn gates(&self) -> Result<BTreeMap<String, String>, BoardError> {
        let gate_re =
            Regex::new(&self.schema.gate_regex).map_err(|source| BoardError::GateRegex {
                pattern: self.schema.gate_regex.clone(),
                source,
            })?;
        let state_re = Regex::new(r"\(([^)]*)\)").expect("static gate state pattern");

        let mut gates = BTreeMap::new();
        for line in &self.lines {
            let Some(caps) = gate_re.captures(line) else {
                continue;
            };
            let Some(token) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let gate_id = token.split(' ').next().unwrap_or_default().to_string();
            if gate_id.is_empty() {
                continue;
            }
            let state = state_re
                .captures(token)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            let done = TaskStatus::is_done_keyword(state, &self.schema.done_keywords);
            gates.insert(gate_id, if done { "DONE" } else { "PENDING" }.to_string());
        }
        Ok(gates)
    }

    /// True when every dep token of `deps` is satisfied: task deps must be in
    /// a done status, gate deps must be marked DONE. Unknown tokens are never
    /// ready.
    pub fn deps_ready(
        &self,
        deps: &str,
        status_index: &BTreeMap<String, String>,
        gates: &BTreeMap<String, String>,
    ) -> bool {
        let raw = deps.trim();
        if raw.is_empty() || raw == "-" {
            return true;
        }

        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if is_gate_id(token) {
                if gates.get(token).map(String::as_str) != Some("DONE") {
                    return false;
                }
            } else if looks_like_task_id(token) {
                let done = status_index
                    .get(token)
                    .is_some_and(|s| TaskStatus::is_done_keyword(s, &self.schema.done_keywords));
                if !done {
                    return false;
                }
            } else {
                return false;
            }
        }
        true
    }

    /// Rewrite only the status cell of the row for `task_id`, leaving every
    /// other byte of the file intact.
    pub fn update_status(&mut self, task_id: &str, new_status: &str) -> Result<(), BoardError> {
        let status = new_status.trim();
        if status.is_empty() || status.contains('|') {
            return Err(BoardError::InvalidStatus {
                status: new_status.to_string(),
            });
        }

        let row = self
            .find_task(task_id)
            .ok_or_else(|| BoardError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let line = self.lines[row.line_index].clone();
        let rewritten = rewrite_cell(&line, self.schema.status_col, status).ok_or(
            BoardError::StatusColumnOutOfRange {
                task_id: task_id.to_string(),
                column: self.schema.status_col,
            },
        )?;
        self.lines[row.line_index] = rewritten;
        self.save()
    }

    /// Insert a new row after the last table row.
    pub fn append_row(
        &mut self,
        task_id: &str,
        title: &str,
        owner: &str,
        deps: &[String],
        status: TaskStatus,
    ) -> Result<(), BoardError> {
        if task_id.trim().is_empty() {
            return Err(BoardError::InvalidTaskId {
                task_id: task_id.to_string(),
                reason: "empty id".to_string(),
            });
        }
        if task_id.contains('|') {
            return Err(BoardError::InvalidTaskId {
                task_id: task_id.to_string(),
                reason: "id must not contain '|'".to_string(),
            });
        }
        if self.find_task(task_id).is_some() {
            return Err(BoardError::DuplicateTask {
                task_id: task_id.to_string(),
            });
        }

        let known: BTreeMap<String, String> = self.status_index();
        for dep in deps {
            let dep = dep.trim();
            if dep == "-" || dep.is_empty() {
                continue;
            }
            if !known.contains_key(dep) && !is_gate_id(dep) {
                return Err(BoardError::InvalidDep {
                    dep: dep.to_string(),
                });
            }
        }

        let deps_cell = if deps.is_empty() {
            "-".to_string()
        } else {
            deps.iter()
                .map(|d| d.trim())
                .filter(|d| !d.is_empty())
                .collect::<Vec<_>>()
                .join(",")
        };
        let deps_cell = if deps_cell.is_empty() { "-".to_string() } else { deps_cell };

        let width = [
            self.schema.id_col,
            self.schema.title_col,
            self.schema.owner_col,
            self.schema.deps_col,
            self.schema.notes_col,
            self.schema.status_col,
        ]
        .into_iter()
        .max()
        .unwrap_or(7)
            - 1;
        let mut cells = vec![String::new(); width];
        let mut put = |col: usize, value: &str| {
            if col >= 2 && col - 2 < cells.len() {
                cells[col - 2] = value.to_string();
            }
        };
        put(self.schema.id_col, task_id);
        put(self.schema.title_col, title);
        put(self.schema.owner_col, owner);
        put(self.schema.deps_col, &deps_cell);
        put(self.schema.status_col, status.as_str());

        let rendered = format!(
            "|{}|",
            cells
                .iter()
                .map(|c| format!(" {} ", escape_pipes(c)))
                .collect::<Vec<_>>()
                .join("|")
        );

        let insert_after = self
            .lines
            .iter()
            .rposition(|line| parse_markdown_row(line).is_some());
        match insert_after {
            Some(idx) => self.lines.insert(idx + 1, rendered),
            None => {
                // No table yet: append a fresh header, then the row.
                for header_line in DEFAULT_BOARD_HEADER.lines().skip(2) {
                    self.lines.push(header_line.to_string());
                }
                self.lines.push(rendered);
            }
        }
        self.save()
    }

    fn parse_task_row(&self, line: &str, line_index: usize) -> Option<TaskRow> {
        let cells = parse_markdown_row(line)?;
        let field = |col: usize| -> String {
            // Column numbers are 1-based over ["", cells..., ""].
            if col < 2 || col - 2 >= cells.len() {
                return String::new();
            }
            cells[col - 2].clone()
        };

        let id = field(self.schema.id_col);
        if id.is_empty() || id == "ID" || id.chars().all(|c| c == '-') {
            return None;
        }

        Some(TaskRow {
            id,
            title: field(self.schema.title_col),
            owner: field(self.schema.owner_col),
            deps: field(self.schema.deps_col),
            notes: field(self.schema.notes_col),
            status: field(self.schema.status_col),
            line_index,
        })
    }

    fn save(&self) -> Result<(), BoardError> {
        let mut body = self.lines.join("\n");
        body.push('\n');

        let tmp = self.path.with_file_name(format!(
            ".{}.tmp-{}",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "TODO.md".to_string()),
            std::process::id()
        ));
        fs::write(&tmp, &body).map_err(|source| BoardError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            BoardError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

fn looks_like_task_id(token: &str) -> bool {
    teams_core::types::TaskId::new(token).is_canonical()
}

fn escape_pipes(value: &str) -> String {
    value.replace('|', "\\|")
}

/// Split a table row into trimmed cell contents, honouring `\|` escapes.
/// Returns `None` for lines that are not table rows.
pub fn parse_markdown_row(line: &str) -> Option<Vec<String>> {
    let text = line.trim();
    if !text.starts_with('|') || !text.ends_with('|') || text.len() < 2 {
        return None;
    }

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
    Some(cells)
}

/// Replace the raw content of one cell, preserving the rest of the line
/// byte-for-byte. `column` uses the same 1-based padded numbering as the
/// schema. Returns `None` when the line has no such cell.
fn rewrite_cell(line: &str, column: usize, value: &str) -> Option<String> {
    let trimmed_start = line.len() - line.trim_start().len();
    let text = line.trim();
    if !text.starts_with('|') || !text.ends_with('|') {
        return None;
    }

    // Byte offsets of unescaped pipes within `text`.
    let mut pipe_offsets = Vec::new();
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '|' => pipe_offsets.push(idx),
            _ => {}
        }
    }
    if pipe_offsets.len() < 2 {
        return None;
    }

    // Cell k sits between pipe k and pipe k+1; schema column c maps to cell
    // c-2 of that sequence.
    let cell = column.checked_sub(2)?;
    if cell + 1 >= pipe_offsets.len() {
        return None;
    }
    let start = pipe_offsets[cell] + 1;
    let end = pipe_offsets[cell + 1];

    let mut rebuilt = String::with_capacity(line.len());
    rebuilt.push_str(&line[..trimmed_start]);
    rebuilt.push_str(&text[..start]);
    rebuilt.push_str(&format!(" {value} "));
    rebuilt.push_str(&text[end..]);
    Some(rebuilt)
}
