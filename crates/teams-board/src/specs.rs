//! Per-task spec files under `tasks/specs/<task_id>.md`.
//!
//! A spec is valid iff each required H2 heading appears exactly once with at
//! least one non-blank body line before the next `##`. The index is a pure
//! function of the filesystem.

use std::fs;
use std::path::PathBuf;

pub const REQUIRED_SECTIONS: [&str; 3] = ["## Goal", "## In Scope", "## Acceptance Criteria"];
const SUMMARY_MAX_LEN: usize = 160;

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("failed to write task spec {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("task spec already exists: {path}")]
    AlreadyExists { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecStatus {
    Valid {
        goal_summary: String,
        in_scope_summary: String,
        acceptance_summary: String,
    },
    Missing,
    Invalid {
        reasons: Vec<String>,
    },
}

impl SpecStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SpecStatus::Valid { .. })
    }

    pub fn exists(&self) -> bool {
        !matches!(self, SpecStatus::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecIndex {
    repo_root: PathBuf,
}

impl SpecIndex {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn rel_path(task_id: &str) -> PathBuf {
        PathBuf::from("tasks").join("specs").join(format!("{task_id}.md"))
    }

    pub fn spec_path(&self, task_id: &str) -> PathBuf {
        self.repo_root.join(Self::rel_path(task_id))
    }

    pub fn validate(&self, task_id: &str) -> SpecStatus {
        let path = self.spec_path(task_id);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(_) => return SpecStatus::Missing,
        };
        validate_body(&body)
    }

    /// Write the scaffold template. Refuses to clobber unless `force`.
    pub fn scaffold(&self, task_id: &str, title: &str, force: bool) -> Result<PathBuf, SpecError> {
        let path = self.spec_path(task_id);
        if path.exists() && !force {
            return Err(SpecError::AlreadyExists { path });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SpecError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, scaffold_body(task_id, title)).map_err(|source| SpecError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

pub fn scaffold_body(task_id: &str, title: &str) -> String {
    format!(
        "# {task_id}: {title}\n\n## Goal\n\n{title}\n\n## In Scope\n\n- TBD\n\n## Acceptance Criteria\n\n- TBD\n"
    )
}

fn validate_body(body: &str) -> SpecStatus {
    let lines: Vec<&str> = body.lines().collect();
    let mut reasons = Vec::new();
    let mut summaries = Vec::new();

    for section in REQUIRED_SECTIONS {
        let occurrences: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.trim() == section)
            .map(|(idx, _)| idx)
            .collect();

        match occurrences.as_slice() {
            [] => {
                reasons.push(format!("missing section: {section}"));
                summaries.push(String::new());
            }
            [start] => match first_body_line(&lines, *start) {
                Some(summary) => summaries.push(truncate(&summary)),
                None => {
                    reasons.push(format!("empty section: {section}"));
                    summaries.push(String::new());
                }
            },
            _ => {
                reasons.push(format!("duplicated section: {section}"));
                summaries.push(String::new());
            }
        }
    }

    if reasons.is_empty() {
        let mut iter = summaries.into_iter();
        SpecStatus::Valid {
            goal_summary: iter.next().unwrap_or_default(),
            in_scope_summary: iter.next().unwrap_or_default(),
            acceptance_summary: iter.next().unwrap_or_default(),
        }
    } else {
        SpecStatus::Invalid { reasons }
    }
}

fn first_body_line(lines: &[&str], heading_index: usize) -> Option<String> {
    for line in lines.iter().skip(heading_index + 1) {
        let trimmed = line.trim();
        if trimmed.starts_with("##") {
            return None;
        }
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    None
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= SUMMARY_MAX_LEN {
        return value.to_string();
    }
    let mut out: String = value.chars().take(SUMMARY_MAX_LEN - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{scaffold_body, SpecIndex, SpecStatus};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("codex-teams-specs-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn write_spec(repo: &PathBuf, task_id: &str, body: &str) {
        let path = repo.join("tasks").join("specs").join(format!("{task_id}.md"));
        fs::create_dir_all(path.parent().unwrap()).expect("create specs dir");
        fs::write(path, body).expect("write spec");
    }

    #[test]
    fn complete_spec_is_valid_with_section_summaries() {
        let repo = unique_temp_dir("valid");
        write_spec(
            &repo,
            "T1-001",
            "# T1-001\n\n## Goal\n\nShip the app shell.\nMore detail here.\n\n## In Scope\n\n- bootstrap\n\n## Acceptance Criteria\n\n- builds green\n",
        );

        let index = SpecIndex::new(&repo);
        match index.validate("T1-001") {
            SpecStatus::Valid {
                goal_summary,
                in_scope_summary,
                acceptance_summary,
            } => {
                assert_eq!(goal_summary, "Ship the app shell.");
                assert_eq!(in_scope_summary, "- bootstrap");
                assert_eq!(acceptance_summary, "- builds green");
            }
            other => panic!("expected valid spec, got {other:?}"),
        }

        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn missing_file_reports_missing() {
        let repo = unique_temp_dir("missing");
        let index = SpecIndex::new(&repo);
        assert_eq!(index.validate("T1-001"), SpecStatus::Missing);
        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn absent_and_empty_sections_are_invalid_with_reasons() {
        let repo = unique_temp_dir("invalid");
        write_spec(
            &repo,
            "T1-001",
            "## Goal\n\n## In Scope\n\n- something\n",
        );

        let index = SpecIndex::new(&repo);
        match index.validate("T1-001") {
            SpecStatus::Invalid { reasons } => {
                assert!(reasons.iter().any(|r| r == "empty section: ## Goal"));
                assert!(reasons
                    .iter()
                    .any(|r| r == "missing section: ## Acceptance Criteria"));
            }
            other => panic!("expected invalid spec, got {other:?}"),
        }

        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn duplicated_section_is_invalid() {
        let repo = unique_temp_dir("dup");
        write_spec(
            &repo,
            "T1-001",
            "## Goal\n\na\n\n## Goal\n\nb\n\n## In Scope\n\nc\n\n## Acceptance Criteria\n\nd\n",
        );

        let index = SpecIndex::new(&repo);
        match index.validate("T1-001") {
            SpecStatus::Invalid { reasons } => {
                assert!(reasons.iter().any(|r| r == "duplicated section: ## Goal"));
            }
            other => panic!("expected invalid spec, got {other:?}"),
        }

        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn scaffold_writes_a_valid_spec_and_respects_force() {
        let repo = unique_temp_dir("scaffold");
        let index = SpecIndex::new(&repo);

        index.scaffold("T1-001", "App shell bootstrap", false).expect("scaffold");
        assert!(index.validate("T1-001").is_valid());

        let err = index
            .scaffold("T1-001", "App shell bootstrap", false)
            .expect_err("second scaffold without force must fail");
        assert!(err.to_string().contains("already exists"));

        index.scaffold("T1-001", "Replacement", true).expect("forced scaffold");
        let body = fs::read_to_string(index.spec_path("T1-001")).expect("read spec");
        assert!(body.contains("Replacement"));

        let _ = fs::remove_dir_all(repo);
    }

    #[test]
    fn scaffold_template_contains_required_sections() {
        let body = scaffold_body("T2-010", "Do the thing");
        for section in super::REQUIRED_SECTIONS {
            assert!(body.contains(section), "missing {section}");
        }
    }
}
