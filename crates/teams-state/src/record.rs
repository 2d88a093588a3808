//! Line-oriented `key=value` records.
//!
//! The on-disk format is part of the external contract: one `key=value` pair
//! per line, first match wins on read, unknown lines ignored. Readers never
//! fail on a missing file.

use std::fs;
use std::path::Path;

use crate::error::StateError;

/// Read a single field. Returns the empty string when the file or the key is
/// absent, and never errors on missing files.
pub fn read_field(path: &Path, key: &str) -> String {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(_) => return String::new(),
    };
    for line in body.lines() {
        if let Some((lhs, rhs)) = line.split_once('=') {
            if lhs.trim() == key {
                return rhs.trim().to_string();
            }
        }
    }
    String::new()
}

/// Read every pair in file order. Missing file yields an empty list.
pub fn read_pairs(path: &Path) -> Vec<(String, String)> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(_) => return Vec::new(),
    };
    body.lines()
        .filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

pub fn render_pairs(pairs: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Write the record atomically: temp file in the same directory, then rename
/// over the destination. Parent directories are created lazily.
pub fn write_pairs_atomic(path: &Path, pairs: &[(String, String)]) -> Result<(), StateError> {
    write_atomic(path, &render_pairs(pairs))
}

pub fn write_atomic(path: &Path, body: &str) -> Result<(), StateError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| StateError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let tmp = temp_sibling(path);
    fs::write(&tmp, body).map_err(|source| StateError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StateError::Write {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(())
}

fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    path.with_file_name(format!(".{name}.tmp-{pid}-{nanos}"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{read_field, read_pairs, write_pairs_atomic};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("codex-teams-record-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn read_field_returns_empty_for_missing_file_and_key() {
        let dir = unique_temp_dir("missing");
        let path = dir.join("nothing.pid");

        assert_eq!(read_field(&path, "pid"), "");

        fs::write(&path, "task_id=T1-001\n").expect("write record");
        assert_eq!(read_field(&path, "pid"), "");
        assert_eq!(read_field(&path, "task_id"), "T1-001");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn read_field_trims_and_ignores_malformed_lines() {
        let dir = unique_temp_dir("trim");
        let path = dir.join("lock");
        fs::write(&path, "garbage line\n owner = AgentA \nscope=app-shell\n")
            .expect("write record");

        assert_eq!(read_field(&path, "owner"), "AgentA");
        assert_eq!(read_field(&path, "scope"), "app-shell");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn write_then_read_round_trips_pairs() {
        let dir = unique_temp_dir("roundtrip");
        let path = dir.join("sub").join("meta.pid");
        let pairs = vec![
            ("pid".to_string(), "4242".to_string()),
            ("task_id".to_string(), "T9-301".to_string()),
            ("worktree".to_string(), "/tmp/wt path".to_string()),
        ];

        write_pairs_atomic(&path, &pairs).expect("atomic write");
        assert_eq!(read_pairs(&path), pairs);

        // No temp droppings left beside the record.
        let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(siblings.len(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rewrite_replaces_previous_content_entirely() {
        let dir = unique_temp_dir("rewrite");
        let path = dir.join("meta.pid");

        write_pairs_atomic(&path, &[("a".to_string(), "1".to_string())]).expect("first write");
        write_pairs_atomic(&path, &[("b".to_string(), "2".to_string())]).expect("second write");

        assert_eq!(read_field(&path, "a"), "");
        assert_eq!(read_field(&path, "b"), "2");

        let _ = fs::remove_dir_all(dir);
    }
}
