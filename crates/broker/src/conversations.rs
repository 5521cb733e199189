//! Read-only access to the LLM-CLI's on-disk conversation history.
//!
//! The CLI stores one append-only JSON-lines file per session under
//! `<projects_dir>/<sanitized cwd>/<session_id>.jsonl`, where
//! sanitization replaces every `/` with `-`. The broker only indexes and
//! slices these files; it never writes them.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::util::expand_tilde;

/// Sanitize a working directory into the CLI's storage directory name.
pub fn sanitize_project_path(cwd: &str) -> String {
    cwd.replace('/', "-")
}

fn project_dir(projects_dir: &str, cwd: &str) -> PathBuf {
    expand_tilde(projects_dir).join(sanitize_project_path(cwd))
}

/// Extract the preview text of the last real user message by scanning
/// the file backwards. Tool results are skipped; only text content
/// counts.
fn last_user_message(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    for line in content.lines().rev() {
        let Ok(data) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if data.get("type").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let message_content = data.get("message").and_then(|m| m.get("content"));
        match message_content {
            Some(Value::String(text)) if !text.is_empty() => return Some(text.clone()),
            Some(Value::Array(items)) => {
                let texts: Vec<&str> = items
                    .iter()
                    .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|i| i.get("text").and_then(Value::as_str))
                    .collect();
                if !texts.is_empty() {
                    return Some(texts.join(" "));
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_preview(text: &str) -> String {
    if text.len() <= 200 {
        return text.to_string();
    }
    let mut end = 200;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// List conversation metadata for a project, most recent first.
pub fn list_for_project(projects_dir: &str, cwd: &str) -> Vec<Value> {
    let dir = project_dir(projects_dir, cwd);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::debug!(cwd, "no conversation history for project");
            return Vec::new();
        }
    };

    let mut conversations: Vec<(f64, Value)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") || !path.is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let first_line = match fs::File::open(&path).map(BufReader::new) {
            Ok(mut reader) => {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(_) if !line.trim().is_empty() => line,
                    _ => continue,
                }
            }
            Err(_) => continue,
        };
        let Ok(head) = serde_json::from_str::<Value>(first_line.trim()) else {
            tracing::warn!(path = %path.display(), "unparseable conversation head line");
            continue;
        };

        let session_id = head
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
        let timestamp = chrono::DateTime::from_timestamp(mtime as i64, 0)
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_default();

        let preview = last_user_message(&path).unwrap_or_else(|| {
            // Fall back to whatever text the first event carries.
            match head.get("message").and_then(|m| m.get("content")) {
                Some(Value::String(text)) if !text.is_empty() => text.clone(),
                Some(Value::Array(items)) => {
                    let texts: Vec<&str> = items
                        .iter()
                        .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|i| i.get("text").and_then(Value::as_str))
                        .collect();
                    if texts.is_empty() {
                        "(empty conversation)".into()
                    } else {
                        texts.join(" ")
                    }
                }
                _ => "(empty conversation)".into(),
            }
        });

        conversations.push((
            mtime,
            json!({
                "sessionId": session_id,
                "timestamp": timestamp,
                "cwd": head.get("cwd").and_then(Value::as_str).unwrap_or(cwd),
                "gitBranch": head.get("gitBranch").cloned().unwrap_or(Value::Null),
                "lastUserMessage": truncate_preview(&preview),
            }),
        ));
    }

    conversations.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    conversations.into_iter().map(|(_, v)| v).collect()
}

/// Line index (0-based) to start replay from: the second-to-last line
/// matching both `"type":"user"` and `"userType":"external"`. This
/// bounds the payload for very long conversations while preserving the
/// context around the latest exchange. Whole file when fewer than two
/// such lines exist.
fn replay_start_line(lines: &[String]) -> usize {
    let user_lines: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            line.contains("\"type\":\"user\"") && line.contains("\"userType\":\"external\"")
        })
        .map(|(idx, _)| idx)
        .collect();
    if user_lines.len() >= 2 {
        user_lines[user_lines.len() - 2]
    } else {
        0
    }
}

/// Load conversation events for replay to the client.
pub fn load_events(projects_dir: &str, cwd: &str, session_id: &str) -> Vec<Value> {
    let path = project_dir(projects_dir, cwd).join(format!("{session_id}.jsonl"));
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            tracing::warn!(path = %path.display(), "conversation file not found");
            return Vec::new();
        }
    };

    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    let start = replay_start_line(&lines);

    let events: Vec<Value> = lines[start..]
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    tracing::info!(
        session_id,
        from_line = start + 1,
        events = events.len(),
        "loaded conversation events"
    );
    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conversation(dir: &Path, cwd: &str, session_id: &str, lines: &[&str]) {
        let project = dir.join(sanitize_project_path(cwd));
        fs::create_dir_all(&project).unwrap();
        let mut f = fs::File::create(project.join(format!("{session_id}.jsonl"))).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    #[test]
    fn sanitize_replaces_slashes() {
        assert_eq!(sanitize_project_path("/Users/dev/app"), "-Users-dev-app");
    }

    #[test]
    fn list_reads_metadata_and_preview() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = tmp.path().to_str().unwrap();
        write_conversation(
            tmp.path(),
            "/work/app",
            "sess-1",
            &[
                r#"{"sessionId":"sess-1","cwd":"/work/app","gitBranch":"main","type":"summary"}"#,
                r#"{"type":"user","userType":"external","message":{"role":"user","content":"first question"}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"answer"}]}}"#,
                r#"{"type":"user","userType":"external","message":{"role":"user","content":[{"type":"text","text":"follow up"}]}}"#,
            ],
        );

        let list = list_for_project(projects, "/work/app");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["sessionId"], "sess-1");
        assert_eq!(list[0]["gitBranch"], "main");
        assert_eq!(list[0]["lastUserMessage"], "follow up");
    }

    #[test]
    fn list_missing_project_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_for_project(tmp.path().to_str().unwrap(), "/nope").is_empty());
    }

    #[test]
    fn load_slices_from_second_to_last_external_user() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = tmp.path().to_str().unwrap();
        write_conversation(
            tmp.path(),
            "/work/app",
            "sess-2",
            &[
                r#"{"sessionId":"sess-2","type":"summary"}"#,
                r#"{"type":"user","userType":"external","message":{"content":"one"}}"#,
                r#"{"type":"assistant","message":{"content":"a1"}}"#,
                r#"{"type":"user","userType":"external","message":{"content":"two"}}"#,
                r#"{"type":"assistant","message":{"content":"a2"}}"#,
                r#"{"type":"user","userType":"external","message":{"content":"three"}}"#,
                r#"{"type":"assistant","message":{"content":"a3"}}"#,
            ],
        );

        let events = load_events(projects, "/work/app", "sess-2");
        // Slice starts at "two" (second-to-last external user line).
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["message"]["content"], "two");
        assert_eq!(events[3]["message"]["content"], "a3");
    }

    #[test]
    fn load_whole_file_when_single_user_line() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = tmp.path().to_str().unwrap();
        write_conversation(
            tmp.path(),
            "/work/app",
            "sess-3",
            &[
                r#"{"sessionId":"sess-3","type":"summary"}"#,
                r#"{"type":"user","userType":"external","message":{"content":"only"}}"#,
                r#"{"type":"assistant","message":{"content":"reply"}}"#,
            ],
        );
        let events = load_events(projects, "/work/app", "sess-3");
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn internal_user_lines_do_not_bound_the_slice() {
        let lines: Vec<String> = vec![
            r#"{"type":"user","userType":"external","x":1}"#.into(),
            r#"{"type":"user","x":2}"#.into(), // internal: no userType
            r#"{"type":"user","userType":"external","x":3}"#.into(),
        ];
        assert_eq!(replay_start_line(&lines), 0);
    }

    #[test]
    fn missing_conversation_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_events(tmp.path().to_str().unwrap(), "/x", "nope").is_empty());
    }
}
