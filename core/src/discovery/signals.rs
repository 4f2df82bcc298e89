//! Filesystem probes backing the operation-status classifier's levels 2
//! and 3 (SPEC_FULL.md §4.4) and the conversation-summary enrichment
//! field (SPEC_FULL.md §4.4 step 3 / Data Model §3): the assistant CLI's
//! own per-project directory under `~/.claude/projects/`, and the
//! external `.omc` HUD's per-project state file. Kept apart from
//! `classify.rs` since every function there is pure and these touch disk.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

const ACTIVITY_RECENCY: Duration = Duration::from_secs(5);

/// The assistant CLI's own project-directory naming convention: the
/// working directory with every `/` turned into `-`, prefixed with `-`.
fn project_slug(working_directory: &str) -> String {
    let trimmed = working_directory.trim_end_matches('/');
    let replaced = trimmed.replace('/', "-");
    if replaced.starts_with('-') {
        replaced
    } else {
        format!("-{replaced}")
    }
}

fn claude_projects_dir() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".claude").join("projects"))
}

/// Level 2: has the assistant's own activity heartbeat file been touched
/// in the last few seconds?
pub fn activity_file_modified_recently(working_directory: &str) -> bool {
    let Some(dir) = claude_projects_dir() else { return false };
    let path = dir.join(project_slug(working_directory)).join("activity.json");
    let Ok(meta) = std::fs::metadata(&path) else { return false };
    let Ok(modified) = meta.modified() else { return false };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age < ACTIVITY_RECENCY)
        .unwrap_or(false)
}

/// Level 3: `(hud_present_with_spinner, hud_state_active)` read from the
/// external `.omc` HUD's per-project state file, if present.
pub fn omc_hud_state(working_directory: &str) -> (bool, bool) {
    let Some(home) = dirs::home_dir() else { return (false, false) };
    let path = home.join(".omc").join(project_slug(working_directory)).join("state.json");
    let Ok(contents) = std::fs::read_to_string(&path) else { return (false, false) };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) else { return (false, false) };
    let spinner = value.get("spinner").and_then(|v| v.as_bool()).unwrap_or(false);
    let active = value.get("active").and_then(|v| v.as_bool()).unwrap_or(false);
    (spinner, active)
}

/// The most recent conversation summary the assistant CLI recorded for
/// this working directory: `sessions-index.json`'s last entry, falling
/// back to the newest `.jsonl` transcript's last `summary` line.
pub fn conversation_summary(working_directory: &str) -> Option<String> {
    let dir = claude_projects_dir()?.join(project_slug(working_directory));

    if let Ok(contents) = std::fs::read_to_string(dir.join("sessions-index.json")) {
        if let Ok(index) = serde_json::from_str::<serde_json::Value>(&contents) {
            let summary = index
                .get("sessions")
                .and_then(|s| s.as_array())
                .and_then(|arr| arr.last())
                .and_then(|last| last.get("summary"))
                .and_then(|v| v.as_str());
            if let Some(summary) = summary {
                return Some(summary.to_string());
            }
        }
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir).ok()?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).unwrap_or(std::time::UNIX_EPOCH));
    entries
        .into_iter()
        .rev()
        .find(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
        .and_then(|entry| std::fs::read_to_string(entry.path()).ok())
        .and_then(|content| {
            content.lines().rev().find_map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).ok()?;
                value.get("summary").and_then(|s| s.as_str()).map(str::to_string)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_slug_replaces_separators() {
        assert_eq!(project_slug("/home/dev/project"), "-home-dev-project");
    }

    #[test]
    fn project_slug_handles_trailing_slash() {
        assert_eq!(project_slug("/home/dev/project/"), "-home-dev-project");
    }

    #[test]
    fn missing_activity_file_is_not_recent() {
        assert!(!activity_file_modified_recently("/nonexistent/path/for/discovery/tests"));
    }

    #[test]
    fn missing_omc_state_is_both_false() {
        assert_eq!(omc_hud_state("/nonexistent/path/for/discovery/tests"), (false, false));
    }

    #[test]
    fn missing_project_dir_yields_no_summary() {
        assert_eq!(conversation_summary("/nonexistent/path/for/discovery/tests"), None);
    }
}
