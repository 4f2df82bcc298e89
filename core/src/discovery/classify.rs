//! Pure classifiers for the Session Discovery Engine (SPEC_FULL.md §4.4).
//!
//! Every function here takes already-captured text and returns a
//! classification with no I/O, matching the teacher's preference for
//! pure-logic modules (e.g. `session/shell.rs`) ahead of the impure
//! spawn/capture code that feeds them.

use crate::session::AssistantOperationStatus;

/// Word-bounded match of `name` at the start of `command` (e.g. `"claude"`
/// matches `"claude"` and `"claude --resume"` but not `"claude-helper"`).
fn starts_with_word(haystack: &str, word: &str) -> bool {
    if !haystack.starts_with(word) {
        return false;
    }
    match haystack.as_bytes().get(word.len()) {
        None => true,
        Some(b) => !b.is_ascii_alphanumeric() && *b != b'_' && *b != b'-',
    }
}

/// Fast classifier: the pane's current command is exactly the assistant
/// CLI name, or starts with it at a word boundary.
pub fn is_assistant_command(current_command: &str, assistant_name: &str) -> bool {
    current_command == assistant_name || starts_with_word(current_command, assistant_name)
}

/// Deep classifier fallback: the session name hints at an assistant
/// session but the fast classifier missed it, so the child-process list
/// (captured by the caller via `pgrep -P <pid> -a`) is searched for the
/// assistant name as a whole word.
pub fn deep_classify_from_children(session_name: &str, child_process_listing: &str, assistant_name: &str) -> bool {
    if !session_name.to_lowercase().contains(&assistant_name.to_lowercase()) {
        return false;
    }
    child_process_listing
        .split_whitespace()
        .any(|token| token == assistant_name)
}

const SYSTEM_LINE_PREFIXES: &[&str] = &["claude", "assistant", "thinking", "loading", "waiting"];

fn is_system_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    if SYSTEM_LINE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    if line.is_empty() {
        return true;
    }
    if line.starts_with('[') && line.ends_with(']') {
        return true;
    }
    if !line.is_empty() && line.chars().all(|c| c == '─') {
        return true;
    }
    if !line.is_empty() && line.chars().all(|c| c == '═') {
        return true;
    }
    if line.starts_with('•') {
        return true;
    }
    if line.starts_with("---") {
        return true;
    }
    let mut chars = line.chars();
    let digits_then_dot = {
        let mut saw_digit = false;
        loop {
            match chars.next() {
                Some(c) if c.is_ascii_digit() => saw_digit = true,
                Some('.') if saw_digit => break true,
                _ => break false,
            }
        }
    };
    if digits_then_dot {
        return true;
    }
    false
}

/// Strip the recognized prompt-line prefixes (`>`, `❯`, `human>`,
/// `Human>`, `$`, `%`), returning the text after the marker.
fn strip_prompt_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for marker in ["human>", "Human>"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    for marker in ["❯", ">", "$", "%"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    None
}

fn is_valid_user_input(text: &str) -> bool {
    if text.is_empty() || text.chars().count() > 200 {
        return false;
    }
    if text.chars().all(|c| c == '-' || c == '.' || c.is_whitespace() || (c as u32) < 0x20) {
        return false;
    }
    true
}

fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        input.to_string()
    } else {
        input.chars().take(max).collect()
    }
}

/// Scan captured lines bottom-up for the user's last typed input
/// (SPEC_FULL.md §4.4, "User-input extraction"). Lines are expected to
/// already be ANSI/control-stripped by the caller (`mux::parse_capture_recent_buffer`).
pub fn extract_user_last_input(lines: &[String]) -> Option<String> {
    for line in lines.iter().rev() {
        if is_system_line(line) {
            continue;
        }
        if let Some(captured) = strip_prompt_marker(line) {
            if is_valid_user_input(captured) {
                return Some(truncate_chars(captured, 100));
            }
        }
    }
    None
}

const SPINNER_CODEPOINTS: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '⠐', '⠠', '⠄', '⠂', '⠁'];

const THINKING_MARKERS: &[&str] = &[
    "thinking…",
    "running tool…",
    "searching…",
    "reading…",
    "writing…",
    "executing…",
];

const ERROR_PREFIXES: &[&str] = &[
    "error:",
    "toolerror:",
    "apierror:",
    "failed:",
    "panic:",
    "fatal:",
    "exception:",
];

fn contains_spinner(text: &str) -> bool {
    text.chars().any(|c| SPINNER_CODEPOINTS.contains(&c))
}

fn matches_error_pattern(line: &str) -> bool {
    let lower = line.to_lowercase();
    if ERROR_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    if lower.starts_with("error[e") {
        return true;
    }
    if line.trim_start().starts_with('×') {
        return true;
    }
    false
}

/// Input to the four-level assistant operation status classifier
/// (SPEC_FULL.md §4.4). Each field corresponds to one decision level;
/// callers populate only what they were able to gather (levels 2/3
/// require filesystem access the caller performs, not this function).
#[derive(Debug, Clone, Default)]
pub struct OperationStatusInputs<'a> {
    pub last_lines: &'a [String],
    pub activity_file_modified_recently: bool,
    pub hud_present_with_spinner: bool,
    pub hud_state_active: bool,
}

pub fn classify_operation_status(inputs: &OperationStatusInputs) -> AssistantOperationStatus {
    // Level 1: terminal buffer.
    for line in inputs.last_lines {
        if contains_spinner(line) {
            return AssistantOperationStatus::Thinking;
        }
        let lower = line.to_lowercase();
        if THINKING_MARKERS.iter().any(|m| lower.contains(m)) {
            return AssistantOperationStatus::Thinking;
        }
    }
    if let Some(last) = inputs.last_lines.last() {
        let trimmed = last.trim();
        if trimmed == ">" || trimmed == "❯" || trimmed == "human>" {
            return AssistantOperationStatus::WaitingForInput;
        }
        if matches_error_pattern(trimmed) {
            return AssistantOperationStatus::Error;
        }
    }

    // Level 2: activity file.
    if inputs.activity_file_modified_recently {
        return AssistantOperationStatus::Thinking;
    }

    // Level 3: external HUD.
    if inputs.hud_present_with_spinner || inputs.hud_state_active {
        return AssistantOperationStatus::Thinking;
    }

    // Level 4: default.
    AssistantOperationStatus::Idle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_command_match_is_assistant_session() {
        assert!(is_assistant_command("claude", "claude"));
    }

    #[test]
    fn word_bounded_prefix_is_assistant_session() {
        assert!(is_assistant_command("claude --resume", "claude"));
    }

    #[test]
    fn hyphenated_lookalike_is_not_assistant_session() {
        assert!(!is_assistant_command("claude-helper", "claude"));
    }

    #[test]
    fn unrelated_command_is_not_assistant_session() {
        assert!(!is_assistant_command("vim", "claude"));
    }

    #[test]
    fn deep_classify_finds_name_in_child_listing() {
        assert!(deep_classify_from_children(
            "claude-work",
            "1234 1235 node /usr/local/bin/claude --resume",
            "claude"
        ));
    }

    #[test]
    fn deep_classify_skips_when_name_not_hinted() {
        assert!(!deep_classify_from_children("main", "1234 bash", "claude"));
    }

    #[test]
    fn deep_classify_false_when_children_dont_mention_it() {
        assert!(!deep_classify_from_children("claude-work", "1234 bash", "claude"));
    }

    #[test]
    fn extract_user_input_finds_dollar_prompt() {
        let lines = vec!["claude is loading".to_string(), "$ ls -la".to_string()];
        assert_eq!(extract_user_last_input(&lines), Some("ls -la".to_string()));
    }

    #[test]
    fn extract_user_input_skips_system_lines() {
        let lines = vec![
            "> build the parser".to_string(),
            "thinking about it".to_string(),
            "───────────".to_string(),
        ];
        assert_eq!(extract_user_last_input(&lines), Some("build the parser".to_string()));
    }

    #[test]
    fn extract_user_input_none_when_nothing_matches() {
        let lines = vec!["loading...".to_string(), "──".to_string()];
        assert_eq!(extract_user_last_input(&lines), None);
    }

    #[test]
    fn extract_user_input_rejects_dashes_only_capture() {
        let lines = vec!["> ---".to_string()];
        assert_eq!(extract_user_last_input(&lines), None);
    }

    #[test]
    fn extract_user_input_truncates_to_100() {
        let long = "x".repeat(250);
        let lines = vec![format!("> {long}")];
        let result = extract_user_last_input(&lines).unwrap();
        assert_eq!(result.chars().count(), 100);
    }

    #[test]
    fn spinner_codepoint_means_thinking() {
        let lines = vec!["⠋ working".to_string()];
        let inputs = OperationStatusInputs { last_lines: &lines, ..Default::default() };
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::Thinking);
    }

    #[test]
    fn thinking_marker_text_means_thinking() {
        let lines = vec!["Running tool…".to_string()];
        let inputs = OperationStatusInputs { last_lines: &lines, ..Default::default() };
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::Thinking);
    }

    #[test]
    fn bare_prompt_means_waiting_for_input() {
        let lines = vec!["some output".to_string(), ">".to_string()];
        let inputs = OperationStatusInputs { last_lines: &lines, ..Default::default() };
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::WaitingForInput);
    }

    #[test]
    fn error_prefix_means_error() {
        let lines = vec!["Error: failed to connect".to_string()];
        let inputs = OperationStatusInputs { last_lines: &lines, ..Default::default() };
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::Error);
    }

    #[test]
    fn recent_activity_file_means_thinking() {
        let inputs = OperationStatusInputs {
            activity_file_modified_recently: true,
            ..Default::default()
        };
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::Thinking);
    }

    #[test]
    fn hud_spinner_means_thinking() {
        let inputs = OperationStatusInputs {
            hud_present_with_spinner: true,
            ..Default::default()
        };
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::Thinking);
    }

    #[test]
    fn default_is_idle() {
        let inputs = OperationStatusInputs::default();
        assert_eq!(classify_operation_status(&inputs), AssistantOperationStatus::Idle);
    }
}
