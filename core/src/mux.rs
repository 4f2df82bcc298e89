//! Multiplexer Adapter (SPEC_FULL.md §4.1).
//!
//! Builds command strings for the external terminal multiplexer (tmux's
//! command surface: `list-sessions`, `list-panes`, `capture-pane`,
//! `display-message`, `new-session -d`, `kill-session`, `kill-pane`,
//! `has-session`) and parses their output. Every function here is pure:
//! building a command string takes no I/O, and parsing takes only the
//! captured stdout plus exit information. The caller (a local shell or
//! the Host Connection Manager's `exec`) is responsible for running the
//! command and handing back `(exit_code, stdout, stderr)`.
//!
//! All list-style commands use a fixed three-pipe-character delimiter
//! (`|||`) in their `-F` format string. Shell tokenization cannot split a
//! field on whitespace when the delimiter itself is multi-character, and
//! a row whose field ever contains the delimiter is discarded as
//! malformed rather than risk mis-aligning later fields.

const DELIM: &str = "|||";

/// Control and ANSI escape bytes stripped from anything meant for display
/// (status bar text, captured last-line). Matches a conservative CSI/OSC
/// strip: `ESC [ ... letter` and bare control bytes below 0x20 except tab.
fn strip_ansi_and_control(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // CSI: ESC [ params letter
            if chars.peek() == Some(&'[') {
                chars.next();
                while let Some(&n) = chars.peek() {
                    chars.next();
                    if n.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else {
                // Other escape sequences: consume one more char and stop.
                chars.next();
            }
            continue;
        }
        if (c as u32) < 0x20 && c != '\t' {
            continue;
        }
        out.push(c);
    }
    out
}

fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        input.to_string()
    } else {
        input.chars().take(max).collect()
    }
}

// --- listSessions ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSessionSummary {
    pub mux_session_id: String,
    pub session_name: String,
    pub window_count: u32,
    pub created_unix: i64,
}

pub fn build_list_sessions_command() -> String {
    format!("tmux list-sessions -F '#{{session_id}}{DELIM}#{{session_name}}{DELIM}#{{session_windows}}{DELIM}#{{session_created}}'")
}

/// Parse `list-sessions` output. Empty output yields an empty list; any
/// non-zero exit (mux not running) should be treated by the caller as
/// empty output before reaching this function — it is never an error.
pub fn parse_list_sessions(output: &str) -> Vec<MuxSessionSummary> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(DELIM).collect();
            if fields.len() != 4 {
                return None;
            }
            let window_count = fields[2].trim().parse().ok()?;
            let created_unix = fields[3].trim().parse().ok()?;
            Some(MuxSessionSummary {
                mux_session_id: fields[0].trim().to_string(),
                session_name: fields[1].trim().to_string(),
                window_count,
                created_unix,
            })
        })
        .collect()
}

// --- listPanes ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxPane {
    pub pane_id: String,
    pub pid: u32,
    pub current_command: String,
    pub width: u32,
    pub height: u32,
    pub window_index: u32,
    pub current_path: String,
}

pub fn build_list_panes_command(session_name: &str) -> String {
    format!(
        "tmux list-panes -t '{session_name}' -F '#{{pane_id}}{DELIM}#{{pane_pid}}{DELIM}#{{pane_current_command}}{DELIM}#{{pane_width}}{DELIM}#{{pane_height}}{DELIM}#{{window_index}}{DELIM}#{{pane_current_path}}'"
    )
}

pub fn parse_list_panes(output: &str) -> Vec<MuxPane> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(DELIM).collect();
            if fields.len() != 7 {
                return None;
            }
            Some(MuxPane {
                pane_id: fields[0].trim().to_string(),
                pid: fields[1].trim().parse().ok()?,
                current_command: fields[2].trim().to_string(),
                width: fields[3].trim().parse().ok()?,
                height: fields[4].trim().parse().ok()?,
                window_index: fields[5].trim().parse().ok()?,
                current_path: fields[6].trim().to_string(),
            })
        })
        .collect()
}

// --- captureLastLine ---

pub fn build_capture_last_line_command(session_name: &str, pane_id: &str) -> String {
    format!("tmux capture-pane -p -S -5 -t '{session_name}:{pane_id}'")
}

/// Last non-empty line from a `capture-pane -p -S -5` dump, ANSI/control
/// stripped, truncated to 100 chars.
pub fn parse_capture_last_line(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .map(strip_ansi_and_control)
        .map(|l| l.trim().to_string())
        .find(|l| !l.is_empty())
        .map(|l| truncate_chars(&l, 100))
}

// --- captureStatusBar ---

pub fn build_capture_status_bar_command(session_name: &str) -> String {
    format!("tmux display-message -p -t '{session_name}' '#{{T:status-right}}'")
}

/// Expanded status-right string, cleaned of tmux style tags (`#[...]`)
/// and control bytes, truncated to 150 chars.
pub fn parse_capture_status_bar(output: &str) -> String {
    let mut cleaned = String::with_capacity(output.len());
    let mut chars = output.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' && chars.peek() == Some(&'[') {
            chars.next();
            for n in chars.by_ref() {
                if n == ']' {
                    break;
                }
            }
            continue;
        }
        cleaned.push(c);
    }
    let cleaned = strip_ansi_and_control(&cleaned);
    truncate_chars(cleaned.trim(), 150)
}

// --- captureRecentBuffer ---

pub fn build_capture_recent_buffer_command(session_name: &str, pane_id: &str, lines: u32) -> String {
    let start = format!("-{lines}");
    format!("tmux capture-pane -p -S {start} -t '{session_name}:{pane_id}'")
}

/// Last N lines, ANSI/control stripped, preserved in order (oldest to
/// newest) for user-input extraction (SPEC_FULL.md §4.4).
pub fn parse_capture_recent_buffer(output: &str) -> Vec<String> {
    output.lines().map(strip_ansi_and_control).collect()
}

// --- mutation commands ---

pub fn build_create_session_command(name: &str, working_dir: &str, command: Option<&str>) -> String {
    match command {
        Some(cmd) => format!("tmux new-session -d -s '{name}' -c '{working_dir}' '{cmd}'"),
        None => format!("tmux new-session -d -s '{name}' -c '{working_dir}'"),
    }
}

pub fn build_kill_session_command(name: &str) -> String {
    format!("tmux kill-session -t '{name}'")
}

pub fn build_kill_pane_command(name: &str, pane_id: &str) -> String {
    format!("tmux kill-pane -t '{name}:{pane_id}'")
}

pub fn build_has_session_command(name: &str) -> String {
    format!("tmux has-session -t '{name}'")
}

/// `has-session`'s result is purely the exit code: zero means the
/// session exists, non-zero means it does not. No stdout parsing needed.
pub fn has_session_from_exit_code(exit_code: i32) -> bool {
    exit_code == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_sessions_empty_output() {
        assert!(parse_list_sessions("").is_empty());
    }

    #[test]
    fn list_sessions_parses_rows() {
        let out = "$0|||main|||3|||1700000000\n$1|||scratch|||1|||1700000100\n";
        let sessions = parse_list_sessions(out);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].mux_session_id, "$0");
        assert_eq!(sessions[0].session_name, "main");
        assert_eq!(sessions[0].window_count, 3);
        assert_eq!(sessions[1].created_unix, 1700000100);
    }

    #[test]
    fn list_sessions_discards_malformed_rows() {
        let out = "$0|||main|||3|||1700000000\nmalformed|||row\n";
        let sessions = parse_list_sessions(out);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn list_panes_parses_rows() {
        let out = "%0|||1234|||claude|||80|||24|||0|||/home/user/project\n";
        let panes = parse_list_panes(out);
        assert_eq!(panes.len(), 1);
        assert_eq!(panes[0].pane_id, "%0");
        assert_eq!(panes[0].pid, 1234);
        assert_eq!(panes[0].current_command, "claude");
        assert_eq!(panes[0].current_path, "/home/user/project");
    }

    #[test]
    fn list_panes_discards_field_containing_delimiter() {
        // Nine fields instead of seven because a value itself contained "|||".
        let out = "%0|||1234|||cla|||ude|||80|||24|||0|||/home|||user\n";
        assert!(parse_list_panes(out).is_empty());
    }

    #[test]
    fn capture_last_line_strips_ansi_and_picks_last_nonempty() {
        let out = "\x1b[32m$ ls\x1b[0m\nfile.txt\n\n";
        let line = parse_capture_last_line(out).unwrap();
        assert_eq!(line, "file.txt");
    }

    #[test]
    fn capture_last_line_none_when_all_blank() {
        assert!(parse_capture_last_line("\n\n   \n").is_none());
    }

    #[test]
    fn capture_last_line_truncates_to_100() {
        let long = "x".repeat(250);
        let line = parse_capture_last_line(&long).unwrap();
        assert_eq!(line.chars().count(), 100);
    }

    #[test]
    fn capture_status_bar_strips_style_tags() {
        let out = "#[fg=green]ok#[default] | 14:02";
        let bar = parse_capture_status_bar(out);
        assert_eq!(bar, "ok | 14:02");
    }

    #[test]
    fn capture_status_bar_truncates_to_150() {
        let long = "y".repeat(300);
        let bar = parse_capture_status_bar(&long);
        assert_eq!(bar.chars().count(), 150);
    }

    #[test]
    fn capture_recent_buffer_preserves_order() {
        let out = "one\ntwo\nthree\n";
        let lines = parse_capture_recent_buffer(out);
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn build_commands_quote_session_name() {
        let cmd = build_kill_session_command("my session");
        assert!(cmd.contains("'my session'"));
    }

    #[test]
    fn create_session_command_with_and_without_initial_command() {
        let with_cmd = build_create_session_command("demo", "/tmp", Some("htop"));
        assert!(with_cmd.contains("'htop'"));
        let without_cmd = build_create_session_command("demo", "/tmp", None);
        assert!(!without_cmd.contains("htop"));
    }

    #[test]
    fn has_session_exit_code_mapping() {
        assert!(has_session_from_exit_code(0));
        assert!(!has_session_from_exit_code(1));
    }
}
