//! Terminal output parser — detects Claude Code UI elements in pane text.
//!
//! Parses captured pane content to detect:
//!   - Interactive UIs (AskUserQuestion, ExitPlanMode, permission prompt,
//!     RestoreCheckpoint) via top/bottom line-regex delimiters.
//!   - The spinner status line, scanned bottom-up.
//!
//! All Claude Code text patterns live here. To support a new UI type or a
//! changed Claude Code version, edit `ui_patterns()` / `STATUS_SPINNERS`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Content extracted from an interactive UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveUi {
    /// The extracted display block, boundary lines included.
    pub content: String,
    /// Pattern name that matched (e.g. "AskUserQuestion").
    pub name: &'static str,
}

/// A text-marker pair that delimits an interactive UI region.
///
/// Extraction scans lines top-down: the first line matching any `top`
/// pattern marks the start, the first subsequent line matching any
/// `bottom` pattern marks the end. Both boundary lines are included.
///
/// `top` and `bottom` hold several alternatives so wording changes across
/// Claude Code versions keep matching.
struct UiPattern {
    name: &'static str,
    top: Vec<Regex>,
    bottom: Vec<Regex>,
    /// Minimum lines between top and bottom (inclusive).
    min_gap: usize,
}

fn re(pattern: &str) -> Regex {
    // Patterns are hardcoded constants; a bad one fails the tests below.
    Regex::new(pattern).unwrap()
}

// Order matters: first match wins.
static UI_PATTERNS: Lazy<Vec<UiPattern>> = Lazy::new(|| {
    vec![
        UiPattern {
            name: "ExitPlanMode",
            top: vec![
                re(r"^\s*Would you like to proceed\?"),
                // v2.1.29+: longer prefix that may wrap across lines
                re(r"^\s*Claude has written up a plan"),
            ],
            bottom: vec![re(r"^\s*ctrl-g to edit in "), re(r"^\s*Esc to (cancel|exit)")],
            min_gap: 2,
        },
        UiPattern {
            name: "AskUserQuestion",
            top: vec![re(r"^\s*☐")],
            bottom: vec![re(r"^\s*Enter to select")],
            min_gap: 1,
        },
        UiPattern {
            name: "PermissionPrompt",
            top: vec![
                // v4.x: separator line above the command block
                re(r"^─{5,}\s*.+\s*─{5,}$"),
                // Legacy / fallback: "Do you want to" without a separator
                re(r"^\s*Do you want to"),
            ],
            bottom: vec![
                re(r"Esc to cancel .* Tab to amend"),
                re(r"Enter confirm .* Esc cancel"),
                re(r"^\s*Esc to cancel"),
            ],
            min_gap: 2,
        },
        UiPattern {
            name: "RestoreCheckpoint",
            top: vec![re(r"^\s*Restore the code")],
            bottom: vec![re(r"^\s*Enter to continue")],
            min_gap: 2,
        },
    ]
});

static RE_LONG_DASH: Lazy<Regex> = Lazy::new(|| re(r"^─{5,}$"));
static RE_CHECKBOX: Lazy<Regex> = Lazy::new(|| re(r"^\s*[☐☑✓]\s+(.+)"));
static RE_NUMBERED: Lazy<Regex> = Lazy::new(|| re(r"^\s*(?:❯\s*)?\d+\.\s+(.+)"));

/// Spinner characters Claude Code uses in its status line.
pub const STATUS_SPINNERS: [char; 6] = ['·', '✻', '✽', '✶', '✳', '✢'];

/// Replace lines of 5+ `─` characters with exactly `─────`.
fn shorten_separators(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if RE_LONG_DASH.is_match(line) {
                "─────"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn try_extract(lines: &[&str], pattern: &UiPattern) -> Option<InteractiveUi> {
    let mut top_idx: Option<usize> = None;
    let mut bottom_idx: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        match top_idx {
            None => {
                if pattern.top.iter().any(|p| p.is_match(line)) {
                    top_idx = Some(i);
                }
            }
            Some(_) => {
                if pattern.bottom.iter().any(|p| p.is_match(line)) {
                    bottom_idx = Some(i);
                    break;
                }
            }
        }
    }

    let (top, bottom) = (top_idx?, bottom_idx?);
    if bottom - top < pattern.min_gap {
        return None;
    }

    let content = lines[top..=bottom].join("\n");
    Some(InteractiveUi {
        content: shorten_separators(&content),
        name: pattern.name,
    })
}

/// Extract an interactive UI block from pane text.
///
/// Tries each UI pattern in declaration order; first match wins.
pub fn extract_interactive_content(pane_text: &str) -> Option<InteractiveUi> {
    if pane_text.is_empty() {
        return None;
    }
    let lines: Vec<&str> = pane_text.trim().split('\n').collect();
    UI_PATTERNS.iter().find_map(|p| try_extract(&lines, p))
}

/// Whether the pane currently shows an interactive UI.
pub fn is_interactive_ui(pane_text: &str) -> bool {
    extract_interactive_content(pane_text).is_some()
}

/// 0-based index of the currently focused option (the line carrying `❯`).
///
/// Scans option lines (numbered or checkbox) in order; defaults to 0 when
/// no cursor marker is present.
pub fn parse_cursor_index(content: &str) -> usize {
    let mut option_idx = 0;
    for line in content.split('\n') {
        if RE_NUMBERED.is_match(line) || RE_CHECKBOX.is_match(line) {
            if line.contains('❯') {
                return option_idx;
            }
            option_idx += 1;
        }
    }
    0
}

/// Parse option labels from interactive UI content.
///
/// Recognizes `☐ Option A` / `☑ Option A` checkboxes and `❯ 1. Yes` /
/// `2. No` numbered lines, in declaration order.
pub fn parse_options(content: &str) -> Vec<String> {
    let mut options = Vec::new();
    for line in content.split('\n') {
        let m = RE_NUMBERED
            .captures(line)
            .or_else(|| RE_CHECKBOX.captures(line));
        if let Some(caps) = m {
            let label = caps[1].trim();
            if !label.is_empty() {
                options.push(label.to_string());
            }
        }
    }
    options
}

/// Extract the Claude Code status line from pane text.
///
/// Status lines start with a spinner character. The scan runs bottom-up
/// over the last 15 non-empty lines — the status line sits near the
/// bottom but may have separators or prompts below it.
pub fn parse_status_line(pane_text: &str) -> Option<String> {
    if pane_text.is_empty() {
        return None;
    }

    let lines: Vec<&str> = pane_text
        .trim()
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let tail_start = lines.len().saturating_sub(15);
    for line in lines[tail_start..].iter().rev() {
        if let Some(first) = line.chars().next() {
            if STATUS_SPINNERS.contains(&first) {
                let rest: String = line.chars().skip(1).collect();
                return Some(rest.trim().to_string());
            }
        }
    }
    None
}
