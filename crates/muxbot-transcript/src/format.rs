//! One-line tool summaries and tool-result bodies.

use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::event::{PendingToolInfo, EXPANDABLE_QUOTE_END, EXPANDABLE_QUOTE_START};

/// Summaries truncate the primary argument at this many chars.
const SUMMARY_ARG_MAX: usize = 200;

/// Wrap `text` in the expandable-quote sentinels.
pub fn expandable_quote(text: &str) -> String {
    format!("{EXPANDABLE_QUOTE_START}{text}{EXPANDABLE_QUOTE_END}")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Select the primary argument for a tool-use summary.
///
/// Known tools pick their signature field; anything else falls back to the
/// first string value in the input object.
fn primary_argument(tool_name: &str, input: &Value) -> Option<String> {
    let obj = input.as_object()?;

    let key = match tool_name {
        "Read" | "Write" | "Edit" => Some("file_path"),
        "Bash" => Some("command"),
        "Grep" | "Glob" => Some("pattern"),
        "WebFetch" => Some("url"),
        "WebSearch" => Some("query"),
        _ => None,
    };

    if let Some(key) = key {
        return obj.get(key).and_then(Value::as_str).map(str::to_string);
    }

    match tool_name {
        "TodoWrite" => {
            let n = obj.get("todos").and_then(Value::as_array).map_or(0, Vec::len);
            Some(format!("{n} item(s)"))
        }
        "AskUserQuestion" => obj
            .get("questions")
            .and_then(Value::as_array)
            .and_then(|qs| qs.first())
            .and_then(|q| q.get("question"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => obj.values().find_map(Value::as_str).map(str::to_string),
    }
}

/// Format a one-line tool-use summary: `**<Tool>**(<primary-argument>)`.
pub fn format_tool_use_summary(tool_name: &str, input: &Value) -> String {
    match primary_argument(tool_name, input) {
        Some(arg) if !arg.is_empty() => {
            format!("**{tool_name}**({})", truncate_chars(&arg, SUMMARY_ARG_MAX))
        }
        _ => format!("**{tool_name}**"),
    }
}

/// Line-oriented diff of the Edit tool's old/new strings with `-`/`+`
/// prefixes (context lines keep a leading space).
pub fn format_edit_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let prefix = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        out.push(prefix);
        out.push_str(change.value().trim_end_matches('\n'));
        out.push('\n');
    }
    out.trim_end_matches('\n').to_string()
}

fn edit_line_counts(old: &str, new: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(old, new);
    let mut added = 0;
    let mut removed = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    (added, removed)
}

/// Format a tool-result body using the originating tool's pending info.
pub fn format_tool_result(info: &PendingToolInfo, text: &str, is_error: bool) -> String {
    if is_error {
        return format!("Error\n{}", expandable_quote(text));
    }
    if text.starts_with("[Request interrupted by user") {
        return "Interrupted".to_string();
    }

    match info.tool_name.as_str() {
        "Read" => format!("Read {} lines", text.split('\n').count()),
        "Write" => format!("Wrote {} lines", text.split('\n').count()),
        "Edit" => {
            let old = info.edit_old.as_deref().unwrap_or("");
            let new = info.edit_new.as_deref().unwrap_or("");
            let (added, removed) = edit_line_counts(old, new);
            format!(
                "Added {added} / removed {removed} line(s)\n{}",
                expandable_quote(&format_edit_diff(old, new))
            )
        }
        "Bash" => format!("Output:\n{}", expandable_quote(text)),
        "Grep" => format!(
            "Found {} matches\n{}",
            text.split('\n').count(),
            expandable_quote(text)
        ),
        "Glob" => format!(
            "Found {} files\n{}",
            text.split('\n').count(),
            expandable_quote(text)
        ),
        "WebFetch" => format!(
            "Fetched {} characters\n{}",
            text.chars().count(),
            expandable_quote(text)
        ),
        _ => expandable_quote(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(name: &str) -> PendingToolInfo {
        PendingToolInfo {
            tool_name: name.to_string(),
            input: json!({}),
            edit_old: None,
            edit_new: None,
            timestamp: None,
        }
    }

    #[test]
    fn summary_read() {
        assert_eq!(
            format_tool_use_summary("Read", &json!({"file_path": "/a/b.py"})),
            "**Read**(/a/b.py)"
        );
    }

    #[test]
    fn summary_bash() {
        assert_eq!(
            format_tool_use_summary("Bash", &json!({"command": "ls -la"})),
            "**Bash**(ls -la)"
        );
    }

    #[test]
    fn summary_grep_glob() {
        assert_eq!(
            format_tool_use_summary("Grep", &json!({"pattern": "TODO"})),
            "**Grep**(TODO)"
        );
        assert_eq!(
            format_tool_use_summary("Glob", &json!({"pattern": "*.py"})),
            "**Glob**(*.py)"
        );
    }

    #[test]
    fn summary_web_tools() {
        assert_eq!(
            format_tool_use_summary("WebFetch", &json!({"url": "https://example.com"})),
            "**WebFetch**(https://example.com)"
        );
        assert_eq!(
            format_tool_use_summary("WebSearch", &json!({"query": "rust async"})),
            "**WebSearch**(rust async)"
        );
    }

    #[test]
    fn summary_todowrite_counts_items() {
        assert_eq!(
            format_tool_use_summary("TodoWrite", &json!({"todos": [1, 2, 3]})),
            "**TodoWrite**(3 item(s))"
        );
    }

    #[test]
    fn summary_ask_user_question() {
        let input = json!({"questions": [{"question": "Which option?"}]});
        assert_eq!(
            format_tool_use_summary("AskUserQuestion", &input),
            "**AskUserQuestion**(Which option?)"
        );
    }

    #[test]
    fn summary_unknown_tool_first_string_value() {
        assert_eq!(
            format_tool_use_summary("MyTool", &json!({"foo": "bar"})),
            "**MyTool**(bar)"
        );
    }

    #[test]
    fn summary_truncates_at_200() {
        let long_path = "/a".repeat(150);
        let result = format_tool_use_summary("Read", &json!({"file_path": long_path}));
        assert!(result.chars().count() < 220);
        assert!(result.contains('…'));
    }

    #[test]
    fn summary_non_object_input() {
        assert_eq!(format_tool_use_summary("Read", &json!("not a dict")), "**Read**");
    }

    #[test]
    fn edit_diff_single_line_change() {
        let result = format_edit_diff("old line", "new line");
        assert!(result.contains("-old line"));
        assert!(result.contains("+new line"));
    }

    #[test]
    fn edit_diff_multi_line() {
        let result = format_edit_diff("line1\nline2\nline3", "line1\nmodified\nline3");
        assert!(result.contains("-line2"));
        assert!(result.contains("+modified"));
    }

    #[test]
    fn edit_diff_add_only() {
        let result = format_edit_diff("a", "a\nb");
        assert!(result.contains("+b"));
    }

    #[test]
    fn result_error_header() {
        let text = format_tool_result(&info("Bash"), "command not found", true);
        assert!(text.contains("Error"));
        assert!(text.contains(EXPANDABLE_QUOTE_START));
    }

    #[test]
    fn result_interrupted_sentinel() {
        let text = format_tool_result(
            &info("Bash"),
            "[Request interrupted by user for tool use]",
            false,
        );
        assert!(text.contains("Interrupted"));
    }

    #[test]
    fn result_read_write_line_counts() {
        assert_eq!(
            format_tool_result(&info("Read"), "line1\nline2\nline3", false),
            "Read 3 lines"
        );
        assert_eq!(
            format_tool_result(&info("Write"), "a\nb\nc\nd", false),
            "Wrote 4 lines"
        );
    }

    #[test]
    fn result_bash_output_quoted() {
        let text = format_tool_result(&info("Bash"), "hi\nthere", false);
        assert!(text.contains("Output"));
        assert!(text.contains(EXPANDABLE_QUOTE_START));
    }

    #[test]
    fn result_grep_glob_counts() {
        let text = format_tool_result(&info("Grep"), "a.py:10:x\nb.py:20:y", false);
        assert!(text.contains("Found 2 matches"));
        let text = format_tool_result(&info("Glob"), "a.py\nb.py\nc.py", false);
        assert!(text.contains("Found 3 files"));
    }

    #[test]
    fn result_webfetch_char_count() {
        let body = "x".repeat(100);
        let text = format_tool_result(&info("WebFetch"), &body, false);
        assert!(text.contains("Fetched 100 characters"));
    }

    #[test]
    fn result_edit_diff_with_counts() {
        let mut i = info("Edit");
        i.edit_old = Some("old code".to_string());
        i.edit_new = Some("new code".to_string());
        let text = format_tool_result(&i, "File edited successfully", false);
        assert!(text.contains("Added") || text.contains("removed"));
        assert!(text.contains("-old code"));
        assert!(text.contains("+new code"));
    }

    #[test]
    fn result_default_quoted_body() {
        let text = format_tool_result(&info("SomeTool"), "body", false);
        assert!(text.starts_with(EXPANDABLE_QUOTE_START));
        assert!(text.ends_with(EXPANDABLE_QUOTE_END));
    }
}
