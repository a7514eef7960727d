//! Record-stream parsing: raw JSONL records in, ordered events out.
//!
//! `parse_entries` is the single entry point. In streaming mode the
//! caller threads a [`PendingTools`] map through successive calls so a
//! tool_result can pair with a tool_use seen in an earlier read; in
//! one-shot mode (history rendering) still-pending tools are flushed as
//! synthetic tool-use-only events at end of input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::event::{
    ContentType, ParsedEvent, PendingToolInfo, PendingTools, Role,
};
use crate::format::{expandable_quote, format_tool_result, format_tool_use_summary};

/// System XML wrappers stripped from user text (case-sensitive).
const SYSTEM_TAGS: [&str; 2] = ["system-reminder", "system-warning"];

static RE_COMMAND_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<command-name>(.*?)</command-name>").unwrap()
});
static RE_COMMAND_STDOUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<local-command-stdout>(.*?)</local-command-stdout>").unwrap()
});

/// Parse one JSONL line. Blank or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Join the `text` blocks of a content value, skipping everything else.
/// A bare string passes through unchanged.
pub fn extract_text_only(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Extract the textual body of a tool_result `content` value.
pub fn extract_tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(_) => extract_text_only(content),
        _ => String::new(),
    }
}

/// Remove `<tag>…</tag>` regions for each known system wrapper.
fn strip_system_tags(text: &str) -> String {
    let mut out = text.to_string();
    for tag in SYSTEM_TAGS {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        while let (Some(start), Some(end_rel)) = (
            out.find(&open),
            out.find(&open).and_then(|s| out[s..].find(&close)),
        ) {
            let end = start + end_rel + close.len();
            out.replace_range(start..end, "");
        }
    }
    out
}

/// Detect the local-command envelope and return `(name, stdout)`.
fn parse_local_command(text: &str) -> Option<(String, String)> {
    let name = RE_COMMAND_NAME.captures(text)?[1].trim().to_string();
    let stdout = RE_COMMAND_STDOUT
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();
    Some((name, stdout))
}

/// Stripped user text of a record, if it is a user message with content.
///
/// Used by the session store's summary scan; tool results and system
/// wrappers do not count as user text.
pub fn user_text(record: &Value) -> Option<String> {
    if record.get("type").and_then(Value::as_str) != Some("user") {
        return None;
    }
    let content = record.get("message")?.get("content")?;
    let stripped = strip_system_tags(&extract_text_only(content));
    let trimmed = stripped.trim();
    if trimmed.is_empty() || parse_local_command(trimmed).is_some() {
        return None;
    }
    Some(trimmed.to_string())
}

fn timestamp_of(record: &Value) -> Option<String> {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn handle_user_text(text: &str, timestamp: &Option<String>, events: &mut Vec<ParsedEvent>) {
    let stripped = strip_system_tags(text);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return;
    }

    if let Some((name, stdout)) = parse_local_command(trimmed) {
        let body = if stdout.is_empty() {
            format!("**{name}**")
        } else {
            format!("**{name}**\n{}", expandable_quote(&stdout))
        };
        events.push(ParsedEvent::user(
            ContentType::LocalCommand,
            body,
            timestamp.clone(),
        ));
        return;
    }

    events.push(ParsedEvent::user(
        ContentType::Text,
        trimmed.to_string(),
        timestamp.clone(),
    ));
}

fn handle_tool_use(
    block: &Value,
    timestamp: &Option<String>,
    events: &mut Vec<ParsedEvent>,
    pending: &mut PendingTools,
) {
    let Some(id) = block.get("id").and_then(Value::as_str) else {
        return;
    };
    let name = block
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let input = block.get("input").cloned().unwrap_or(Value::Null);

    // ExitPlanMode: the plan body is lost once the result arrives, so it
    // is emitted as ordinary text ahead of the tool_use summary.
    if name == "ExitPlanMode" {
        if let Some(plan) = input.get("plan").and_then(Value::as_str) {
            if !plan.trim().is_empty() {
                events.push(ParsedEvent::assistant(
                    ContentType::Text,
                    plan.to_string(),
                    timestamp.clone(),
                ));
            }
        }
    }

    let (edit_old, edit_new) = if name == "Edit" {
        (
            input
                .get("old_string")
                .and_then(Value::as_str)
                .map(str::to_string),
            input
                .get("new_string")
                .and_then(Value::as_str)
                .map(str::to_string),
        )
    } else {
        (None, None)
    };

    pending.insert(
        id.to_string(),
        PendingToolInfo {
            tool_name: name.clone(),
            input: input.clone(),
            edit_old,
            edit_new,
            timestamp: timestamp.clone(),
        },
    );

    events.push(ParsedEvent {
        role: Role::Assistant,
        content_type: ContentType::ToolUse,
        text: format_tool_use_summary(&name, &input),
        tool_use_id: Some(id.to_string()),
        tool_name: Some(name),
        timestamp: timestamp.clone(),
    });
}

fn handle_tool_result(
    block: &Value,
    timestamp: &Option<String>,
    events: &mut Vec<ParsedEvent>,
    pending: &mut PendingTools,
) {
    let Some(id) = block.get("tool_use_id").and_then(Value::as_str) else {
        return;
    };
    // Unmatched results are dropped: without the tool_use we cannot
    // attribute or format them.
    let Some(info) = pending.remove(id) else {
        return;
    };

    let body = extract_tool_result_text(block.get("content").unwrap_or(&Value::Null));
    let is_error = block
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    events.push(ParsedEvent {
        role: Role::Assistant,
        content_type: ContentType::ToolResult,
        text: format_tool_result(&info, &body, is_error),
        tool_use_id: Some(id.to_string()),
        tool_name: Some(info.tool_name),
        timestamp: timestamp.clone(),
    });
}

/// Parse a batch of decoded records into events.
///
/// `pending = Some(map)`: streaming mode — unmatched tool_uses persist in
/// the returned map for the next call. `pending = None`: one-shot mode —
/// leftovers are flushed as synthetic tool-use-only events and the
/// returned map is empty.
pub fn parse_entries(
    entries: &[Value],
    pending: Option<PendingTools>,
) -> (Vec<ParsedEvent>, PendingTools) {
    let one_shot = pending.is_none();
    let mut pending = pending.unwrap_or_default();
    let mut events = Vec::new();

    for record in entries {
        let rtype = record.get("type").and_then(Value::as_str).unwrap_or("");
        if rtype != "user" && rtype != "assistant" {
            continue;
        }
        let timestamp = timestamp_of(record);
        let Some(content) = record.get("message").and_then(|m| m.get("content")) else {
            continue;
        };

        match content {
            Value::String(text) if rtype == "user" => {
                handle_user_text(text, &timestamp, &mut events);
            }
            Value::Array(blocks) => {
                for block in blocks {
                    let btype = block.get("type").and_then(Value::as_str).unwrap_or("");
                    match (rtype, btype) {
                        ("user", "text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                handle_user_text(text, &timestamp, &mut events);
                            }
                        }
                        ("user", "tool_result") => {
                            handle_tool_result(block, &timestamp, &mut events, &mut pending);
                        }
                        ("assistant", "text") => {
                            let text = block
                                .get("text")
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            if !text.trim().is_empty() && text != "(no content)" {
                                events.push(ParsedEvent::assistant(
                                    ContentType::Text,
                                    text.to_string(),
                                    timestamp.clone(),
                                ));
                            }
                        }
                        ("assistant", "thinking") => {
                            let body = block
                                .get("thinking")
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            if !body.trim().is_empty() {
                                events.push(ParsedEvent::assistant(
                                    ContentType::Thinking,
                                    expandable_quote(body),
                                    timestamp.clone(),
                                ));
                            }
                        }
                        ("assistant", "tool_use") => {
                            handle_tool_use(block, &timestamp, &mut events, &mut pending);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if one_shot {
        // History rendering has no later read that could resolve these;
        // surface them as tool-use-only events in a stable order.
        let mut leftovers: Vec<(String, PendingToolInfo)> = pending.drain().collect();
        leftovers.sort_by(|a, b| (&a.1.timestamp, &a.0).cmp(&(&b.1.timestamp, &b.0)));
        for (id, info) in leftovers {
            events.push(ParsedEvent {
                role: Role::Assistant,
                content_type: ContentType::ToolUse,
                text: format_tool_use_summary(&info.tool_name, &info.input),
                tool_use_id: Some(id),
                tool_name: Some(info.tool_name),
                timestamp: info.timestamp,
            });
        }
    }

    (events, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EXPANDABLE_QUOTE_START;
    use serde_json::json;

    fn user_text_record(text: &str) -> Value {
        json!({
            "type": "user",
            "message": {"content": [{"type": "text", "text": text}]},
            "timestamp": "2025-01-01T00:00:00Z",
        })
    }

    fn assistant_text(text: &str) -> Value {
        json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": text}]},
            "timestamp": "2025-01-01T00:00:01Z",
        })
    }

    fn tool_use(id: &str, name: &str, input: Value) -> Value {
        json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "tool_use", "id": id, "name": name, "input": input}
            ]},
            "timestamp": "2025-01-01T00:00:02Z",
        })
    }

    fn tool_result(id: &str, text: &str, is_error: bool) -> Value {
        json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": id, "content": text, "is_error": is_error}
            ]},
            "timestamp": "2025-01-01T00:00:03Z",
        })
    }

    fn thinking(text: &str) -> Value {
        json!({
            "type": "assistant",
            "message": {"content": [{"type": "thinking", "thinking": text}]},
            "timestamp": "2025-01-01T00:00:04Z",
        })
    }

    // ── parse_line ───────────────────────────────────────────────────

    #[test]
    fn parse_line_valid_json() {
        assert_eq!(parse_line(r#"{"type": "user"}"#), Some(json!({"type": "user"})));
    }

    #[test]
    fn parse_line_blank_and_invalid() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   \t  "), None);
        assert_eq!(parse_line("not json{"), None);
    }

    #[test]
    fn parse_line_strips_whitespace() {
        assert_eq!(parse_line(r#"  {"key": "val"}  "#), Some(json!({"key": "val"})));
    }

    // ── extract helpers ──────────────────────────────────────────────

    #[test]
    fn extract_text_only_joins_text_blocks() {
        let content = json!([
            {"type": "text", "text": "hello"},
            {"type": "tool_use", "id": "x", "name": "Read"},
            {"type": "text", "text": "world"},
        ]);
        assert_eq!(extract_text_only(&content), "hello\nworld");
    }

    #[test]
    fn extract_text_only_passthrough_and_fallback() {
        assert_eq!(extract_text_only(&json!("just a string")), "just a string");
        assert_eq!(extract_text_only(&json!([])), "");
        assert_eq!(extract_text_only(&json!(42)), "");
    }

    #[test]
    fn extract_tool_result_text_variants() {
        assert_eq!(extract_tool_result_text(&json!("hello")), "hello");
        let mixed = json!([
            {"type": "text", "text": "a"},
            {"type": "image", "data": "..."},
            {"type": "text", "text": "b"},
        ]);
        assert_eq!(extract_tool_result_text(&mixed), "a\nb");
        assert_eq!(extract_tool_result_text(&json!(42)), "");
    }

    // ── parse_entries: basic emission ────────────────────────────────

    #[test]
    fn simple_assistant_text() {
        let (events, _) = parse_entries(&[assistant_text("Hello world")], None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].role, Role::Assistant);
        assert_eq!(events[0].content_type, ContentType::Text);
        assert_eq!(events[0].text, "Hello world");
    }

    #[test]
    fn user_text_event() {
        let (events, _) = parse_entries(&[user_text_record("How are you?")], None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].role, Role::User);
        assert_eq!(events[0].text, "How are you?");
    }

    #[test]
    fn thinking_wrapped_in_expandable_quote() {
        let (events, _) = parse_entries(&[thinking("Let me think...")], None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content_type, ContentType::Thinking);
        assert!(events[0].text.contains(EXPANDABLE_QUOTE_START));
    }

    #[test]
    fn no_content_placeholder_skipped() {
        let (events, _) = parse_entries(&[assistant_text("(no content)")], None);
        assert!(events.is_empty());
    }

    #[test]
    fn summary_records_skipped() {
        let entries = vec![
            json!({"type": "summary", "summary": "some summary"}),
            assistant_text("real text"),
        ];
        let (events, _) = parse_entries(&entries, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "real text");
    }

    #[test]
    fn system_reminder_stripped_from_user_text() {
        let (events, _) = parse_entries(
            &[user_text_record("<system-reminder>ignore</system-reminder>")],
            None,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn local_command_envelope_detected() {
        let text = "<command-name>help</command-name><local-command-stdout>Usage: ...</local-command-stdout>";
        let (events, _) = parse_entries(&[user_text_record(text)], None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content_type, ContentType::LocalCommand);
        assert!(events[0].text.contains("help"));
        assert!(events[0].text.contains("Usage"));
    }

    // ── parse_entries: tool pairing ──────────────────────────────────

    #[test]
    fn tool_use_result_pairing() {
        let entries = vec![
            tool_use("t1", "Read", json!({"file_path": "/test.py"})),
            tool_result("t1", "file contents here", false),
        ];
        let (events, pending) = parse_entries(&entries, Some(PendingTools::new()));
        let uses: Vec<_> = events
            .iter()
            .filter(|e| e.content_type == ContentType::ToolUse)
            .collect();
        let results: Vec<_> = events
            .iter()
            .filter(|e| e.content_type == ContentType::ToolResult)
            .collect();
        assert_eq!(uses.len(), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_use_id.as_deref(), Some("t1"));
        assert!(pending.is_empty());
    }

    #[test]
    fn unmatched_result_dropped() {
        let (events, _) = parse_entries(
            &[tool_result("ghost", "no such tool", false)],
            Some(PendingTools::new()),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn exactly_one_result_per_id() {
        let entries = vec![
            tool_use("t1", "Bash", json!({"command": "ls"})),
            tool_result("t1", "a", false),
            tool_result("t1", "b", false),
        ];
        let (events, _) = parse_entries(&entries, Some(PendingTools::new()));
        let results: Vec<_> = events
            .iter()
            .filter(|e| e.content_type == ContentType::ToolResult)
            .collect();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn multiple_tools_per_message() {
        let entry = json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "a.py"}},
                {"type": "tool_use", "id": "t2", "name": "Read", "input": {"file_path": "b.py"}},
            ]},
            "timestamp": "2025-01-01T00:00:00Z",
        });
        let (events, pending) = parse_entries(&[entry], Some(PendingTools::new()));
        let uses: Vec<_> = events
            .iter()
            .filter(|e| e.content_type == ContentType::ToolUse)
            .collect();
        assert_eq!(uses.len(), 2);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn pending_carry_over_across_calls() {
        let (_, pending1) = parse_entries(
            &[tool_use("t1", "Bash", json!({"command": "ls"}))],
            Some(PendingTools::new()),
        );
        assert!(pending1.contains_key("t1"));

        let (events2, pending2) =
            parse_entries(&[tool_result("t1", "a\nb\n", false)], Some(pending1));
        let results: Vec<_> = events2
            .iter()
            .filter(|e| e.content_type == ContentType::ToolResult)
            .collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("Output:"));
        assert!(results[0].text.contains(EXPANDABLE_QUOTE_START));
        assert!(pending2.is_empty());
    }

    #[test]
    fn concatenation_equivalence() {
        // Streaming a split batch must produce the same events as one call.
        let a = vec![
            assistant_text("first"),
            tool_use("t1", "Bash", json!({"command": "ls"})),
        ];
        let b = vec![
            tool_result("t1", "x\ny", false),
            user_text_record("thanks"),
        ];

        let mut combined = a.clone();
        combined.extend(b.clone());
        let (whole, wp) = parse_entries(&combined, Some(PendingTools::new()));

        let (mut split_events, pending_mid) = parse_entries(&a, Some(PendingTools::new()));
        let (tail, sp) = parse_entries(&b, Some(pending_mid));
        split_events.extend(tail);

        assert_eq!(whole.len(), split_events.len());
        for (w, s) in whole.iter().zip(split_events.iter()) {
            assert_eq!(w.text, s.text);
            assert_eq!(w.content_type, s.content_type);
            assert_eq!(w.tool_use_id, s.tool_use_id);
        }
        assert_eq!(wp.len(), sp.len());
    }

    // ── parse_entries: special tools ─────────────────────────────────

    #[test]
    fn exit_plan_mode_emits_plan_before_tool_use() {
        let entry = tool_use(
            "epm1",
            "ExitPlanMode",
            json!({"plan": "Here is my plan:\n1. Do A\n2. Do B"}),
        );
        let (events, _) = parse_entries(&[entry], Some(PendingTools::new()));
        assert!(events.len() >= 2);
        assert_eq!(events[0].content_type, ContentType::Text);
        assert!(events[0].text.contains("Do A"));
        assert_eq!(events[1].content_type, ContentType::ToolUse);
    }

    #[test]
    fn edit_result_renders_cached_diff() {
        let entries = vec![
            tool_use(
                "t1",
                "Edit",
                json!({"file_path": "/t.py", "old_string": "old code", "new_string": "new code"}),
            ),
            tool_result("t1", "File edited successfully", false),
        ];
        let (events, _) = parse_entries(&entries, Some(PendingTools::new()));
        let result = events
            .iter()
            .find(|e| e.content_type == ContentType::ToolResult)
            .unwrap();
        assert!(result.text.contains("Added") || result.text.contains("removed"));
    }

    #[test]
    fn error_and_interrupted_results() {
        let entries = vec![
            tool_use("t1", "Bash", json!({"command": "bad"})),
            tool_result("t1", "command not found", true),
            tool_use("t2", "Bash", json!({"command": "sleep 60"})),
            tool_result("t2", "[Request interrupted by user for tool use]", false),
        ];
        let (events, _) = parse_entries(&entries, Some(PendingTools::new()));
        let results: Vec<_> = events
            .iter()
            .filter(|e| e.content_type == ContentType::ToolResult)
            .collect();
        assert!(results[0].text.contains("Error"));
        assert!(results[1].text.contains("Interrupted"));
    }

    #[test]
    fn oneshot_flushes_pending_tools() {
        let (events, pending) =
            parse_entries(&[tool_use("t1", "Bash", json!({"command": "ls"}))], None);
        let uses: Vec<_> = events
            .iter()
            .filter(|e| e.content_type == ContentType::ToolUse)
            .collect();
        assert!(!uses.is_empty());
        assert!(pending.is_empty());
    }

    // ── user_text helper ─────────────────────────────────────────────

    #[test]
    fn user_text_skips_wrappers_and_commands() {
        assert_eq!(
            user_text(&user_text_record("plain question")).as_deref(),
            Some("plain question")
        );
        assert_eq!(
            user_text(&user_text_record("<system-reminder>x</system-reminder>")),
            None
        );
        assert_eq!(
            user_text(&user_text_record(
                "<command-name>clear</command-name><local-command-stdout></local-command-stdout>"
            )),
            None
        );
        assert_eq!(user_text(&assistant_text("nope")), None);
    }
}
