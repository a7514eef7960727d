//! Event and pending-tool types produced by the transcript parser.

use std::collections::HashMap;

use serde_json::Value;

/// Sentinels wrapping text the downstream markdown pass should render as
/// a collapsible blockquote. Chosen so they never occur in real output.
pub const EXPANDABLE_QUOTE_START: &str = "<!--expandable-->";
pub const EXPANDABLE_QUOTE_END: &str = "<!--/expandable-->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    LocalCommand,
}

impl ContentType {
    /// Tool messages break the delivery-queue merge chain: a `tool_use`
    /// message is the edit target of a later `tool_result`, and a
    /// `tool_result` edits a previous message.
    pub fn breaks_merge(self) -> bool {
        matches!(self, ContentType::ToolUse | ContentType::ToolResult)
    }
}

/// One parsed transcript event, in file order.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub role: Role,
    pub content_type: ContentType,
    pub text: String,
    pub tool_use_id: Option<String>,
    pub tool_name: Option<String>,
    pub timestamp: Option<String>,
}

impl ParsedEvent {
    pub(crate) fn assistant(content_type: ContentType, text: String, timestamp: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content_type,
            text,
            tool_use_id: None,
            tool_name: None,
            timestamp,
        }
    }

    pub(crate) fn user(content_type: ContentType, text: String, timestamp: Option<String>) -> Self {
        Self {
            role: Role::User,
            content_type,
            text,
            tool_use_id: None,
            tool_name: None,
            timestamp,
        }
    }
}

/// A `tool_use` block awaiting its `tool_result`.
///
/// Created when the tool_use record is observed; consumed when the
/// matching result arrives, which may be many polling cycles later.
#[derive(Debug, Clone)]
pub struct PendingToolInfo {
    pub tool_name: String,
    pub input: Value,
    /// Cached for Edit-tool diff formatting — the result body does not
    /// carry the strings.
    pub edit_old: Option<String>,
    pub edit_new: Option<String>,
    pub timestamp: Option<String>,
}

pub type PendingTools = HashMap<String, PendingToolInfo>;
