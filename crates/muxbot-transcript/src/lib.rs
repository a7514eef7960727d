//! Transcript decoding for Claude Code JSONL session logs.
//!
//! Turns raw line-delimited JSON records into an ordered stream of typed
//! [`ParsedEvent`]s, pairing `tool_use` blocks with their `tool_result`
//! across arbitrarily many records via a carry-over pending map.

pub mod event;
pub mod format;
pub mod parser;

pub use event::{ContentType, ParsedEvent, PendingToolInfo, PendingTools, Role};
pub use event::{EXPANDABLE_QUOTE_END, EXPANDABLE_QUOTE_START};
pub use parser::{parse_entries, parse_line, user_text};
