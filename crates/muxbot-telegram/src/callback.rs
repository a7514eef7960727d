//! Typed inline-keyboard callback data.
//!
//! Telegram caps callback data at 64 bytes, so payloads use short fixed
//! prefixes and indices instead of names where a name could overflow.
//! Parsing yields a [`CallbackAction`] that handlers match exhaustively.

/// Telegram's hard limit on callback data.
pub const CALLBACK_DATA_MAX: usize = 64;

// History pagination: hp:<page>:<window>:<start>:<end>
const CB_HISTORY_PREV: &str = "hp:";
const CB_HISTORY_NEXT: &str = "hn:";
// Directory browser
const CB_DIR_SELECT: &str = "db:sel:";
const CB_DIR_UP: &str = "db:up";
const CB_DIR_CONFIRM: &str = "db:confirm";
const CB_DIR_CANCEL: &str = "db:cancel";
const CB_DIR_PAGE: &str = "db:page:";
// Screenshot
const CB_SCREENSHOT_REFRESH: &str = "ss:ref:";
// Interactive UI
const CB_ASK_UP: &str = "aq:up:";
const CB_ASK_DOWN: &str = "aq:down:";
const CB_ASK_LEFT: &str = "aq:left:";
const CB_ASK_RIGHT: &str = "aq:right:";
const CB_ASK_ESC: &str = "aq:esc:";
const CB_ASK_ENTER: &str = "aq:enter:";
const CB_ASK_REFRESH: &str = "aq:ref:";
const CB_ASK_OPTION: &str = "aq:opt:";

const CB_NOOP: &str = "noop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrowKey {
    Up,
    Down,
    Left,
    Right,
}

impl ArrowKey {
    /// The token `send_keys(literal=false)` understands.
    pub fn key_token(&self) -> &'static str {
        match self {
            ArrowKey::Up => "Up",
            ArrowKey::Down => "Down",
            ArrowKey::Left => "Left",
            ArrowKey::Right => "Right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    HistoryPage {
        newer: bool,
        page: usize,
        window: String,
        start_byte: u64,
        end_byte: u64,
    },
    DirSelect { index: usize },
    DirUp,
    DirPage { page: usize },
    DirConfirm,
    DirCancel,
    ScreenshotRefresh { window: String },
    Arrow { key: ArrowKey, window: String },
    AskEsc { window: String },
    AskEnter { window: String },
    AskRefresh { window: String },
    AskOption { index: usize, window: String },
    Noop,
}

fn clamp(data: String) -> String {
    if data.len() <= CALLBACK_DATA_MAX {
        return data;
    }
    // Truncate on a char boundary; better a clipped window name than a
    // rejected keyboard.
    let mut end = CALLBACK_DATA_MAX;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    data[..end].to_string()
}

impl CallbackAction {
    /// Encode to wire form, clamped to the 64-byte limit.
    pub fn encode(&self) -> String {
        let raw = match self {
            CallbackAction::HistoryPage {
                newer,
                page,
                window,
                start_byte,
                end_byte,
            } => {
                let prefix = if *newer { CB_HISTORY_NEXT } else { CB_HISTORY_PREV };
                format!("{prefix}{page}:{window}:{start_byte}:{end_byte}")
            }
            CallbackAction::DirSelect { index } => format!("{CB_DIR_SELECT}{index}"),
            CallbackAction::DirUp => CB_DIR_UP.to_string(),
            CallbackAction::DirPage { page } => format!("{CB_DIR_PAGE}{page}"),
            CallbackAction::DirConfirm => CB_DIR_CONFIRM.to_string(),
            CallbackAction::DirCancel => CB_DIR_CANCEL.to_string(),
            CallbackAction::ScreenshotRefresh { window } => {
                format!("{CB_SCREENSHOT_REFRESH}{window}")
            }
            CallbackAction::Arrow { key, window } => {
                let prefix = match key {
                    ArrowKey::Up => CB_ASK_UP,
                    ArrowKey::Down => CB_ASK_DOWN,
                    ArrowKey::Left => CB_ASK_LEFT,
                    ArrowKey::Right => CB_ASK_RIGHT,
                };
                format!("{prefix}{window}")
            }
            CallbackAction::AskEsc { window } => format!("{CB_ASK_ESC}{window}"),
            CallbackAction::AskEnter { window } => format!("{CB_ASK_ENTER}{window}"),
            CallbackAction::AskRefresh { window } => format!("{CB_ASK_REFRESH}{window}"),
            CallbackAction::AskOption { index, window } => {
                format!("{CB_ASK_OPTION}{index}:{window}")
            }
            CallbackAction::Noop => CB_NOOP.to_string(),
        };
        clamp(raw)
    }

    /// Parse wire form. Unknown or malformed data yields `None`.
    pub fn parse(data: &str) -> Option<CallbackAction> {
        if data == CB_NOOP {
            return Some(CallbackAction::Noop);
        }
        if data == CB_DIR_UP {
            return Some(CallbackAction::DirUp);
        }
        if data == CB_DIR_CONFIRM {
            return Some(CallbackAction::DirConfirm);
        }
        if data == CB_DIR_CANCEL {
            return Some(CallbackAction::DirCancel);
        }
        if let Some(rest) = data.strip_prefix(CB_DIR_SELECT) {
            return Some(CallbackAction::DirSelect {
                index: rest.parse().ok()?,
            });
        }
        if let Some(rest) = data.strip_prefix(CB_DIR_PAGE) {
            return Some(CallbackAction::DirPage {
                page: rest.parse().ok()?,
            });
        }
        if let Some(rest) = data.strip_prefix(CB_SCREENSHOT_REFRESH) {
            return Some(CallbackAction::ScreenshotRefresh {
                window: rest.to_string(),
            });
        }

        for (prefix, newer) in [(CB_HISTORY_PREV, false), (CB_HISTORY_NEXT, true)] {
            if let Some(rest) = data.strip_prefix(prefix) {
                return parse_history(rest, newer);
            }
        }

        for (prefix, key) in [
            (CB_ASK_UP, ArrowKey::Up),
            (CB_ASK_DOWN, ArrowKey::Down),
            (CB_ASK_LEFT, ArrowKey::Left),
            (CB_ASK_RIGHT, ArrowKey::Right),
        ] {
            if let Some(rest) = data.strip_prefix(prefix) {
                return Some(CallbackAction::Arrow {
                    key,
                    window: rest.to_string(),
                });
            }
        }
        if let Some(rest) = data.strip_prefix(CB_ASK_ESC) {
            return Some(CallbackAction::AskEsc {
                window: rest.to_string(),
            });
        }
        if let Some(rest) = data.strip_prefix(CB_ASK_ENTER) {
            return Some(CallbackAction::AskEnter {
                window: rest.to_string(),
            });
        }
        if let Some(rest) = data.strip_prefix(CB_ASK_REFRESH) {
            return Some(CallbackAction::AskRefresh {
                window: rest.to_string(),
            });
        }
        if let Some(rest) = data.strip_prefix(CB_ASK_OPTION) {
            let (index, window) = rest.split_once(':')?;
            return Some(CallbackAction::AskOption {
                index: index.parse().ok()?,
                window: window.to_string(),
            });
        }

        None
    }
}

/// `<page>:<window>:<start>:<end>`, where the window name may itself
/// contain colons — split from both ends.
fn parse_history(rest: &str, newer: bool) -> Option<CallbackAction> {
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() < 4 {
        return None;
    }
    let page = parts[0].parse().ok()?;
    let start_byte = parts[parts.len() - 2].parse().ok()?;
    let end_byte = parts[parts.len() - 1].parse().ok()?;
    let window = parts[1..parts.len() - 2].join(":");
    Some(CallbackAction::HistoryPage {
        newer,
        page,
        window,
        start_byte,
        end_byte,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple_actions() {
        for action in [
            CallbackAction::DirUp,
            CallbackAction::DirConfirm,
            CallbackAction::DirCancel,
            CallbackAction::Noop,
            CallbackAction::DirSelect { index: 3 },
            CallbackAction::DirPage { page: 7 },
        ] {
            assert_eq!(CallbackAction::parse(&action.encode()), Some(action));
        }
    }

    #[test]
    fn roundtrip_window_actions() {
        for action in [
            CallbackAction::Arrow {
                key: ArrowKey::Up,
                window: "proj".into(),
            },
            CallbackAction::AskEsc { window: "proj".into() },
            CallbackAction::AskEnter { window: "proj".into() },
            CallbackAction::AskRefresh { window: "proj".into() },
            CallbackAction::ScreenshotRefresh { window: "proj".into() },
            CallbackAction::AskOption {
                index: 2,
                window: "proj".into(),
            },
        ] {
            assert_eq!(CallbackAction::parse(&action.encode()), Some(action));
        }
    }

    #[test]
    fn roundtrip_history_with_colons_in_window() {
        let action = CallbackAction::HistoryPage {
            newer: false,
            page: 2,
            window: "we:ird".into(),
            start_byte: 10,
            end_byte: 999,
        };
        assert_eq!(CallbackAction::parse(&action.encode()), Some(action));
    }

    #[test]
    fn encode_respects_64_byte_cap() {
        let action = CallbackAction::ScreenshotRefresh {
            window: "w".repeat(100),
        };
        assert!(action.encode().len() <= CALLBACK_DATA_MAX);
    }

    #[test]
    fn garbage_parses_to_none() {
        assert_eq!(CallbackAction::parse("zz:nope"), None);
        assert_eq!(CallbackAction::parse("db:sel:notanumber"), None);
        assert_eq!(CallbackAction::parse("hp:1:w"), None);
        assert_eq!(CallbackAction::parse(""), None);
    }
}
