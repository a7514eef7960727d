//! Directory browser: a paginated inline-keyboard picker used to choose
//! the working directory for a new session.

use std::path::{Path, PathBuf};

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::callback::CallbackAction;

/// Directories per page.
pub const DIRS_PER_PAGE: usize = 6;

fn btn(label: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.encode())
}

/// List non-hidden subdirectories, sorted by name.
fn list_subdirs(path: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut dirs: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    dirs.sort();
    dirs
}

/// Build the browser view for `current_path`.
///
/// Returns `(text, keyboard, subdirs)`; the subdir list is cached by the
/// caller so selection callbacks can carry indices instead of names.
pub fn build_directory_browser(
    current_path: &Path,
    page: usize,
) -> (String, InlineKeyboardMarkup, Vec<String>) {
    let path: PathBuf = if current_path.is_dir() {
        current_path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    };

    let subdirs = list_subdirs(&path);
    let total_pages = subdirs.len().div_ceil(DIRS_PER_PAGE).max(1);
    let page = page.min(total_pages - 1);
    let start = page * DIRS_PER_PAGE;
    let page_dirs = &subdirs[start..subdirs.len().min(start + DIRS_PER_PAGE)];

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    let mut row: Vec<InlineKeyboardButton> = Vec::new();
    for (i, name) in page_dirs.iter().enumerate() {
        let display: String = if name.chars().count() > 13 {
            let head: String = name.chars().take(12).collect();
            format!("{head}…")
        } else {
            name.clone()
        };
        // Global index into the cached subdir list, so callbacks stay
        // inside the 64-byte limit regardless of directory names.
        let index = start + i;
        row.push(btn(&format!("📁 {display}"), CallbackAction::DirSelect { index }));
        if row.len() == 2 {
            rows.push(std::mem::take(&mut row));
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }

    if total_pages > 1 {
        let mut nav = Vec::new();
        if page > 0 {
            nav.push(btn("◀", CallbackAction::DirPage { page: page - 1 }));
        }
        nav.push(btn(&format!("{}/{}", page + 1, total_pages), CallbackAction::Noop));
        if page < total_pages - 1 {
            nav.push(btn("▶", CallbackAction::DirPage { page: page + 1 }));
        }
        rows.push(nav);
    }

    let mut actions = Vec::new();
    if path.parent().is_some() {
        actions.push(btn("..", CallbackAction::DirUp));
    }
    actions.push(btn("Select", CallbackAction::DirConfirm));
    actions.push(btn("Cancel", CallbackAction::DirCancel));
    rows.push(actions);

    let home = std::env::var("HOME").unwrap_or_default();
    let display_path = if !home.is_empty() {
        path.display().to_string().replacen(&home, "~", 1)
    } else {
        path.display().to_string()
    };
    let text = if subdirs.is_empty() {
        format!("**Select Working Directory**\n\nCurrent: `{display_path}`\n\n(No subdirectories)")
    } else {
        format!(
            "**Select Working Directory**\n\nCurrent: `{display_path}`\n\nTap a folder to enter, or select the current directory"
        )
    };

    (text, InlineKeyboardMarkup::new(rows), subdirs)
}
