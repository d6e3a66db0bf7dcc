use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::app::{AppMode, AppState};

pub mod browsing;
pub mod upload_prompt;

pub use browsing::handle_browsing_key;
pub use upload_prompt::handle_upload_prompt_key;

/// Result of handling a key event
#[derive(Debug, PartialEq, Eq)]
pub enum KeyFlow {
    Continue,
    Quit,
}

/// Top-level key event handler, dispatching by AppMode
pub fn handle_key_event(state: &mut AppState, key: KeyEvent) -> KeyFlow {
    // Only handle actual key presses (ignore repeats/releases)
    if key.kind != KeyEventKind::Press {
        return KeyFlow::Continue;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return KeyFlow::Quit;
    }

    match &state.mode {
        AppMode::Browsing => handle_browsing_key(state, key),
        AppMode::UploadPathEntry { .. } => handle_upload_prompt_key(state, key),
        AppMode::Help => {
            state.dismiss_help();
            KeyFlow::Continue
        }
    }
}

/// Paste event handler; only the upload prompt accepts text
pub fn handle_paste_event(state: &mut AppState, data: &str) {
    if let AppMode::UploadPathEntry { input } = &mut state.mode {
        // Paths are single-line
        input.insert_str(data.replace(['\r', '\n'], ""));
    }
}
