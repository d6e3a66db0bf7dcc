use crossterm::event::{KeyCode, KeyEvent};

use super::KeyFlow;
use crate::app::{AppMode, AppState};

pub fn handle_upload_prompt_key(state: &mut AppState, key: KeyEvent) -> KeyFlow {
    match key.code {
        KeyCode::Esc => state.cancel_upload(),
        KeyCode::Enter => state.submit_upload(),
        _ => {
            if let AppMode::UploadPathEntry { input } = &mut state.mode {
                // Let TextArea handle all other key events (cursor movement, editing, etc.)
                input.input(key);
            }
        }
    }
    KeyFlow::Continue
}
