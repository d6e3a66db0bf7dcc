use crossterm::event::{KeyCode, KeyEvent};

use super::KeyFlow;
use crate::app::AppState;

pub fn handle_browsing_key(state: &mut AppState, key: KeyEvent) -> KeyFlow {
    match key.code {
        KeyCode::Char('q') => return KeyFlow::Quit,
        KeyCode::Char('j') | KeyCode::Down => state.select_next(),
        KeyCode::Char('k') | KeyCode::Up => state.select_previous(),
        KeyCode::Char('g') | KeyCode::Home => state.select_first(),
        KeyCode::Char('G') | KeyCode::End => state.select_last(),
        KeyCode::Char('l') | KeyCode::Right | KeyCode::Enter => state.enter(),
        KeyCode::Char('h') | KeyCode::Left | KeyCode::Backspace => state.back(),
        KeyCode::Char('d') => state.download_selected(),
        KeyCode::Char('D') => state.download_all(),
        KeyCode::Char('u') => state.start_upload(),
        KeyCode::Char('r') => state.refresh(),
        KeyCode::Char('?') => state.show_help(),
        _ => {}
    }
    KeyFlow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppMode, Command};
    use crate::config::AppSettings;
    use crossterm::event::KeyModifiers;

    fn press(state: &mut AppState, code: KeyCode) -> KeyFlow {
        handle_browsing_key(state, KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn quit_and_refresh() {
        let mut state = AppState::new(&AppSettings::default());
        state.drain_commands();

        assert_eq!(press(&mut state, KeyCode::Char('q')), KeyFlow::Quit);

        assert_eq!(press(&mut state, KeyCode::Char('r')), KeyFlow::Continue);
        assert!(matches!(
            state.drain_commands().as_slice(),
            [Command::List(request)] if request.folder_id.is_empty()
        ));
    }

    #[test]
    fn mode_switching_keys() {
        let mut state = AppState::new(&AppSettings::default());
        press(&mut state, KeyCode::Char('u'));
        assert!(matches!(state.mode, AppMode::UploadPathEntry { .. }));

        state.cancel_upload();
        press(&mut state, KeyCode::Char('?'));
        assert!(matches!(state.mode, AppMode::Help));
    }
}
