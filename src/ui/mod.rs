//! Rendering. Every function here is a pure read of [`AppState`].

use ratatui::Frame;

use crate::app::{AppMode, AppState};

pub mod browser;
pub mod popup;

pub use browser::{breadcrumb, draw_browser};
pub use popup::{draw_help_popup, draw_upload_popup};

/// Draw the whole screen for the current state
pub fn draw(frame: &mut Frame<'_>, state: &AppState) {
    let area = frame.area();
    draw_browser(frame, area, state);

    match &state.mode {
        AppMode::Browsing => {}
        AppMode::UploadPathEntry { input } => draw_upload_popup(frame, area, input, state),
        AppMode::Help => draw_help_popup(frame, area),
    }
}
