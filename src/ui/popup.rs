use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use tui_textarea::TextArea;

use super::breadcrumb;
use crate::app::AppState;

const KEY_BINDINGS: &[(&str, &str)] = &[
    ("↑ ↓ / j k", "Move selection"),
    ("g / G", "First / last entry"),
    ("→ / l / Enter", "Open folder"),
    ("← / h / Backspace", "Parent folder"),
    ("d", "Download selected document"),
    ("D", "Download every document in this folder"),
    ("u", "Upload a local file into this folder"),
    ("r", "Refresh listing"),
    ("?", "Show this help"),
    ("q / Ctrl+C", "Quit"),
];

/// Centered popup of fixed height, `width_pct` percent wide
fn popup_rect(area: Rect, width_pct: u16, height: u16) -> Rect {
    let popup_w = ((u32::from(area.width) * u32::from(width_pct) / 100) as u16)
        .max(20)
        .min(area.width);
    let popup_h = height.min(area.height);
    Rect {
        x: area.x + (area.width.saturating_sub(popup_w)) / 2,
        y: area.y + (area.height.saturating_sub(popup_h)) / 2,
        width: popup_w,
        height: popup_h,
    }
}

fn hint(text: &str) -> Line<'_> {
    Line::from(Span::styled(
        text,
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::DIM),
    ))
}

// Upload path prompt
pub fn draw_upload_popup(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    input: &TextArea<'static>,
    state: &AppState,
) {
    let popup = popup_rect(area, 70, 6);
    frame.render_widget(Clear, popup);

    let title = format!(" Upload to {} ", breadcrumb(state.nav()));
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(Span::styled(
            title,
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )));
    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);

    frame.render_widget(Paragraph::new("Local file path:"), layout[0]);
    frame.render_widget(input, layout[1]);
    frame.render_widget(
        Paragraph::new(hint("Enter: Upload | Esc: Cancel")),
        layout[2],
    );
}

// Key binding overlay
pub fn draw_help_popup(frame: &mut ratatui::Frame<'_>, area: Rect) {
    let height = KEY_BINDINGS.len() as u16 + 4;
    let popup = popup_rect(area, 60, height);
    frame.render_widget(Clear, popup);

    let key_width = KEY_BINDINGS
        .iter()
        .map(|(keys, _)| keys.chars().count())
        .max()
        .unwrap_or(0);

    let mut lines: Vec<Line> = KEY_BINDINGS
        .iter()
        .map(|(keys, action)| {
            Line::from(vec![
                Span::styled(
                    format!(" {keys:<key_width$}  "),
                    Style::default().fg(Color::Yellow),
                ),
                Span::raw(*action),
            ])
        })
        .collect();
    lines.push(Line::from(""));
    lines.push(hint(" Press any key to dismiss"));

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(Span::styled(
            " Key bindings ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )));
    frame.render_widget(Paragraph::new(lines).block(block), popup);
}
