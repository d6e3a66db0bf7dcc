//! Document browser: breadcrumb header, entry table, transfers, status and key hints.

use chrono::Local;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
};

use crate::app::{AppState, Severity};
use crate::remote::{Crumb, Entry};
use crate::transfer::{JobKind, TransferJob, TransferState};

const ROOT_NAME: &str = "Documents";

/// Human readable path from root, e.g. `Documents / Notes / 2024`
pub fn breadcrumb(path: &[Crumb]) -> String {
    std::iter::once(ROOT_NAME)
        .chain(path.iter().map(|c| c.name.as_str()))
        .collect::<Vec<_>>()
        .join(" / ")
}

pub fn draw_browser(f: &mut Frame, area: Rect, state: &AppState) {
    let transfers_height = if state.transfers().is_empty() { 0 } else { 1 };

    // Main layout: header, content, transfers, status, footer
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(transfers_height),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);

    draw_header(f, main_layout[0], state);
    draw_entries(f, main_layout[1], state);
    if transfers_height > 0 {
        draw_transfers(f, main_layout[2], state.transfers());
    }
    draw_status(f, main_layout[3], state);
    draw_footer(f, main_layout[4]);
}

fn draw_header(f: &mut Frame, area: Rect, state: &AppState) {
    let header_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);

    let mut spans = vec![Span::styled(
        format!(" {} ", breadcrumb(&state.snapshot.path)),
        header_style,
    )];
    if state.is_loading() {
        spans.push(Span::styled(
            "⟳ Loading…",
            Style::default().fg(Color::Yellow),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(header_style)
            .title(" reMarkable "),
    );
    f.render_widget(header, area);
}

fn entry_row(entry: &Entry) -> Row<'static> {
    let (icon, name_style) = if entry.is_folder() {
        ("▸", Style::default().fg(Color::LightBlue))
    } else {
        (" ", Style::default().fg(Color::White))
    };
    let modified = entry
        .modified
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    Row::new(vec![
        Cell::from(icon),
        Cell::from(Span::styled(entry.name.clone(), name_style)),
        Cell::from(Span::styled(modified, Style::default().fg(Color::DarkGray))),
    ])
}

fn draw_entries(f: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    if state.snapshot.is_empty() {
        let text = if state.is_loading() {
            ""
        } else {
            "This folder is empty"
        };
        let empty = Paragraph::new(Span::styled(
            text,
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        f.render_widget(empty, area);
        return;
    }

    let rows: Vec<Row> = state.snapshot.entries.iter().map(entry_row).collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(1),
            Constraint::Min(10),
            Constraint::Length(16),
        ],
    )
    .block(block)
    .row_highlight_style(
        Style::default()
            .bg(Color::Cyan)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    );

    let mut table_state = TableState::default().with_selected(Some(state.cursor));
    f.render_stateful_widget(table, area, &mut table_state);
}

fn transfer_span(job: &TransferJob) -> Span<'static> {
    let arrow = match job.kind {
        JobKind::Download => "↓",
        JobKind::Upload => "↑",
    };
    let progress = match (&job.state, job.ratio()) {
        (_, Some(ratio)) => format!("{:.0}%", ratio * 100.0),
        (TransferState::InProgress { .. }, None) if job.transferred_bytes() > 0 => {
            format!("{} KiB", job.transferred_bytes() / 1024)
        }
        (TransferState::Pending, None) => "queued".to_string(),
        _ => "…".to_string(),
    };
    Span::styled(
        format!(" {arrow} {} {progress} ", job.label),
        Style::default().fg(Color::Yellow),
    )
}

fn draw_transfers(f: &mut Frame, area: Rect, jobs: &[TransferJob]) {
    let line = Line::from(jobs.iter().map(transfer_span).collect::<Vec<_>>());
    f.render_widget(Paragraph::new(line), area);
}

fn draw_status(f: &mut Frame, area: Rect, state: &AppState) {
    let Some(status) = &state.status else {
        return;
    };
    let style = match status.severity {
        Severity::Info => Style::default().fg(Color::Green),
        Severity::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    };
    f.render_widget(
        Paragraph::new(Span::styled(format!(" {}", status.text), style)),
        area,
    );
}

fn draw_footer(f: &mut Frame, area: Rect) {
    let footer_text =
        " ↑↓/jk: Move | ←→/hl: Folder | d: Download | D: All | u: Upload | r: Refresh | ?: Help | q: Quit";
    let footer = Paragraph::new(Line::from(vec![Span::styled(
        footer_text,
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::DIM),
    )]));
    f.render_widget(footer, area);
}
