use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::Event;
use ratatui::Terminal;
use ratatui::prelude::Backend;
use tokio::sync::mpsc;
use tui_textarea::TextArea;

use crate::config::manager::AppSettings;
use crate::coordinator::Coordinator;
use crate::error::{AppError, Result};
use crate::events::AppEvent;
use crate::key_event::{KeyFlow, handle_key_event, handle_paste_event};
use crate::remote::{Crumb, DirectorySnapshot, ROOT_FOLDER_ID, RemoteFs};
use crate::sanitize::local_file_names;
use crate::transfer::{
    CoordinatorEvent, JobEvent, JobHandle, JobId, JobKind, ListingOrigin, ListingRequest,
    ListingResult, TransferJob, TransferRequest, TransferState,
};
use crate::utils::expand_tilde;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Clone, Debug)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
    pub created_at: Instant,
}

/// Only one modal is active at a time
pub enum AppMode {
    Browsing,
    UploadPathEntry { input: TextArea<'static> },
    Help,
}

pub fn create_path_textarea() -> TextArea<'static> {
    let mut textarea = TextArea::default();
    textarea.set_placeholder_text("Path of a local PDF or EPUB, e.g. ~/Documents/paper.pdf");
    textarea.set_cursor_line_style(ratatui::style::Style::default());
    textarea
}

/// Work the state machine asks the runner to start
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    List(ListingRequest),
    Transfers(Vec<TransferRequest>),
}

/// All UI state. Mutated only by the main loop; background work reaches
/// it through [`AppState::apply_coordinator_event`].
pub struct AppState {
    pub mode: AppMode,
    pub snapshot: DirectorySnapshot,
    pub cursor: usize,
    pub status: Option<StatusMessage>,
    nav: Vec<Crumb>,
    pending_listing: Option<u64>,
    next_request_id: u64,
    // Entry to select once the parent listing arrives after going back
    reselect: Option<String>,
    transfers: Vec<TransferJob>,
    failed_post_upload_listing: HashMap<JobId, String>,
    download_dir: PathBuf,
    download_format: String,
    status_ttl: Option<Duration>,
    commands: Vec<Command>,
}

impl AppState {
    /// Fresh state showing an empty root, with the root listing already requested
    pub fn new(settings: &AppSettings) -> Self {
        let mut state = Self {
            mode: AppMode::Browsing,
            snapshot: DirectorySnapshot::new(ROOT_FOLDER_ID, Vec::new()),
            cursor: 0,
            status: None,
            nav: Vec::new(),
            pending_listing: None,
            next_request_id: 0,
            reselect: None,
            transfers: Vec::new(),
            failed_post_upload_listing: HashMap::new(),
            download_dir: settings
                .download_dir
                .to_str()
                .map(expand_tilde)
                .unwrap_or_else(|| settings.download_dir.clone()),
            download_format: settings.download_format.clone(),
            status_ttl: settings.status_ttl(),
            commands: Vec::new(),
        };
        state.request_listing();
        state
    }

    pub fn current_folder_id(&self) -> &str {
        self.nav.last().map_or(ROOT_FOLDER_ID, |c| c.id.as_str())
    }

    /// Breadcrumb from root to the current folder, root excluded
    pub fn nav(&self) -> &[Crumb] {
        &self.nav
    }

    pub fn is_loading(&self) -> bool {
        self.pending_listing.is_some()
    }

    pub fn transfers(&self) -> &[TransferJob] {
        &self.transfers
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn set_info(&mut self, text: impl Into<String>) {
        self.set_status(text.into(), Severity::Info);
    }

    pub fn set_error(&mut self, text: impl Display) {
        self.set_status(text.to_string(), Severity::Error);
    }

    fn set_status(&mut self, text: String, severity: Severity) {
        self.status = Some(StatusMessage {
            text,
            severity,
            created_at: Instant::now(),
        });
    }

    /// Expire the status message; returns `true` if the screen changed
    pub fn on_tick(&mut self, now: Instant) -> bool {
        let Some(ttl) = self.status_ttl else {
            return false;
        };
        match &self.status {
            Some(status) if now.saturating_duration_since(status.created_at) >= ttl => {
                self.status = None;
                true
            }
            _ => false,
        }
    }

    pub fn select_next(&mut self) {
        if self.cursor + 1 < self.snapshot.len() {
            self.cursor += 1;
        }
    }

    pub fn select_previous(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn select_first(&mut self) {
        self.cursor = 0;
    }

    pub fn select_last(&mut self) {
        self.cursor = self.snapshot.len().saturating_sub(1);
    }

    /// Open the folder under the cursor
    pub fn enter(&mut self) {
        let Some(entry) = self.snapshot.get(self.cursor) else {
            return;
        };
        if !entry.is_folder() {
            let text = format!("'{}' is a document, press d to download it", entry.name);
            self.set_info(text);
            return;
        }

        tracing::debug!("Entering folder '{}' ({})", entry.name, entry.id);
        self.nav.push(Crumb::new(entry.id.clone(), entry.name.clone()));
        self.reselect = None;
        self.show_empty_current_folder();
        self.request_listing();
    }

    /// Return to the parent folder
    pub fn back(&mut self) {
        let Some(left) = self.nav.pop() else {
            self.set_info("Already at root");
            return;
        };
        self.reselect = Some(left.id);
        self.show_empty_current_folder();
        self.request_listing();
    }

    /// Re-list the current folder, keeping the visible entries until it arrives
    pub fn refresh(&mut self) {
        self.request_listing();
    }

    fn show_empty_current_folder(&mut self) {
        self.snapshot = DirectorySnapshot::new(self.current_folder_id(), Vec::new())
            .with_path(self.nav.clone());
        self.cursor = 0;
    }

    fn request_listing(&mut self) {
        self.next_request_id += 1;
        let request = ListingRequest {
            request_id: self.next_request_id,
            folder_id: self.current_folder_id().to_string(),
        };
        self.pending_listing = Some(request.request_id);
        self.commands.push(Command::List(request));
    }

    /// Download the document under the cursor into the download directory
    pub fn download_selected(&mut self) {
        let Some(entry) = self.snapshot.get(self.cursor) else {
            return;
        };
        if entry.is_folder() {
            self.set_error("Cannot download a folder");
            return;
        }
        let selected_id = entry.id.clone();

        // Names are resolved against the whole folder so repeated downloads
        // of colliding documents land on the same local files.
        if let Some(request) = self
            .download_requests()
            .into_iter()
            .find(|r| matches!(r, TransferRequest::Download { entry, .. } if entry.id == selected_id))
        {
            self.commands.push(Command::Transfers(vec![request]));
        }
    }

    /// Download every document of the current folder
    pub fn download_all(&mut self) {
        let requests = self.download_requests();
        if requests.is_empty() {
            self.set_info("No documents in this folder");
            return;
        }
        self.commands.push(Command::Transfers(requests));
    }

    fn download_requests(&self) -> Vec<TransferRequest> {
        let files: Vec<_> = self.snapshot.files().collect();
        let names: Vec<&str> = files.iter().map(|e| e.name.as_str()).collect();
        local_file_names(&names, &self.download_format)
            .into_iter()
            .zip(files)
            .map(|(name, entry)| TransferRequest::Download {
                entry: entry.clone(),
                local_path: self.download_dir.join(name),
            })
            .collect()
    }

    pub fn start_upload(&mut self) {
        self.mode = AppMode::UploadPathEntry {
            input: create_path_textarea(),
        };
    }

    pub fn cancel_upload(&mut self) {
        self.mode = AppMode::Browsing;
    }

    /// Submit the typed path as an upload into the current folder
    pub fn submit_upload(&mut self) {
        let AppMode::UploadPathEntry { input } = &self.mode else {
            return;
        };
        let typed = input.lines().join("");
        let typed = typed.trim();
        if typed.is_empty() {
            self.set_error("Enter the path of a file to upload");
            return;
        }

        let request = TransferRequest::Upload {
            folder_id: self.current_folder_id().to_string(),
            local_path: expand_tilde(typed),
        };
        self.mode = AppMode::Browsing;
        self.commands.push(Command::Transfers(vec![request]));
    }

    pub fn show_help(&mut self) {
        self.mode = AppMode::Help;
    }

    pub fn dismiss_help(&mut self) {
        self.mode = AppMode::Browsing;
    }

    /// Record the coordinator's answer to one `Command::Transfers`
    pub fn on_submitted(&mut self, results: Vec<Result<JobHandle>>) {
        let mut started: Vec<JobHandle> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();
        let mut failure: Option<AppError> = None;

        for result in results {
            match result {
                Ok(handle) => started.push(handle),
                Err(AppError::AlreadyInProgress(what)) => rejected.push(what),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        // Jobs already running keep reporting, so track them whatever else failed
        for handle in &started {
            if !self.transfers.iter().any(|j| j.id == handle.id) {
                self.transfers.push(TransferJob::new(handle));
            }
        }

        if let Some(e) = failure {
            self.set_error(e);
            return;
        }

        match (started.as_slice(), rejected.is_empty()) {
            (_, false) => {
                let mut text = format!("Already in progress: {}", rejected.join(", "));
                if !started.is_empty() {
                    text.push_str(&format!(" ({} started)", started.len()));
                }
                self.set_error(text);
            }
            ([handle], true) => {
                let verb = match handle.kind {
                    JobKind::Download => "Downloading",
                    JobKind::Upload => "Uploading",
                };
                self.set_info(format!("{verb} {}", handle.label));
            }
            (handles, true) => self.set_info(format!("Started {} downloads", handles.len())),
        }
    }

    pub fn apply_coordinator_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Listing(listing) => self.apply_listing(listing),
            CoordinatorEvent::Job(job) => self.apply_job_event(job),
        }
    }

    fn apply_listing(&mut self, listing: ListingResult) {
        match listing.origin {
            ListingOrigin::Requested(request_id) => {
                if self.pending_listing != Some(request_id) {
                    tracing::debug!(
                        "Discarding stale listing {} of '{}'",
                        request_id,
                        listing.folder_id
                    );
                    return;
                }
                self.pending_listing = None;
                match listing.result {
                    Ok(snapshot) => self.replace_snapshot(snapshot),
                    Err(e) => self.set_error(e),
                }
            }
            ListingOrigin::AfterUpload(job_id) => match listing.result {
                Ok(snapshot)
                    if self.pending_listing.is_none()
                        && listing.folder_id == self.current_folder_id() =>
                {
                    self.replace_snapshot(snapshot)
                }
                Ok(_) => {}
                Err(e) => {
                    self.failed_post_upload_listing.insert(job_id, e.to_string());
                }
            },
        }
    }

    fn replace_snapshot(&mut self, snapshot: DirectorySnapshot) {
        let same_folder = snapshot.folder_id == self.snapshot.folder_id;
        let selected_id = self.snapshot.get(self.cursor).map(|e| e.id.clone());
        self.snapshot = snapshot.with_path(self.nav.clone());

        let keep = if same_folder { selected_id } else { None };
        let wanted = keep.or_else(|| self.reselect.take());
        self.cursor = wanted
            .and_then(|id| self.snapshot.entries.iter().position(|e| e.id == id))
            .unwrap_or(self.cursor)
            .min(self.snapshot.len().saturating_sub(1));
    }

    fn apply_job_event(&mut self, event: JobEvent) {
        if !event.state.is_terminal() {
            match self.transfers.iter_mut().find(|j| j.id == event.job_id) {
                Some(job) => job.state = event.state,
                None => self.transfers.push(TransferJob::from_event(&event)),
            }
            return;
        }

        self.transfers.retain(|j| j.id != event.job_id);
        match event.state {
            TransferState::Done => {
                let listing_error = self.failed_post_upload_listing.remove(&event.job_id);
                match (event.kind, listing_error) {
                    (JobKind::Download, _) => {
                        self.set_info(format!("Downloaded {}", event.label))
                    }
                    (JobKind::Upload, None) => self.set_info(format!("Uploaded {}", event.label)),
                    (JobKind::Upload, Some(e)) => self.set_error(format!(
                        "Uploaded {}, but refreshing the folder failed: {e}",
                        event.label
                    )),
                }
            }
            TransferState::Failed(failure) => {
                self.failed_post_upload_listing.remove(&event.job_id);
                self.set_error(format!(
                    "{} of {} failed: {}",
                    capitalize(&event.kind.to_string()),
                    event.label,
                    failure.reason
                ));
                if failure.not_found {
                    self.request_listing();
                }
            }
            TransferState::Pending | TransferState::InProgress { .. } => {}
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// App is the main application
pub struct App<B: Backend + Write, C: RemoteFs> {
    pub state: AppState,
    terminal: Terminal<B>,
    coordinator: Coordinator<C>,
    coordinator_rx: mpsc::Receiver<CoordinatorEvent>,
    shutdown_grace: Duration,
    needs_redraw: bool,
}

impl<B: Backend + Write, C: RemoteFs> Drop for App<B, C> {
    fn drop(&mut self) {
        use crossterm::event::DisableBracketedPaste;
        use crossterm::execute;
        use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};

        disable_raw_mode().ok();
        execute!(
            self.terminal.backend_mut(),
            DisableBracketedPaste,
            LeaveAlternateScreen
        )
        .ok();
        self.terminal.show_cursor().ok();
    }
}

impl<B: Backend + Write, C: RemoteFs> App<B, C> {
    pub fn new(
        terminal: Terminal<B>,
        coordinator: Coordinator<C>,
        coordinator_rx: mpsc::Receiver<CoordinatorEvent>,
        settings: &AppSettings,
    ) -> Self {
        Self {
            state: AppState::new(settings),
            terminal,
            coordinator,
            coordinator_rx,
            shutdown_grace: settings.shutdown_grace(),
            needs_redraw: true,
        }
    }

    pub fn init_terminal(&mut self) -> Result<()> {
        use crossterm::ExecutableCommand;
        use crossterm::event::EnableBracketedPaste;
        use crossterm::terminal::{EnterAlternateScreen, enable_raw_mode};

        enable_raw_mode().inspect_err(|e| tracing::error!("Error enabling raw mode: {}", e))?;
        self.terminal
            .backend_mut()
            .execute(EnterAlternateScreen)
            .inspect_err(|e| {
                tracing::error!(
                    "Error executing EnterAlternateScreen terminal command: {}",
                    e
                )
            })?;
        self.terminal
            .backend_mut()
            .execute(EnableBracketedPaste)
            .inspect_err(|e| {
                tracing::error!(
                    "Error executing EnableBracketedPaste terminal command: {}",
                    e
                )
            })?;
        self.terminal.clear()?;

        Ok(())
    }

    /// Mark that UI needs redrawing
    pub fn mark_redraw(&mut self) {
        self.needs_redraw = true;
    }

    /// Check if redraw is needed and mark as drawn
    pub fn should_redraw(&mut self) -> bool {
        let should = self.needs_redraw;
        self.needs_redraw = false;
        should
    }

    fn draw(&mut self) -> Result<()> {
        let state = &self.state;
        self.terminal.draw(|f| crate::ui::draw(f, state))?;
        Ok(())
    }

    /// Hand queued commands to the coordinator
    fn dispatch_commands(&mut self) {
        loop {
            let commands = self.state.drain_commands();
            if commands.is_empty() {
                return;
            }
            for command in commands {
                match command {
                    Command::List(request) => self.coordinator.request_listing(request),
                    Command::Transfers(requests) => {
                        let results = requests
                            .into_iter()
                            .map(|request| self.coordinator.submit(request))
                            .collect();
                        self.state.on_submitted(results);
                    }
                }
            }
            self.mark_redraw();
        }
    }

    pub async fn run(&mut self, rx: &mut mpsc::Receiver<AppEvent>) -> Result<()> {
        loop {
            self.dispatch_commands();

            if self.should_redraw() {
                self.draw()?;
            }

            tokio::select! {
                ev = rx.recv() => {
                    let Some(ev) = ev else {
                        tracing::warn!("App event channel closed");
                        break;
                    };
                    match ev {
                        AppEvent::Input(Event::Key(key)) => {
                            if let KeyFlow::Quit = handle_key_event(&mut self.state, key) {
                                break;
                            }
                            self.mark_redraw();
                        }
                        AppEvent::Input(Event::Paste(data)) => {
                            handle_paste_event(&mut self.state, &data);
                            self.mark_redraw();
                        }
                        AppEvent::Input(Event::Resize(..)) => self.mark_redraw(),
                        AppEvent::Input(_) => {}
                        AppEvent::Tick => {
                            if self.state.on_tick(Instant::now()) {
                                self.mark_redraw();
                            }
                        }
                    }
                }
                Some(event) = self.coordinator_rx.recv() => {
                    self.state.apply_coordinator_event(event);
                    self.mark_redraw();
                }
            }
        }

        tracing::info!("Quitting");
        self.state.status = None;
        if !self.coordinator.shutdown(self.shutdown_grace).await {
            tracing::warn!(
                "Background tasks still running after {:?}, exiting anyway",
                self.shutdown_grace
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Download, Entry};
    use crate::transfer::TransferFailure;
    use bytes::Bytes;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use futures::StreamExt;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use ratatui::backend::{TestBackend, WindowSize};
    use ratatui::buffer::Cell;
    use ratatui::layout::{Position, Size};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn settings() -> AppSettings {
        AppSettings {
            download_dir: PathBuf::from("/downloads"),
            ..AppSettings::default()
        }
    }

    fn root_listing() -> Vec<Entry> {
        vec![
            Entry::folder("a", "Notes", ROOT_FOLDER_ID),
            Entry::file("b", "Report:Q1.pdf", ROOT_FOLDER_ID),
        ]
    }

    fn only_listing(commands: Vec<Command>) -> ListingRequest {
        match commands.as_slice() {
            [Command::List(request)] => request.clone(),
            other => panic!("expected one listing command, got {other:?}"),
        }
    }

    fn deliver(state: &mut AppState, request: &ListingRequest, entries: Vec<Entry>) {
        state.apply_coordinator_event(CoordinatorEvent::Listing(ListingResult {
            origin: ListingOrigin::Requested(request.request_id),
            folder_id: request.folder_id.clone(),
            result: Ok(DirectorySnapshot::new(request.folder_id.clone(), entries)),
        }));
    }

    /// State showing the root listing with nothing queued
    fn browsing_root() -> AppState {
        let mut state = AppState::new(&settings());
        let request = only_listing(state.drain_commands());
        assert_eq!(request.folder_id, ROOT_FOLDER_ID);
        deliver(&mut state, &request, root_listing());
        state
    }

    fn job_event(id: JobId, kind: JobKind, state: TransferState) -> CoordinatorEvent {
        CoordinatorEvent::Job(JobEvent {
            job_id: id,
            kind,
            label: "Report_Q1.pdf".into(),
            state,
        })
    }

    #[test]
    fn starts_by_listing_root() {
        let state = browsing_root();
        assert!(!state.is_loading());
        assert_eq!(state.snapshot.len(), 2);
        assert!(state.nav().is_empty());
        assert!(matches!(state.mode, AppMode::Browsing));
    }

    #[test]
    fn cursor_is_clamped_without_wraparound() {
        let mut state = browsing_root();
        state.select_previous();
        assert_eq!(state.cursor, 0);
        state.select_next();
        state.select_next();
        state.select_next();
        assert_eq!(state.cursor, 1);
        state.select_first();
        assert_eq!(state.cursor, 0);
        state.select_last();
        assert_eq!(state.cursor, 1);
    }

    #[test]
    fn entering_folder_pushes_crumb_and_lists_it() {
        let mut state = browsing_root();
        state.enter();

        let request = only_listing(state.drain_commands());
        assert_eq!(request.folder_id, "a");
        let ids: Vec<&str> = state.nav().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(state.is_loading());

        deliver(&mut state, &request, vec![Entry::file("c", "Sketch", "a")]);
        assert_eq!(state.snapshot.folder_id, "a");
        assert_eq!(state.snapshot.path, vec![Crumb::new("a", "Notes")]);
        assert!(!state.is_loading());
    }

    #[test]
    fn entering_a_file_is_a_noop() {
        let mut state = browsing_root();
        state.select_next();
        state.enter();
        assert!(state.drain_commands().is_empty());
        assert!(state.nav().is_empty());
        assert_eq!(state.status.as_ref().unwrap().severity, Severity::Info);
    }

    #[test]
    fn back_at_root_does_not_underflow() {
        let mut state = browsing_root();
        state.back();
        assert!(state.drain_commands().is_empty());
        assert!(state.nav().is_empty());
        assert_eq!(state.status.as_ref().unwrap().text, "Already at root");
    }

    #[test]
    fn back_lists_parent_and_reselects_left_folder() {
        let mut state = browsing_root();
        state.enter();
        let into_a = only_listing(state.drain_commands());
        deliver(&mut state, &into_a, Vec::new());

        state.back();
        let parent = only_listing(state.drain_commands());
        assert_eq!(parent.folder_id, ROOT_FOLDER_ID);
        assert!(state.nav().is_empty());

        let mut entries = root_listing();
        entries.insert(0, Entry::folder("z", "Archive", ROOT_FOLDER_ID));
        deliver(&mut state, &parent, entries);
        assert_eq!(state.snapshot.get(state.cursor).unwrap().id, "a");
    }

    #[test]
    fn stale_listing_is_discarded() {
        let mut state = browsing_root();
        state.enter();
        let into_a = only_listing(state.drain_commands());
        state.back();
        let back_to_root = only_listing(state.drain_commands());

        // Listing of "a" arrives after the user already went back
        deliver(&mut state, &into_a, vec![Entry::file("c", "Sketch", "a")]);
        assert!(state.is_loading());
        assert!(state.snapshot.is_empty());

        deliver(&mut state, &back_to_root, root_listing());
        assert_eq!(state.snapshot.folder_id, ROOT_FOLDER_ID);
        assert_eq!(state.snapshot.len(), 2);
    }

    #[test]
    fn refresh_keeps_cursor_on_same_entry() {
        let mut state = browsing_root();
        state.select_next();
        state.refresh();
        let request = only_listing(state.drain_commands());

        let mut entries = root_listing();
        entries.insert(0, Entry::file("n", "New", ROOT_FOLDER_ID));
        deliver(&mut state, &request, entries);
        assert_eq!(state.snapshot.get(state.cursor).unwrap().id, "b");
    }

    #[test]
    fn listing_error_sets_error_status() {
        let mut state = AppState::new(&settings());
        let request = only_listing(state.drain_commands());
        state.apply_coordinator_event(CoordinatorEvent::Listing(ListingResult {
            origin: ListingOrigin::Requested(request.request_id),
            folder_id: request.folder_id,
            result: Err(AppError::NetworkError("connection refused".into())),
        }));
        let status = state.status.as_ref().unwrap();
        assert_eq!(status.severity, Severity::Error);
        assert!(status.text.contains("connection refused"));
        assert!(!state.is_loading());
    }

    #[test]
    fn download_uses_sanitized_local_name() {
        let mut state = browsing_root();
        state.select_next();
        state.download_selected();

        match state.drain_commands().as_slice() {
            [Command::Transfers(requests)] => match requests.as_slice() {
                [TransferRequest::Download { entry, local_path }] => {
                    assert_eq!(entry.id, "b");
                    assert_eq!(local_path, &PathBuf::from("/downloads/Report_Q1.pdf"));
                }
                other => panic!("unexpected requests {other:?}"),
            },
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn download_dir_with_tilde_resolves_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let mut state = AppState::new(&AppSettings {
            download_dir: PathBuf::from("~/rm"),
            ..AppSettings::default()
        });
        let request = only_listing(state.drain_commands());
        deliver(&mut state, &request, root_listing());
        state.select_next();
        state.download_selected();

        match state.drain_commands().as_slice() {
            [Command::Transfers(requests)] => match requests.as_slice() {
                [TransferRequest::Download { local_path, .. }] => {
                    assert_eq!(local_path, &home.join("rm").join("Report_Q1.pdf"));
                }
                other => panic!("unexpected requests {other:?}"),
            },
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn downloading_a_folder_is_an_error() {
        let mut state = browsing_root();
        state.download_selected();
        assert!(state.drain_commands().is_empty());
        let status = state.status.as_ref().unwrap();
        assert_eq!(status.text, "Cannot download a folder");
        assert_eq!(status.severity, Severity::Error);
    }

    #[test]
    fn download_all_disambiguates_the_batch() {
        let mut state = AppState::new(&settings());
        let request = only_listing(state.drain_commands());
        deliver(
            &mut state,
            &request,
            vec![
                Entry::file("1", "a:b", ROOT_FOLDER_ID),
                Entry::folder("f", "Folder", ROOT_FOLDER_ID),
                Entry::file("2", "a/b", ROOT_FOLDER_ID),
            ],
        );
        state.download_all();

        let Some(Command::Transfers(requests)) = state.drain_commands().pop() else {
            panic!("expected transfers");
        };
        let paths: Vec<PathBuf> = requests
            .iter()
            .map(|r| match r {
                TransferRequest::Download { local_path, .. } => local_path.clone(),
                TransferRequest::Upload { .. } => panic!("unexpected upload"),
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/downloads/a_b.pdf"),
                PathBuf::from("/downloads/a_b-1.pdf")
            ]
        );

        // Single download of the second document picks the same name
        state.select_last();
        state.download_selected();
        let Some(Command::Transfers(single)) = state.drain_commands().pop() else {
            panic!("expected transfer");
        };
        assert_eq!(single[0].key().local_path, PathBuf::from("/downloads/a_b-1.pdf"));
    }

    #[test]
    fn upload_prompt_submits_trimmed_path_into_current_folder() {
        let mut state = browsing_root();
        state.enter();
        let request = only_listing(state.drain_commands());
        deliver(&mut state, &request, Vec::new());

        state.start_upload();
        if let AppMode::UploadPathEntry { input } = &mut state.mode {
            input.insert_str("  /tmp/doc.pdf ");
        }
        state.submit_upload();

        assert!(matches!(state.mode, AppMode::Browsing));
        assert_eq!(
            state.drain_commands(),
            vec![Command::Transfers(vec![TransferRequest::Upload {
                folder_id: "a".into(),
                local_path: PathBuf::from("/tmp/doc.pdf"),
            }])]
        );
    }

    #[test]
    fn empty_upload_path_stays_in_prompt() {
        let mut state = browsing_root();
        state.start_upload();
        state.submit_upload();
        assert!(matches!(state.mode, AppMode::UploadPathEntry { .. }));
        assert!(state.drain_commands().is_empty());
        assert_eq!(state.status.as_ref().unwrap().severity, Severity::Error);

        state.cancel_upload();
        assert!(matches!(state.mode, AppMode::Browsing));
    }

    #[test]
    fn duplicate_rejection_is_reported() {
        let mut state = browsing_root();
        let handle = JobHandle {
            id: JobId::new(),
            kind: JobKind::Download,
            label: "Report_Q1.pdf".into(),
        };
        state.on_submitted(vec![Ok(handle.clone())]);
        assert_eq!(state.transfers().len(), 1);
        assert_eq!(state.status.as_ref().unwrap().text, "Downloading Report_Q1.pdf");

        state.on_submitted(vec![Err(AppError::AlreadyInProgress(
            "download of Report_Q1.pdf".into(),
        ))]);
        let status = state.status.as_ref().unwrap();
        assert_eq!(status.severity, Severity::Error);
        assert!(status.text.contains("Already in progress"));
        assert_eq!(state.transfers().len(), 1);
        assert_eq!(state.transfers()[0].id, handle.id);
    }

    #[test]
    fn batch_keeps_started_jobs_when_a_submission_fails() {
        let mut state = browsing_root();
        let handle = JobHandle {
            id: JobId::new(),
            kind: JobKind::Download,
            label: "Report_Q1.pdf".into(),
        };
        state.on_submitted(vec![
            Ok(handle.clone()),
            Err(AppError::ValidationError("Shutting down".into())),
        ]);

        assert_eq!(state.transfers().len(), 1);
        assert_eq!(state.transfers()[0].id, handle.id);
        let status = state.status.as_ref().unwrap();
        assert_eq!(status.severity, Severity::Error);
        assert!(status.text.contains("Shutting down"));

        // Later progress for the kept job updates it instead of adding another
        state.apply_coordinator_event(job_event(
            handle.id,
            JobKind::Download,
            TransferState::InProgress {
                transferred_bytes: 1,
                total_bytes: Some(2),
            },
        ));
        assert_eq!(state.transfers().len(), 1);
    }

    #[test]
    fn job_events_drive_transfer_indicator_and_status() {
        let mut state = browsing_root();
        let id = JobId::new();
        state.apply_coordinator_event(job_event(id, JobKind::Download, TransferState::Pending));
        state.apply_coordinator_event(job_event(
            id,
            JobKind::Download,
            TransferState::InProgress {
                transferred_bytes: 10,
                total_bytes: Some(40),
            },
        ));
        assert_eq!(state.transfers().len(), 1);
        assert_eq!(state.transfers()[0].ratio(), Some(0.25));

        state.apply_coordinator_event(job_event(id, JobKind::Download, TransferState::Done));
        assert!(state.transfers().is_empty());
        assert_eq!(state.status.as_ref().unwrap().text, "Downloaded Report_Q1.pdf");
    }

    #[test]
    fn not_found_failure_relists_current_folder() {
        let mut state = browsing_root();
        let id = JobId::new();
        state.apply_coordinator_event(job_event(
            id,
            JobKind::Download,
            TransferState::Failed(TransferFailure {
                reason: "Not found: b".into(),
                not_found: true,
            }),
        ));
        let status = state.status.as_ref().unwrap();
        assert_eq!(status.severity, Severity::Error);
        assert!(status.text.starts_with("Download of Report_Q1.pdf failed"));
        assert_eq!(only_listing(state.drain_commands()).folder_id, ROOT_FOLDER_ID);
    }

    #[test]
    fn post_upload_listing_replaces_current_folder() {
        let mut state = browsing_root();
        let id = JobId::new();
        let mut entries = root_listing();
        entries.push(Entry::file("n", "doc.pdf", ROOT_FOLDER_ID));
        state.apply_coordinator_event(CoordinatorEvent::Listing(ListingResult {
            origin: ListingOrigin::AfterUpload(id),
            folder_id: ROOT_FOLDER_ID.into(),
            result: Ok(DirectorySnapshot::new(ROOT_FOLDER_ID, entries)),
        }));
        assert_eq!(state.snapshot.len(), 3);

        // Another folder's post-upload listing is ignored
        state.apply_coordinator_event(CoordinatorEvent::Listing(ListingResult {
            origin: ListingOrigin::AfterUpload(id),
            folder_id: "elsewhere".into(),
            result: Ok(DirectorySnapshot::new("elsewhere", Vec::new())),
        }));
        assert_eq!(state.snapshot.len(), 3);
    }

    #[test]
    fn failed_post_upload_listing_is_reported_on_done() {
        let mut state = browsing_root();
        let id = JobId::new();
        state.apply_coordinator_event(CoordinatorEvent::Listing(ListingResult {
            origin: ListingOrigin::AfterUpload(id),
            folder_id: ROOT_FOLDER_ID.into(),
            result: Err(AppError::NetworkError("timed out".into())),
        }));
        state.apply_coordinator_event(job_event(id, JobKind::Upload, TransferState::Done));
        let status = state.status.as_ref().unwrap();
        assert_eq!(status.severity, Severity::Error);
        assert!(status.text.starts_with("Uploaded Report_Q1.pdf, but refreshing"));
    }

    #[test]
    fn status_expires_after_ttl() {
        let mut state = browsing_root();
        state.set_info("hello");
        let created = state.status.as_ref().unwrap().created_at;
        assert!(!state.on_tick(created + Duration::from_secs(1)));
        assert!(state.on_tick(created + Duration::from_secs(5)));
        assert!(state.status.is_none());
    }

    #[test]
    fn navigation_matches_model_under_random_steps() {
        let mut rng = StdRng::seed_from_u64(0x6e6176);

        for _ in 0..50 {
            let mut state = AppState::new(&settings());
            let mut model: Vec<String> = Vec::new();
            let mut requests: Vec<ListingRequest> = Vec::new();
            let mut delivered: Vec<u64> = Vec::new();

            for _ in 0..80 {
                for command in state.drain_commands() {
                    if let Command::List(request) = command {
                        requests.push(request);
                    }
                }

                match rng.gen_range(0..6) {
                    // Answer the newest listing request
                    0 | 1 => {
                        let Some(latest) = requests.last().cloned() else {
                            continue;
                        };
                        if delivered.contains(&latest.request_id) {
                            continue;
                        }
                        delivered.push(latest.request_id);
                        let count = rng.gen_range(0..5);
                        let entries = (0..count)
                            .map(|i| {
                                let id = format!("{}.{i}", latest.folder_id);
                                if rng.gen_bool(0.6) {
                                    Entry::folder(id.clone(), id, &latest.folder_id)
                                } else {
                                    Entry::file(id.clone(), id, &latest.folder_id)
                                }
                            })
                            .collect();
                        deliver(&mut state, &latest, entries);
                        assert!(!state.is_loading());
                        assert_eq!(state.snapshot.folder_id, latest.folder_id);
                    }
                    2 => {
                        if rng.gen_bool(0.5) {
                            state.select_next();
                        } else {
                            state.select_previous();
                        }
                        let selected = state.snapshot.get(state.cursor);
                        if let Some(entry) = selected.filter(|e| e.is_folder()) {
                            model.push(entry.id.clone());
                        }
                        state.enter();
                    }
                    3 => {
                        model.pop();
                        state.back();
                    }
                    // Answer an older request late; it must change nothing
                    4 => {
                        if requests.len() < 2 {
                            continue;
                        }
                        let stale = requests[rng.gen_range(0..requests.len() - 1)].clone();
                        let before = (
                            state.snapshot.folder_id.clone(),
                            state.snapshot.len(),
                            state.cursor,
                            state.is_loading(),
                        );
                        deliver(
                            &mut state,
                            &stale,
                            vec![Entry::folder("late", "Late", &stale.folder_id)],
                        );
                        let after = (
                            state.snapshot.folder_id.clone(),
                            state.snapshot.len(),
                            state.cursor,
                            state.is_loading(),
                        );
                        assert_eq!(before, after);
                    }
                    _ => state.refresh(),
                }

                let ids: Vec<&str> = state.nav().iter().map(|c| c.id.as_str()).collect();
                assert_eq!(ids, model);
                assert_eq!(
                    state.current_folder_id(),
                    model.last().map_or(ROOT_FOLDER_ID, String::as_str)
                );
            }
        }
    }

    /// TestBackend that also swallows the escape sequences `App` writes on drop
    struct SinkBackend(TestBackend);

    impl Write for SinkBackend {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Backend for SinkBackend {
        fn draw<'a, I>(&mut self, content: I) -> std::io::Result<()>
        where
            I: Iterator<Item = (u16, u16, &'a Cell)>,
        {
            Backend::draw(&mut self.0, content)
        }

        fn hide_cursor(&mut self) -> std::io::Result<()> {
            Backend::hide_cursor(&mut self.0)
        }

        fn show_cursor(&mut self) -> std::io::Result<()> {
            Backend::show_cursor(&mut self.0)
        }

        fn get_cursor_position(&mut self) -> std::io::Result<Position> {
            Backend::get_cursor_position(&mut self.0)
        }

        fn set_cursor_position<P: Into<Position>>(&mut self, position: P) -> std::io::Result<()> {
            Backend::set_cursor_position(&mut self.0, position)
        }

        fn clear(&mut self) -> std::io::Result<()> {
            Backend::clear(&mut self.0)
        }

        fn size(&self) -> std::io::Result<Size> {
            Backend::size(&self.0)
        }

        fn window_size(&mut self) -> std::io::Result<WindowSize> {
            Backend::window_size(&mut self.0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Backend::flush(&mut self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum DeviceCall {
        List(String),
        Refresh(String),
        Download(String),
        Upload(String, PathBuf),
    }

    /// Records device calls; downloads stall after the first chunk
    #[derive(Clone, Default)]
    struct ScriptedDevice {
        calls: Arc<Mutex<Vec<DeviceCall>>>,
    }

    impl ScriptedDevice {
        fn calls(&self) -> Vec<DeviceCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: DeviceCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl RemoteFs for ScriptedDevice {
        async fn list(&self, folder_id: &str) -> Result<DirectorySnapshot> {
            self.record(DeviceCall::List(folder_id.to_string()));
            Ok(DirectorySnapshot::new(
                folder_id,
                vec![Entry::file("doc", "doc.pdf", folder_id)],
            ))
        }

        async fn refresh(&self, folder_id: &str) -> Result<DirectorySnapshot> {
            self.record(DeviceCall::Refresh(folder_id.to_string()));
            Ok(DirectorySnapshot::new(folder_id, Vec::new()))
        }

        async fn download(&self, entry_id: &str) -> Result<Download> {
            self.record(DeviceCall::Download(entry_id.to_string()));
            Ok(Download {
                total_bytes: Some(8),
                stream: futures::stream::iter(vec![Ok(Bytes::from_static(b"%PDF-"))])
                    .chain(futures::stream::pending())
                    .boxed(),
            })
        }

        async fn upload(&self, folder_id: &str, local_path: &Path) -> Result<Entry> {
            self.record(DeviceCall::Upload(
                folder_id.to_string(),
                local_path.to_path_buf(),
            ));
            Ok(Entry::file("new", "doc.pdf", folder_id))
        }
    }

    fn runner(
        device: ScriptedDevice,
        settings: &AppSettings,
    ) -> App<SinkBackend, ScriptedDevice> {
        let terminal = Terminal::new(SinkBackend(TestBackend::new(100, 20))).unwrap();
        let (coordinator, coordinator_rx) = Coordinator::new(device, settings);
        App::new(terminal, coordinator, coordinator_rx, settings)
    }

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Input(Event::Key(KeyEvent::new(code, KeyModifiers::NONE)))
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn upload_keys_refresh_the_folder_before_uploading() {
        let device = ScriptedDevice::default();
        let mut app = runner(device.clone(), &settings());
        let (tx, mut rx) = mpsc::channel(64);

        let driver = async {
            wait_until(|| device.calls() == vec![DeviceCall::List(String::new())]).await;
            tx.send(key(KeyCode::Char('u'))).await.unwrap();
            for ch in "/tmp/doc.pdf".chars() {
                tx.send(key(KeyCode::Char(ch))).await.unwrap();
            }
            tx.send(key(KeyCode::Enter)).await.unwrap();
            // Post-upload listing is the last device call of the job
            wait_until(|| device.calls().len() == 4).await;
            tx.send(key(KeyCode::Char('q'))).await.unwrap();
        };
        let (result, ()) = tokio::join!(app.run(&mut rx), driver);
        result.unwrap();

        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::List(String::new()),
                DeviceCall::Refresh(String::new()),
                DeviceCall::Upload(String::new(), PathBuf::from("/tmp/doc.pdf")),
                DeviceCall::List(String::new()),
            ]
        );
        assert!(app.state.status.is_none());
    }

    #[tokio::test]
    async fn quitting_mid_download_clears_status_and_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings {
            download_dir: dir.path().to_path_buf(),
            ..AppSettings::default()
        };
        let device = ScriptedDevice::default();
        let mut app = runner(device.clone(), &settings);
        let (tx, mut rx) = mpsc::channel(64);
        let partial = dir.path().join("doc.pdf");

        let driver = async {
            // A press before the root listing is shown does nothing, so repeat it
            let started = DeviceCall::Download("doc".into());
            tokio::time::timeout(Duration::from_secs(5), async {
                while !device.calls().contains(&started) {
                    tx.send(key(KeyCode::Char('d'))).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await
            .expect("download never started");
            wait_until(|| std::fs::read(&partial).is_ok_and(|b| b == b"%PDF-")).await;
            tx.send(key(KeyCode::Char('q'))).await.unwrap();
        };
        let (result, ()) = tokio::join!(app.run(&mut rx), driver);
        result.unwrap();

        assert!(app.state.status.is_none());
        assert_eq!(std::fs::read(&partial).unwrap(), b"%PDF-");
    }
}
