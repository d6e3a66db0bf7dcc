pub mod config;
pub mod coordinator;
pub mod error;
pub mod key_event;
pub mod remote;
pub mod sanitize;
pub mod ui;

mod app;
mod events;
mod transfer;
mod utils;

// Re-export commonly used types
pub use app::{App, AppMode, AppState, Command, Severity, StatusMessage};
pub use coordinator::{Coordinator, TransferPolicy};
pub use error::{AppError, Result};
pub use events::{AppEvent, spawn_input_task};
pub use remote::{DeviceClient, DirectorySnapshot, Entry, EntryKind, RemoteFs};
pub use transfer::{
    CoordinatorEvent, JobEvent, JobHandle, JobId, JobKind, ListingOrigin, ListingRequest,
    ListingResult, TransferFailure, TransferJob, TransferKey, TransferRequest, TransferState,
};
pub use utils::{expand_tilde, init_panic_hook, init_tracing, restore_tui};
