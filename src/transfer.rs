use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::remote::{DirectorySnapshot, Entry};

/// Opaque token identifying one transfer job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    Download,
    Upload,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Download => f.write_str("download"),
            JobKind::Upload => f.write_str("upload"),
        }
    }
}

/// What the user asked the coordinator to move
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferRequest {
    /// Fetch `entry` into `local_path`
    Download { entry: Entry, local_path: PathBuf },
    /// Push the file at `local_path` into `folder_id`
    Upload {
        folder_id: String,
        local_path: PathBuf,
    },
}

impl TransferRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            TransferRequest::Download { .. } => JobKind::Download,
            TransferRequest::Upload { .. } => JobKind::Upload,
        }
    }

    /// At most one job per key may be outstanding
    pub fn key(&self) -> TransferKey {
        match self {
            TransferRequest::Download { entry, local_path } => TransferKey {
                folder_id: entry.parent_id.clone(),
                local_path: local_path.clone(),
            },
            TransferRequest::Upload {
                folder_id,
                local_path,
            } => TransferKey {
                folder_id: folder_id.clone(),
                local_path: local_path.clone(),
            },
        }
    }

    /// Short human readable name for status lines
    pub fn label(&self) -> String {
        match self {
            TransferRequest::Download { local_path, .. }
            | TransferRequest::Upload { local_path, .. } => local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| local_path.display().to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub folder_id: String,
    pub local_path: PathBuf,
}

/// Why a job ended without success
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferFailure {
    pub reason: String,
    /// The remote entry vanished; the listing is stale
    pub not_found: bool,
}

impl From<&AppError> for TransferFailure {
    fn from(err: &AppError) -> Self {
        Self {
            reason: err.to_string(),
            not_found: err.is_not_found(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    InProgress {
        transferred_bytes: u64,
        total_bytes: Option<u64>,
    },
    Done,
    Failed(TransferFailure),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed(_))
    }
}

/// Handle returned by a successful submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub kind: JobKind,
    pub label: String,
}

/// One step in a job's lifecycle, in causal order per job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobKind,
    pub label: String,
    pub state: TransferState,
}

/// Who asked for a listing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingOrigin {
    Requested(u64),
    AfterUpload(JobId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingRequest {
    pub request_id: u64,
    pub folder_id: String,
}

#[derive(Debug)]
pub struct ListingResult {
    pub origin: ListingOrigin,
    pub folder_id: String,
    pub result: Result<DirectorySnapshot>,
}

/// Everything background work reports back to the main loop
#[derive(Debug)]
pub enum CoordinatorEvent {
    Job(JobEvent),
    Listing(ListingResult),
}

/// UI-side view of a job that has not reached a terminal state yet
#[derive(Clone, Debug)]
pub struct TransferJob {
    pub id: JobId,
    pub kind: JobKind,
    pub label: String,
    pub state: TransferState,
    pub started_at: Instant,
}

impl TransferJob {
    pub fn new(handle: &JobHandle) -> Self {
        Self {
            id: handle.id,
            kind: handle.kind,
            label: handle.label.clone(),
            state: TransferState::Pending,
            started_at: Instant::now(),
        }
    }

    pub fn from_event(event: &JobEvent) -> Self {
        Self {
            id: event.job_id,
            kind: event.kind,
            label: event.label.clone(),
            state: event.state.clone(),
            started_at: Instant::now(),
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        match self.state {
            TransferState::InProgress {
                transferred_bytes,
                total_bytes: Some(total),
            } if total > 0 => Some((transferred_bytes as f64 / total as f64).clamp(0.0, 1.0)),
            _ => None,
        }
    }

    pub fn transferred_bytes(&self) -> u64 {
        match self.state {
            TransferState::InProgress {
                transferred_bytes, ..
            } => transferred_bytes,
            _ => 0,
        }
    }
}
