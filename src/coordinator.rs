//! Background execution of device operations.
//!
//! The coordinator owns every in-flight listing and transfer. Each job
//! runs in its own task and reports through a bounded channel, so the
//! events of one job arrive in causal order (`Pending`, progress, terminal
//! state) while different jobs interleave freely. UI state is never
//! touched from here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::manager::AppSettings;
use crate::error::{AppError, Result};
use crate::remote::{Entry, RemoteFs};
use crate::transfer::{
    CoordinatorEvent, JobEvent, JobHandle, JobId, JobKind, ListingOrigin, ListingRequest,
    ListingResult, TransferFailure, TransferKey, TransferRequest, TransferState,
};

/// Capacity of the event channel; senders wait when the UI falls behind
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

const REFRESH_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Retry and timeout rules applied to every transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Listing attempts before an upload gives up
    pub refresh_attempts: u32,
    /// Upper bound on a single upload request
    pub upload_timeout: Duration,
    /// Longest wait for the download response or its next chunk
    pub download_idle_timeout: Duration,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for TransferPolicy {
    fn from(settings: &AppSettings) -> Self {
        Self {
            refresh_attempts: settings.pre_upload_refresh_attempts.max(1),
            upload_timeout: settings.upload_timeout(),
            download_idle_timeout: settings.download_idle_timeout(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<TransferKey, JobId>>>;

/// Releases a transfer key when the owning task finishes or is dropped
struct InFlightGuard {
    registry: Registry,
    key: TransferKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&self.key);
    }
}

/// Sends the lifecycle events of a single job
#[derive(Clone)]
struct JobReporter {
    job_id: JobId,
    kind: JobKind,
    label: String,
    events: mpsc::Sender<CoordinatorEvent>,
}

impl JobReporter {
    async fn report(&self, state: TransferState) {
        let event = CoordinatorEvent::Job(JobEvent {
            job_id: self.job_id,
            kind: self.kind,
            label: self.label.clone(),
            state,
        });
        if self.events.send(event).await.is_err() {
            debug!("Event receiver gone, dropping update for job {}", self.job_id);
        }
    }
}

pub struct Coordinator<C: RemoteFs> {
    client: Arc<C>,
    events: mpsc::Sender<CoordinatorEvent>,
    in_flight: Registry,
    // Held across refresh + upload so no other listing reaches the device in between
    device_order: Arc<tokio::sync::Mutex<()>>,
    cancel_token: CancellationToken,
    tracker: TaskTracker,
    policy: TransferPolicy,
}

impl<C: RemoteFs> Coordinator<C> {
    pub fn new(client: C, settings: &AppSettings) -> (Self, mpsc::Receiver<CoordinatorEvent>) {
        Self::with_policy(client, TransferPolicy::from(settings))
    }

    pub fn with_policy(
        client: C,
        policy: TransferPolicy,
    ) -> (Self, mpsc::Receiver<CoordinatorEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let coordinator = Self {
            client: Arc::new(client),
            events,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            device_order: Arc::new(tokio::sync::Mutex::new(())),
            cancel_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            policy: TransferPolicy {
                refresh_attempts: policy.refresh_attempts.max(1),
                ..policy
            },
        };
        (coordinator, receiver)
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Number of transfers that have not reached a terminal state
    pub fn outstanding(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, key: &TransferKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// Queue a transfer and return immediately.
    ///
    /// A second submission for a target that is still in flight is
    /// rejected with [`AppError::AlreadyInProgress`]; no job is created.
    pub fn submit(&self, request: TransferRequest) -> Result<JobHandle> {
        if self.cancel_token.is_cancelled() {
            return Err(AppError::ValidationError(
                "Coordinator is shutting down".to_string(),
            ));
        }

        let key = request.key();
        let handle = JobHandle {
            id: JobId::new(),
            kind: request.kind(),
            label: request.label(),
        };

        {
            let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = map.get(&key) {
                warn!(
                    "Rejecting duplicate {} of '{}', job {} still running",
                    handle.kind,
                    key.local_path.display(),
                    existing
                );
                return Err(AppError::AlreadyInProgress(format!(
                    "{} of {}",
                    handle.kind, handle.label
                )));
            }
            map.insert(key.clone(), handle.id);
        }

        let guard = InFlightGuard {
            registry: self.in_flight.clone(),
            key,
        };
        let reporter = JobReporter {
            job_id: handle.id,
            kind: handle.kind,
            label: handle.label.clone(),
            events: self.events.clone(),
        };
        let client = self.client.clone();
        let token = self.cancel_token.clone();
        let policy = self.policy;

        info!("Submitting {} job {} for '{}'", handle.kind, handle.id, handle.label);

        match request {
            TransferRequest::Download { entry, local_path } => {
                self.tracker.spawn(async move {
                    reporter.report(TransferState::Pending).await;
                    let outcome = tokio::select! {
                        _ = token.cancelled() => None,
                        result = download_to_file(
                            client.as_ref(),
                            &entry,
                            &local_path,
                            policy.download_idle_timeout,
                            &reporter,
                        ) => Some(result),
                    };
                    finish(guard, &reporter, outcome).await;
                });
            }
            TransferRequest::Upload {
                folder_id,
                local_path,
            } => {
                let events = self.events.clone();
                let device_order = self.device_order.clone();
                self.tracker.spawn(async move {
                    reporter.report(TransferState::Pending).await;
                    let upload = UploadJob {
                        client: client.as_ref(),
                        folder_id: &folder_id,
                        local_path: &local_path,
                        policy,
                        device_order: &device_order,
                        events: &events,
                        reporter: &reporter,
                    };
                    let outcome = tokio::select! {
                        _ = token.cancelled() => None,
                        result = upload.run() => Some(result),
                    };
                    finish(guard, &reporter, outcome).await;
                });
            }
        }

        Ok(handle)
    }

    /// Fetch a folder listing in the background
    pub fn request_listing(&self, request: ListingRequest) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        let client = self.client.clone();
        let events = self.events.clone();
        let device_order = self.device_order.clone();
        let token = self.cancel_token.clone();

        debug!(
            "Listing request {} for folder '{}'",
            request.request_id, request.folder_id
        );

        self.tracker.spawn(async move {
            let listing = async {
                let _order = device_order.lock().await;
                client.list(&request.folder_id).await
            };
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = listing => result,
            };
            if let Err(e) = &result {
                warn!("Listing folder '{}' failed: {}", request.folder_id, e);
            }
            let event = CoordinatorEvent::Listing(ListingResult {
                origin: ListingOrigin::Requested(request.request_id),
                folder_id: request.folder_id,
                result,
            });
            let _ = events.send(event).await;
        });
    }

    /// Abandon outstanding work.
    ///
    /// Running tasks stop at their next await point; an in-flight HTTP call
    /// is dropped rather than completed. Partially written downloads stay on
    /// disk. Returns `true` if every task wound down within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Shutting down coordinator, {} transfer(s) outstanding", self.outstanding());
        self.cancel_token.cancel();
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

/// Release the target, then publish the terminal state
async fn finish(guard: InFlightGuard, reporter: &JobReporter, outcome: Option<Result<()>>) {
    // Released first so a resubmission triggered by the terminal event is accepted
    drop(guard);
    match outcome {
        None => info!("Job {} abandoned by shutdown", reporter.job_id),
        Some(Ok(())) => {
            info!("Job {} finished", reporter.job_id);
            reporter.report(TransferState::Done).await;
        }
        Some(Err(e)) => {
            error!("Job {} failed: {}", reporter.job_id, e);
            reporter
                .report(TransferState::Failed(TransferFailure::from(&e)))
                .await;
        }
    }
}

async fn download_to_file<C: RemoteFs>(
    client: &C,
    entry: &Entry,
    local_path: &Path,
    idle_timeout: Duration,
    reporter: &JobReporter,
) -> Result<()> {
    let stalled = || {
        AppError::NetworkError(format!(
            "download of '{}' stalled for {idle_timeout:?}",
            entry.name
        ))
    };

    let mut download = tokio::time::timeout(idle_timeout, client.download(&entry.id))
        .await
        .map_err(|_| stalled())??;
    let total_bytes = download.total_bytes;
    reporter
        .report(TransferState::InProgress {
            transferred_bytes: 0,
            total_bytes,
        })
        .await;

    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| local_io(parent, e))?;
    }
    let mut file = tokio::fs::File::create(local_path)
        .await
        .map_err(|e| local_io(local_path, e))?;

    let mut transferred_bytes = 0u64;
    loop {
        let next = tokio::time::timeout(idle_timeout, download.stream.next())
            .await
            .map_err(|_| stalled())?;
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| local_io(local_path, e))?;
        // Flushed per chunk so an abandoned download keeps what was reported
        file.flush().await.map_err(|e| local_io(local_path, e))?;
        transferred_bytes += chunk.len() as u64;
        reporter
            .report(TransferState::InProgress {
                transferred_bytes,
                total_bytes,
            })
            .await;
    }

    debug!(
        "Wrote {} bytes of '{}' to {}",
        transferred_bytes,
        entry.name,
        local_path.display()
    );
    Ok(())
}

struct UploadJob<'a, C: RemoteFs> {
    client: &'a C,
    folder_id: &'a str,
    local_path: &'a PathBuf,
    policy: TransferPolicy,
    device_order: &'a tokio::sync::Mutex<()>,
    events: &'a mpsc::Sender<CoordinatorEvent>,
    reporter: &'a JobReporter,
}

impl<C: RemoteFs> UploadJob<'_, C> {
    async fn run(self) -> Result<()> {
        let total_bytes = tokio::fs::metadata(self.local_path)
            .await
            .ok()
            .map(|m| m.len());
        self.reporter
            .report(TransferState::InProgress {
                transferred_bytes: 0,
                total_bytes,
            })
            .await;

        let entry = {
            let _order = self.device_order.lock().await;
            self.refresh_with_policy().await?;
            let timeout = self.policy.upload_timeout;
            tokio::time::timeout(timeout, self.client.upload(self.folder_id, self.local_path))
                .await
                .map_err(|_| {
                    AppError::NetworkError(format!(
                        "upload of '{}' timed out after {timeout:?}",
                        self.local_path.display()
                    ))
                })??
        };
        info!(
            "Uploaded '{}' into folder '{}' as '{}'",
            self.local_path.display(),
            self.folder_id,
            entry.name
        );

        // Re-list so the UI shows the new document; failure here does not undo the upload
        let listing = {
            let _order = self.device_order.lock().await;
            self.client.list(self.folder_id).await
        };
        if let Err(e) = &listing {
            warn!("Post-upload listing of '{}' failed: {}", self.folder_id, e);
        }
        let event = CoordinatorEvent::Listing(ListingResult {
            origin: ListingOrigin::AfterUpload(self.reporter.job_id),
            folder_id: self.folder_id.to_string(),
            result: listing,
        });
        let _ = self.events.send(event).await;

        Ok(())
    }

    async fn refresh_with_policy(&self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.client.refresh(self.folder_id).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.policy.refresh_attempts => {
                    warn!(
                        "Pre-upload refresh of '{}' failed (attempt {}/{}): {}",
                        self.folder_id, attempt, self.policy.refresh_attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn local_io(path: &Path, err: std::io::Error) -> AppError {
    AppError::LocalIoError(format!("{}: {err}", path.display()))
}
