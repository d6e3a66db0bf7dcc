//! Remote document tree exposed by the tablet.
//!
//! [`RemoteFs`] is the seam between the transfer coordinator and the
//! device. [`DeviceClient`] talks to the real HTTP interface; tests drive
//! the coordinator through their own implementations.

use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::Result;

pub mod device;

pub use device::DeviceClient;

/// Folder id the device uses for the top of the document tree
pub const ROOT_FOLDER_ID: &str = "";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// A single file or folder record from a directory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    /// Raw remote name, never sanitized in place
    pub name: String,
    pub kind: EntryKind,
    pub parent_id: String,
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn file(id: impl Into<String>, name: impl Into<String>, parent_id: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: EntryKind::File,
            parent_id: parent_id.to_string(),
            modified: None,
        }
    }

    pub fn folder(id: impl Into<String>, name: impl Into<String>, parent_id: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: EntryKind::Folder,
            parent_id: parent_id.to_string(),
            modified: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// One step of the breadcrumb path from root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Crumb {
    pub id: String,
    pub name: String,
}

impl Crumb {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Complete listing of one folder at one point in time.
///
/// Snapshots are replaced wholesale on every refresh and never patched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub folder_id: String,
    pub path: Vec<Crumb>,
    pub entries: Vec<Entry>,
}

impl DirectorySnapshot {
    pub fn new(folder_id: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            folder_id: folder_id.into(),
            path: Vec::new(),
            entries,
        }
    }

    pub fn with_path(mut self, path: Vec<Crumb>) -> Self {
        self.path = path;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_folder())
    }
}

/// Lazy, finite, non-restartable byte sequence of a downloaded document
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

pub struct Download {
    pub total_bytes: Option<u64>,
    pub stream: ByteStream,
}

/// Operations the device offers on its document tree.
///
/// `upload` only lands in the right folder when a listing of that folder
/// was issued immediately before it. Callers must uphold that ordering;
/// [`crate::coordinator::Coordinator`] does so for every upload job.
pub trait RemoteFs: Send + Sync + 'static {
    fn list(&self, folder_id: &str) -> impl Future<Output = Result<DirectorySnapshot>> + Send;

    fn download(&self, entry_id: &str) -> impl Future<Output = Result<Download>> + Send;

    fn upload(
        &self,
        folder_id: &str,
        local_path: &Path,
    ) -> impl Future<Output = Result<Entry>> + Send;

    /// Same request as [`RemoteFs::list`], issued to satisfy the upload precondition
    fn refresh(&self, folder_id: &str) -> impl Future<Output = Result<DirectorySnapshot>> + Send {
        self.list(folder_id)
    }
}
