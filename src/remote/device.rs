//! HTTP client for the tablet's USB web interface.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Client, multipart};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{DirectorySnapshot, Download, Entry, EntryKind, ROOT_FOLDER_ID, RemoteFs};
use crate::config::manager::AppSettings;
use crate::error::{AppError, Result};

const FOLDER_TYPE: &str = "CollectionType";

/// Item record as serialized by the device
#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(rename = "ID")]
    id: String,
    // The device really spells it this way
    #[serde(rename = "VissibleName")]
    visible_name: String,
    #[serde(rename = "Type")]
    item_type: String,
    #[serde(rename = "Parent", default)]
    parent: Option<String>,
    #[serde(rename = "ModifiedClient", default)]
    modified: Option<String>,
}

impl RawItem {
    fn into_entry(self, folder_id: &str) -> Entry {
        let kind = if self.item_type == FOLDER_TYPE {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        let parent_id = match self.parent {
            Some(parent) if !parent.is_empty() => parent,
            _ => folder_id.to_string(),
        };
        let modified = self
            .modified
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Entry {
            id: self.id,
            name: self.visible_name,
            kind,
            parent_id,
            modified,
        }
    }
}

/// Parse the JSON body of a folder listing
pub fn parse_listing(folder_id: &str, body: &[u8]) -> Result<Vec<Entry>> {
    let items: Vec<RawItem> = serde_json::from_slice(body).map_err(|e| {
        AppError::ProtocolError(format!("Malformed listing for folder '{folder_id}': {e}"))
    })?;
    Ok(items
        .into_iter()
        .map(|item| item.into_entry(folder_id))
        .collect())
}

/// Build the entry for a finished upload.
///
/// The device does not reliably describe what it stored, so when the
/// response is not an item record a provisional entry keyed by the file
/// name is returned. The next listing carries the authoritative id.
fn uploaded_entry(folder_id: &str, file_name: &str, body: &[u8]) -> Entry {
    match serde_json::from_slice::<RawItem>(body) {
        Ok(item) => item.into_entry(folder_id),
        Err(_) => Entry::file(file_name, file_name, folder_id),
    }
}

#[derive(Clone, Debug)]
pub struct DeviceClient {
    client: Client,
    base_url: String,
    download_format: String,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl DeviceClient {
    pub fn new(settings: &AppSettings) -> Result<Self> {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        // No total timeout on the client: downloads may legitimately take long
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.device_url.trim_end_matches('/').to_string(),
            download_format: settings.download_format.clone(),
            request_timeout,
            upload_timeout: settings.upload_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn listing_url(&self, folder_id: &str) -> String {
        if folder_id == ROOT_FOLDER_ID {
            format!("{}/documents/", self.base_url)
        } else {
            format!("{}/documents/{}", self.base_url, folder_id)
        }
    }

    fn download_url(&self, entry_id: &str) -> String {
        format!(
            "{}/download/{}/{}",
            self.base_url, entry_id, self.download_format
        )
    }

    fn upload_url(&self) -> String {
        format!("{}/upload", self.base_url)
    }
}

impl RemoteFs for DeviceClient {
    async fn list(&self, folder_id: &str) -> Result<DirectorySnapshot> {
        let url = self.listing_url(folder_id);
        debug!("GET {}", url);

        let context = format!("listing folder '{folder_id}'");
        let body = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AppError::from_request(&context, e))?
            .bytes()
            .await
            .map_err(|e| AppError::from_request(&context, e))?;

        let entries = parse_listing(folder_id, &body)?;
        debug!("Listed {} entries in folder '{}'", entries.len(), folder_id);
        Ok(DirectorySnapshot::new(folder_id, entries))
    }

    async fn download(&self, entry_id: &str) -> Result<Download> {
        let url = self.download_url(entry_id);
        debug!("GET {}", url);

        let context = format!("downloading '{entry_id}'");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AppError::from_request(&context, e))?;

        let total_bytes = resp.content_length();
        let stream = resp
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| AppError::from_request(&context, e)))
            .boxed();

        Ok(Download {
            total_bytes,
            stream,
        })
    }

    async fn upload(&self, folder_id: &str, local_path: &Path) -> Result<Entry> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AppError::ValidationError(format!(
                    "'{}' does not name a file",
                    local_path.display()
                ))
            })?;

        let contents = tokio::fs::read(local_path).await.map_err(|e| {
            error!("Failed to read '{}': {}", local_path.display(), e);
            AppError::LocalIoError(format!("{}: {e}", local_path.display()))
        })?;

        let mime = mime_guess::from_path(local_path).first_or_octet_stream();
        let part = multipart::Part::bytes(contents)
            .file_name(file_name.clone())
            .mime_str(mime.as_ref())
            .map_err(|e| AppError::ProtocolError(format!("Invalid MIME type '{mime}': {e}")))?;
        let form = multipart::Form::new().part("file", part);

        // The device files the upload under whichever folder it listed last
        info!("Uploading '{}' into folder '{}'", file_name, folder_id);
        let context = format!("uploading '{file_name}'");
        let resp = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AppError::from_request(&context, e))?;

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Could not read upload response for '{}': {}", file_name, e);
                bytes::Bytes::new()
            }
        };
        Ok(uploaded_entry(folder_id, &file_name, &body))
    }
}
