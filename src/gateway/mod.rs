//! Authenticated facade over the Google Drive API v3.
//!
//! Every call reads the credential currently installed in the
//! [`SessionContext`]; with none installed it fails with
//! [`Error::Unauthenticated`] before any network traffic. Provider failures
//! are returned as-is, never retried.

pub mod download;
pub mod types;

pub use download::{DownloadStream, ResourceHandle};
pub use types::{FileField, FileList, FileMetadata};

use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::session::SessionContext;
use types::{file_selector, list_selector, ApiErrorEnvelope, FilesListResponse};

/// Google Drive API base URL
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Maximum results per page (Google Drive API limit)
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Chunks buffered between the provider read and the consumer
const DOWNLOAD_BUFFER_CHUNKS: usize = 8;

pub struct DriveGateway {
    client: reqwest::Client,
    base_url: String,
    session: SessionContext,
}

impl DriveGateway {
    pub fn new(session: SessionContext) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("drive-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: DRIVE_API_BASE.to_string(),
            session,
        }
    }

    /// Point the gateway at another API root (used for test stubs)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.base_url, urlencoding::encode(file_id))
    }

    /// Issue an authenticated GET and map non-success statuses.
    /// `file_id` turns a 404 into [`Error::NotFound`].
    async fn get(
        &self,
        operation: &'static str,
        url: String,
        query: &[(&str, String)],
        file_id: Option<&str>,
    ) -> Result<reqwest::Response> {
        let credential = self.session.require()?;

        let start = Instant::now();
        let sent = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, credential.authorization_header())
            .query(query)
            .send()
            .await;
        METRICS
            .provider_duration_seconds
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                METRICS
                    .provider_requests_total
                    .with_label_values(&[operation, "network_error"])
                    .inc();
                warn!(operation, "Drive API request failed: {}", e);
                return Err(Error::provider(None, e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            METRICS
                .provider_requests_total
                .with_label_values(&[operation, "success"])
                .inc();
            return Ok(response);
        }

        METRICS
            .provider_requests_total
            .with_label_values(&[operation, status.as_str()])
            .inc();

        if status == StatusCode::NOT_FOUND {
            if let Some(file_id) = file_id {
                debug!(operation, file_id, "file not found");
                return Err(Error::NotFound {
                    file_id: file_id.to_string(),
                });
            }
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body
                }
            });

        warn!(operation, status = status.as_u16(), "Drive API error: {}", message);
        Err(Error::provider(Some(status.as_u16()), message))
    }

    /// List up to `page_size` files in provider order. `page_token` continues a
    /// previous listing.
    #[instrument(skip(self, fields))]
    pub async fn list_files(
        &self,
        page_size: u32,
        fields: &[FileField],
        page_token: Option<&str>,
    ) -> Result<FileList> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let mut query = vec![
            ("pageSize", page_size.to_string()),
            ("fields", list_selector(fields)),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let url = format!("{}/files", self.base_url);
        let response = self.get("list", url, &query, None).await?;

        let mut page: FilesListResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(None, format!("invalid files.list response: {}", e)))?;
        page.files.truncate(page_size as usize);

        info!("Listed {} files from Google Drive", page.files.len());

        Ok(FileList {
            files: page.files,
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    /// Metadata for one file (name and type are needed before a download
    /// starts so response headers can be set)
    #[instrument(skip(self))]
    pub async fn get_file_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        let query = [("fields", file_selector(&FileField::ALL))];
        let response = self
            .get("metadata", self.file_url(file_id), &query, Some(file_id))
            .await?;

        response
            .json()
            .await
            .map_err(|e| Error::provider(None, format!("invalid file resource: {}", e)))
    }

    /// Open the file content as a lazily produced, back-pressured stream.
    /// Resolves only once the provider has accepted the request, so
    /// `NotFound` is reported before any byte is produced.
    #[instrument(skip(self))]
    pub async fn download_file(&self, file_id: &str) -> Result<DownloadStream> {
        let query = [("alt", "media".to_string())];
        let response = self
            .get("download", self.file_url(file_id), &query, Some(file_id))
            .await?;

        info!(file_id, size = ?response.content_length(), "Streaming file from Google Drive");

        Ok(ResourceHandle::new(file_id, response.bytes_stream()).spawn(DOWNLOAD_BUFFER_CHUNKS))
    }
}
