//! HTTP client for the blob store that holds generated rasters.

use arw_engine::{BlobStore, StorageError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::error::RemoteError;
use crate::retry::{is_retriable, retry_with_backoff};
use crate::settings::{error_body, ClientSettings};

const SERVICE: &str = "blob";

pub struct HttpBlobClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl HttpBlobClient {
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidBaseUrl`] if the base URL does not parse,
    /// or [`RemoteError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(settings: &ClientSettings) -> Result<Self, RemoteError> {
        Ok(Self {
            client: settings.build_client()?,
            base_url: settings.parsed_base_url()?,
            api_token: settings.api_token.clone(),
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
        })
    }

    /// `{base}/files/{filename}`, with each `/`-separated part of the
    /// filename percent-encoded as its own path segment.
    pub(crate) fn file_url(&self, filename: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("files");
            for part in filename.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        url
    }

    /// Deletes `filename`. Returns `Ok(false)` when the store reports it
    /// absent (404 or 410).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] for any other failure after retries.
    pub async fn delete_file(&self, filename: &str) -> Result<bool, RemoteError> {
        let url = self.file_url(filename);
        retry_with_backoff(SERVICE, self.max_retries, self.backoff_base_ms, || {
            self.delete_once(&url)
        })
        .await
    }

    async fn delete_once(&self, url: &Url) -> Result<bool, RemoteError> {
        let mut request = self.client.delete(url.clone());
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(false);
        }
        Err(RemoteError::Status {
            service: SERVICE,
            status: status.as_u16(),
            body: error_body(response).await,
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobClient {
    async fn delete(&self, filename: &str) -> Result<bool, StorageError> {
        self.delete_file(filename).await.map_err(|err| {
            if is_retriable(&err) {
                StorageError::Unavailable(err.to_string())
            } else {
                StorageError::Rejected {
                    filename: filename.to_owned(),
                    reason: err.to_string(),
                }
            }
        })
    }
}

/// Stand-in used when no blob store is configured: every delete is logged
/// and reported as already absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBlobStore;

#[async_trait]
impl BlobStore for DisabledBlobStore {
    async fn delete(&self, filename: &str) -> Result<bool, StorageError> {
        tracing::warn!(filename, "blob store not configured; skipping delete");
        Ok(false)
    }
}
