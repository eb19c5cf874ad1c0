//! HTTP client for the geospatial compute service.
//!
//! Each [`ComputeJob`] is posted as JSON to `{base}/compute`; the service
//! answers with a [`ComputeOutput`] once the raster has been written.

use arw_engine::{ComputeError, ComputeJob, ComputeOutput, ComputeService};
use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::error::RemoteError;
use crate::retry::{is_retriable, retry_with_backoff};
use crate::settings::{error_body, ClientSettings};

const SERVICE: &str = "compute";

pub struct HttpComputeClient {
    client: Client,
    endpoint: Url,
    api_token: Option<String>,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl HttpComputeClient {
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidBaseUrl`] if the base URL does not parse,
    /// or [`RemoteError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(settings: &ClientSettings) -> Result<Self, RemoteError> {
        let base = settings.parsed_base_url()?;
        let endpoint = base
            .join("compute")
            .map_err(|e| RemoteError::InvalidBaseUrl {
                url: settings.base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client: settings.build_client()?,
            endpoint,
            api_token: settings.api_token.clone(),
            max_retries: settings.max_retries,
            backoff_base_ms: settings.backoff_base_ms,
        })
    }

    /// Posts `job` and decodes the service's answer, retrying transient
    /// failures.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::Status`] for a non-2xx answer.
    /// - [`RemoteError::Http`] on network failure or timeout.
    /// - [`RemoteError::Deserialize`] if a 2xx body is not a compute output.
    pub async fn submit(&self, job: &ComputeJob) -> Result<ComputeOutput, RemoteError> {
        retry_with_backoff(SERVICE, self.max_retries, self.backoff_base_ms, || {
            self.submit_once(job)
        })
        .await
    }

    async fn submit_once(&self, job: &ComputeJob) -> Result<ComputeOutput, RemoteError> {
        let mut request = self.client.post(self.endpoint.clone()).json(job);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|source| RemoteError::Deserialize {
            context: format!("compute output for raster output {}", job.raster_output_id),
            source,
        })
    }
}

#[async_trait]
impl ComputeService for HttpComputeClient {
    async fn compute(&self, job: &ComputeJob) -> Result<ComputeOutput, ComputeError> {
        tracing::debug!(
            raster_output_id = %job.raster_output_id,
            asset = %job.asset_key,
            filename = %job.filename,
            "submitting compute job"
        );
        self.submit(job).await.map_err(|err| {
            if is_retriable(&err) {
                ComputeError::Transient(err.to_string())
            } else {
                ComputeError::Permanent(err.to_string())
            }
        })
    }
}
