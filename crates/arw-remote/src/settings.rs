use std::time::Duration;

use arw_core::AppConfig;
use reqwest::{Client, Url};

use crate::error::RemoteError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const BLOB_TIMEOUT_SECS: u64 = 30;

/// Connection settings shared by the compute and blob clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub user_agent: String,
}

impl ClientSettings {
    /// A settings block with no token, no retries and no back-off, used for
    /// pointing a client at a mock server.
    #[must_use]
    pub fn for_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            api_token: None,
            timeout_secs: 30,
            max_retries: 0,
            backoff_base_ms: 0,
            user_agent: "arw/0.1 (analysis-pipeline)".to_owned(),
        }
    }

    /// Compute service settings, or `None` when `ARW_COMPUTE_URL` is unset.
    #[must_use]
    pub fn compute_from_app_config(config: &AppConfig) -> Option<Self> {
        config.compute_url.as_ref().map(|url| Self {
            base_url: url.clone(),
            api_token: config.compute_api_token.clone(),
            timeout_secs: config.compute_timeout_secs,
            max_retries: config.compute_max_retries,
            backoff_base_ms: config.retry_backoff_base_ms,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Blob store settings, or `None` when `ARW_BLOB_URL` is unset.
    #[must_use]
    pub fn blob_from_app_config(config: &AppConfig) -> Option<Self> {
        config.blob_url.as_ref().map(|url| Self {
            base_url: url.clone(),
            api_token: config.blob_api_token.clone(),
            timeout_secs: BLOB_TIMEOUT_SECS,
            max_retries: config.blob_max_retries,
            backoff_base_ms: config.retry_backoff_base_ms,
            user_agent: config.user_agent.clone(),
        })
    }

    pub(crate) fn build_client(&self) -> Result<Client, RemoteError> {
        Ok(Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(self.user_agent.as_str())
            .build()?)
    }

    /// Parses the base URL with exactly one trailing slash so that joined
    /// paths extend it rather than replace its last segment.
    pub(crate) fn parsed_base_url(&self) -> Result<Url, RemoteError> {
        let normalised = format!("{}/", self.base_url.trim_end_matches('/'));
        let url = Url::parse(&normalised).map_err(|e| RemoteError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(RemoteError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "URL cannot carry a path".to_owned(),
            });
        }
        Ok(url)
    }
}

/// Reads at most a short prefix of an error body for diagnostics.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    const MAX_CHARS: usize = 200;
    match response.text().await {
        Ok(text) => text.chars().take(MAX_CHARS).collect(),
        Err(e) => format!("<unreadable body: {e}>"),
    }
}
