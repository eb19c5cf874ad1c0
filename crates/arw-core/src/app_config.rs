use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub assets_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub compute_url: Option<String>,
    pub compute_api_token: Option<String>,
    pub compute_timeout_secs: u64,
    pub compute_max_retries: u32,
    pub blob_url: Option<String>,
    pub blob_api_token: Option<String>,
    pub blob_max_retries: u32,
    pub retry_backoff_base_ms: u64,
    /// `None` lets the result cache fall back to its one-hour default.
    pub cache_ttl_hours: Option<u32>,
    pub max_concurrent_descriptors: usize,
    pub user_agent: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("assets_path", &self.assets_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("compute_url", &self.compute_url)
            .field(
                "compute_api_token",
                &self.compute_api_token.as_ref().map(|_| "[redacted]"),
            )
            .field("compute_timeout_secs", &self.compute_timeout_secs)
            .field("compute_max_retries", &self.compute_max_retries)
            .field("blob_url", &self.blob_url)
            .field(
                "blob_api_token",
                &self.blob_api_token.as_ref().map(|_| "[redacted]"),
            )
            .field("blob_max_retries", &self.blob_max_retries)
            .field("retry_backoff_base_ms", &self.retry_backoff_base_ms)
            .field("cache_ttl_hours", &self.cache_ttl_hours)
            .field(
                "max_concurrent_descriptors",
                &self.max_concurrent_descriptors,
            )
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
