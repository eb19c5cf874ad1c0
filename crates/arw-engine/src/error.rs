use arw_core::{RasterStatus, RequestError};
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("no asset serves variable '{0}'")]
    NoAssetForVariable(String),

    #[error("result not found: {0}")]
    ResultNotFound(Uuid),

    #[error("raster output not found: {0}")]
    RasterOutputNotFound(Uuid),

    #[error("asset '{key}' has invalid metadata: {reason}")]
    InvalidMetadata { key: String, reason: String },

    #[error("{start}..{end} is outside the coverage window of asset '{key}'")]
    OutOfCoverage {
        key: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("invalid analysis request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("raster output {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: RasterStatus,
        to: RasterStatus,
    },

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode request shape: {0}")]
    Encode(#[from] serde_json::Error),
}

impl EngineError {
    /// Failures confined to a single descriptor. They are recorded on that
    /// descriptor's raster output and never abort its siblings.
    #[must_use]
    pub fn is_descriptor_failure(&self) -> bool {
        matches!(
            self,
            EngineError::AssetNotFound(_)
                | EngineError::NoAssetForVariable(_)
                | EngineError::InvalidMetadata { .. }
                | EngineError::OutOfCoverage { .. }
                | EngineError::InvalidRequest(_)
                | EngineError::Compute(_)
        )
    }
}

/// Outcome of a failed call to the external compute service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// Timeouts, throttling, upstream 5xx. The caller may retry.
    #[error("transient compute failure: {0}")]
    Transient(String),

    #[error("permanent compute failure: {0}")]
    Permanent(String),
}

impl ComputeError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ComputeError::Transient(_))
    }
}

/// Failure of the external blob store. Deletion paths log and swallow it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("blob store refused to delete '{filename}': {reason}")]
    Rejected { filename: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored record could not be decoded: {0}")]
    InvalidRecord(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Db(arw_db::DbError),
}

impl From<arw_db::DbError> for StoreError {
    fn from(err: arw_db::DbError) -> Self {
        match err {
            arw_db::DbError::InvalidColumn { column, reason } => {
                StoreError::InvalidRecord(format!("{column}: {reason}"))
            }
            other => StoreError::Db(other),
        }
    }
}
