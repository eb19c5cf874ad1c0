//! Contracts for the external services the pipeline drives.

use arw_core::{AnalysisDescriptor, DateRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ComputeError, StorageError};

/// One unit of work sent to the compute service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeJob {
    /// Identifies the raster artifact the service should produce.
    pub raster_output_id: Uuid,
    pub descriptor: AnalysisDescriptor,
    pub asset_key: String,
    pub asset_source: String,
    /// Effective range after clamping to the asset's coverage.
    pub range: DateRange,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOutput {
    pub payload: serde_json::Value,
    /// Size of the generated raster in bytes, when the service reports one.
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

/// The opaque geospatial compute backend. Calls are slow; implementations
/// must not retry permanent failures.
#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn compute(&self, job: &ComputeJob) -> Result<ComputeOutput, ComputeError>;
}

/// External storage holding generated rasters.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Delete `filename`. Returns `Ok(false)` when it was already absent.
    async fn delete(&self, filename: &str) -> Result<bool, StorageError>;
}
