//! Persistence ports and their adapters.
//!
//! Each component depends only on the narrow trait it needs; [`Store`] is the
//! union implemented by every adapter.

use arw_core::{Asset, CacheEntry, RasterOutput, RasterStatus, ResultRecord, StatusLogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn asset_by_key(&self, key: &str) -> Result<Option<Asset>, StoreError>;

    /// The asset whose `metadata.variables` lists `variable`
    /// (case-insensitive); the lowest key wins on ties.
    async fn asset_for_variable(&self, variable: &str) -> Result<Option<Asset>, StoreError>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or overwrite the entry for `entry.shape_hash`.
    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    async fn cache_entry(&self, shape_hash: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Remove entries with `expires_at <= now`; returns how many went.
    async fn purge_cache_entries(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// A requested status change plus the columns that change with it.
#[derive(Debug, Clone)]
pub struct RasterTransition {
    pub to: RasterStatus,
    pub log_entry: StatusLogEntry,
    pub size: Option<i64>,
    pub generate_start_time: Option<DateTime<Utc>>,
    pub generate_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(RasterOutput),
    NotFound,
    /// The output was not in a legal predecessor state of the target.
    Rejected { current: RasterStatus },
}

/// What [`RasterStore::delete_unreferenced_raster_output`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanDeletion {
    Deleted,
    /// A result links to the output, so it was kept.
    Referenced,
    NotFound,
}

#[async_trait]
pub trait RasterStore: Send + Sync {
    async fn insert_raster_output(&self, output: &RasterOutput) -> Result<(), StoreError>;

    async fn raster_output(&self, id: Uuid) -> Result<Option<RasterOutput>, StoreError>;

    /// Apply `transition` atomically, only if the output is currently in one
    /// of `transition.to`'s allowed predecessors.
    async fn transition_raster_output(
        &self,
        id: Uuid,
        transition: &RasterTransition,
    ) -> Result<TransitionOutcome, StoreError>;

    async fn delete_raster_output(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete the output only if no result links to it. The link check and
    /// the delete are one atomic step with respect to `attach_raster_output`.
    async fn delete_unreferenced_raster_output(
        &self,
        id: Uuid,
    ) -> Result<OrphanDeletion, StoreError>;

    /// Number of results linking to the output.
    async fn raster_output_link_count(&self, id: Uuid) -> Result<u64, StoreError>;
}

/// A deleted result and the raster outputs it left unreferenced.
#[derive(Debug, Clone)]
pub struct RemovedResult {
    pub record: ResultRecord,
    pub orphaned_raster_output_ids: Vec<Uuid>,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert_result(&self, record: &ResultRecord) -> Result<(), StoreError>;

    /// The record with `raster_output_ids` in link position order.
    async fn result(&self, id: Uuid) -> Result<Option<ResultRecord>, StoreError>;

    /// Newest first.
    async fn results_for_owner(&self, owner: &str) -> Result<Vec<ResultRecord>, StoreError>;

    /// Link an output to a result at `position`. `Ok(false)` if the result or
    /// the output is gone, or the pair is already linked.
    async fn attach_raster_output(
        &self,
        result_id: Uuid,
        raster_output_id: Uuid,
        position: usize,
    ) -> Result<bool, StoreError>;

    async fn set_result_payload(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError>;

    async fn set_result_raster_path(&self, id: Uuid, path: Option<&str>)
        -> Result<bool, StoreError>;

    /// Delete the result and its links in one step and report the outputs no
    /// other result references. `Ok(None)` if there was no such result.
    async fn delete_result(&self, id: Uuid) -> Result<Option<RemovedResult>, StoreError>;
}

pub trait Store: AssetStore + CacheStore + RasterStore + ResultStore {}

impl<T: AssetStore + CacheStore + RasterStore + ResultStore> Store for T {}
