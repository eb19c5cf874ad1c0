//! Postgres adapter over the `arw-db` query functions.

use arw_core::{Asset, CacheEntry, RasterOutput, RasterStatus, ResultRecord};
use arw_db::{DbError, RasterTransitionParams, UnreferencedDelete};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AssetStore, CacheStore, OrphanDeletion, RasterStore, RasterTransition, RemovedResult,
    ResultStore, TransitionOutcome,
};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AssetStore for PgStore {
    async fn asset_by_key(&self, key: &str) -> Result<Option<Asset>, StoreError> {
        arw_db::get_asset_by_key(&self.pool, key)
            .await?
            .map(arw_db::AssetRow::into_asset)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn asset_for_variable(&self, variable: &str) -> Result<Option<Asset>, StoreError> {
        arw_db::find_asset_for_variable(&self.pool, variable)
            .await?
            .map(arw_db::AssetRow::into_asset)
            .transpose()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        arw_db::upsert_cache_entry(&self.pool, entry).await?;
        Ok(())
    }

    async fn cache_entry(&self, shape_hash: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(arw_db::get_cache_entry(&self.pool, shape_hash)
            .await?
            .map(CacheEntry::from))
    }

    async fn purge_cache_entries(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(arw_db::delete_expired_cache_entries(&self.pool, now).await?)
    }
}

#[async_trait]
impl RasterStore for PgStore {
    async fn insert_raster_output(&self, output: &RasterOutput) -> Result<(), StoreError> {
        arw_db::insert_raster_output(&self.pool, output).await?;
        Ok(())
    }

    async fn raster_output(&self, id: Uuid) -> Result<Option<RasterOutput>, StoreError> {
        arw_db::get_raster_output(&self.pool, id)
            .await?
            .map(arw_db::RasterOutputRow::into_raster_output)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn transition_raster_output(
        &self,
        id: Uuid,
        transition: &RasterTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let params = RasterTransitionParams {
            to: transition.to,
            log_entry: transition.log_entry.clone(),
            size: transition.size,
            generate_start_time: transition.generate_start_time,
            generate_end_time: transition.generate_end_time,
        };

        match arw_db::transition_raster_output(&self.pool, id, &params).await {
            Ok(row) => Ok(TransitionOutcome::Applied(row.into_raster_output()?)),
            Err(DbError::NotFound) => Ok(TransitionOutcome::NotFound),
            Err(DbError::RejectedTransition { current, .. }) => {
                let current: RasterStatus = current.parse().map_err(StoreError::InvalidRecord)?;
                Ok(TransitionOutcome::Rejected { current })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_raster_output(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(arw_db::delete_raster_output(&self.pool, id).await?)
    }

    async fn delete_unreferenced_raster_output(
        &self,
        id: Uuid,
    ) -> Result<OrphanDeletion, StoreError> {
        Ok(
            match arw_db::delete_unreferenced_raster_output(&self.pool, id).await? {
                UnreferencedDelete::Deleted => OrphanDeletion::Deleted,
                UnreferencedDelete::StillReferenced => OrphanDeletion::Referenced,
                UnreferencedDelete::NotFound => OrphanDeletion::NotFound,
            },
        )
    }

    async fn raster_output_link_count(&self, id: Uuid) -> Result<u64, StoreError> {
        let count = arw_db::count_raster_output_links(&self.pool, id).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn insert_result(&self, record: &ResultRecord) -> Result<(), StoreError> {
        arw_db::insert_result(&self.pool, record).await?;
        Ok(())
    }

    async fn result(&self, id: Uuid) -> Result<Option<ResultRecord>, StoreError> {
        let Some(row) = arw_db::get_result(&self.pool, id).await? else {
            return Ok(None);
        };
        let ids = arw_db::list_result_raster_output_ids(&self.pool, id).await?;
        Ok(Some(row.into_record(ids)))
    }

    async fn results_for_owner(&self, owner: &str) -> Result<Vec<ResultRecord>, StoreError> {
        let rows = arw_db::list_results_for_owner(&self.pool, owner).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let ids = arw_db::list_result_raster_output_ids(&self.pool, row.id).await?;
            records.push(row.into_record(ids));
        }
        Ok(records)
    }

    async fn attach_raster_output(
        &self,
        result_id: Uuid,
        raster_output_id: Uuid,
        position: usize,
    ) -> Result<bool, StoreError> {
        let position = i32::try_from(position)
            .map_err(|_| StoreError::Backend(format!("link position {position} overflows")))?;
        Ok(arw_db::attach_raster_output(&self.pool, result_id, raster_output_id, position).await?)
    }

    async fn set_result_payload(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        Ok(arw_db::update_result_payload(&self.pool, id, payload).await?)
    }

    async fn set_result_raster_path(
        &self,
        id: Uuid,
        path: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(arw_db::set_result_raster_output_path(&self.pool, id, path).await?)
    }

    async fn delete_result(&self, id: Uuid) -> Result<Option<RemovedResult>, StoreError> {
        match arw_db::delete_result(&self.pool, id).await {
            Ok(deleted) => Ok(Some(RemovedResult {
                record: deleted.result.into_record(deleted.raster_output_ids),
                orphaned_raster_output_ids: deleted.orphaned_raster_output_ids,
            })),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
