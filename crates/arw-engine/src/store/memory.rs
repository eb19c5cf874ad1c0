//! In-memory store backing tests and local experiments.
//!
//! Every operation takes a single lock, so each call is atomic with respect
//! to the others, matching the single-statement guarantees of the Postgres
//! adapter.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use arw_core::{Asset, CacheEntry, RasterOutput, ResultRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    AssetStore, CacheStore, OrphanDeletion, RasterStore, RasterTransition, RemovedResult,
    ResultStore, TransitionOutcome,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

#[derive(Debug, Default)]
struct MemoryData {
    assets: BTreeMap<String, Asset>,
    cache: HashMap<String, CacheEntry>,
    rasters: HashMap<Uuid, RasterOutput>,
    results: HashMap<Uuid, ResultRecord>,
    links: Vec<Link>,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    result_id: Uuid,
    raster_output_id: Uuid,
    position: usize,
}

impl MemoryData {
    fn linked_ids(&self, result_id: Uuid) -> Vec<Uuid> {
        let mut links: Vec<&Link> = self
            .links
            .iter()
            .filter(|l| l.result_id == result_id)
            .collect();
        links.sort_by_key(|l| (l.position, l.raster_output_id));
        links.iter().map(|l| l.raster_output_id).collect()
    }

    fn hydrate(&self, record: &ResultRecord) -> ResultRecord {
        let mut record = record.clone();
        record.raster_output_ids = self.linked_ids(record.id);
        record
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `assets`.
    #[must_use]
    pub fn with_assets(assets: impl IntoIterator<Item = Asset>) -> Self {
        let store = Self::new();
        {
            let mut data = store.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for asset in assets {
                data.assets.insert(asset.key.clone(), asset);
            }
        }
        store
    }

    /// Add or replace an asset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store lock is poisoned.
    pub fn upsert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        self.lock()?.assets.insert(asset.key.clone(), asset);
        Ok(())
    }

    /// Number of raster outputs currently held.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store lock is poisoned.
    pub fn raster_output_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.rasters.len())
    }

    /// Number of cache entries currently held, live or expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store lock is poisoned.
    pub fn cache_entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.cache.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryData>, StoreError> {
        self.data
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn asset_by_key(&self, key: &str) -> Result<Option<Asset>, StoreError> {
        Ok(self.lock()?.assets.get(key).cloned())
    }

    async fn asset_for_variable(&self, variable: &str) -> Result<Option<Asset>, StoreError> {
        // BTreeMap iterates in key order, so the lowest key wins.
        Ok(self
            .lock()?
            .assets
            .values()
            .find(|a| a.serves_variable(variable))
            .cloned())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.lock()?
            .cache
            .insert(entry.shape_hash.clone(), entry.clone());
        Ok(())
    }

    async fn cache_entry(&self, shape_hash: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.lock()?.cache.get(shape_hash).cloned())
    }

    async fn purge_cache_entries(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut data = self.lock()?;
        let before = data.cache.len();
        data.cache.retain(|_, entry| entry.expires_at > now);
        Ok((before - data.cache.len()) as u64)
    }
}

#[async_trait]
impl RasterStore for MemoryStore {
    async fn insert_raster_output(&self, output: &RasterOutput) -> Result<(), StoreError> {
        let mut data = self.lock()?;
        if data.rasters.contains_key(&output.id) {
            return Err(StoreError::Backend(format!(
                "raster output {} already exists",
                output.id
            )));
        }
        data.rasters.insert(output.id, output.clone());
        Ok(())
    }

    async fn raster_output(&self, id: Uuid) -> Result<Option<RasterOutput>, StoreError> {
        Ok(self.lock()?.rasters.get(&id).cloned())
    }

    async fn transition_raster_output(
        &self,
        id: Uuid,
        transition: &RasterTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut data = self.lock()?;
        let Some(output) = data.rasters.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };

        if !output.status.can_transition_to(transition.to) {
            return Ok(TransitionOutcome::Rejected {
                current: output.status,
            });
        }

        output.status = transition.to;
        output.status_logs.push(transition.log_entry.clone());
        if let Some(size) = transition.size {
            output.size = size;
        }
        if let Some(start) = transition.generate_start_time {
            output.generate_start_time = Some(start);
        }
        if let Some(end) = transition.generate_end_time {
            output.generate_end_time = Some(end);
        }

        Ok(TransitionOutcome::Applied(output.clone()))
    }

    async fn delete_raster_output(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut data = self.lock()?;
        let removed = data.rasters.remove(&id).is_some();
        data.links.retain(|l| l.raster_output_id != id);
        Ok(removed)
    }

    async fn delete_unreferenced_raster_output(
        &self,
        id: Uuid,
    ) -> Result<OrphanDeletion, StoreError> {
        let mut data = self.lock()?;
        if !data.rasters.contains_key(&id) {
            return Ok(OrphanDeletion::NotFound);
        }
        if data.links.iter().any(|l| l.raster_output_id == id) {
            return Ok(OrphanDeletion::Referenced);
        }
        data.rasters.remove(&id);
        Ok(OrphanDeletion::Deleted)
    }

    async fn raster_output_link_count(&self, id: Uuid) -> Result<u64, StoreError> {
        let data = self.lock()?;
        Ok(data
            .links
            .iter()
            .filter(|l| l.raster_output_id == id)
            .count() as u64)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_result(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let mut data = self.lock()?;
        if data.results.contains_key(&record.id) {
            return Err(StoreError::Backend(format!(
                "result {} already exists",
                record.id
            )));
        }
        let mut stored = record.clone();
        stored.raster_output_ids.clear();
        data.results.insert(record.id, stored);
        Ok(())
    }

    async fn result(&self, id: Uuid) -> Result<Option<ResultRecord>, StoreError> {
        let data = self.lock()?;
        Ok(data.results.get(&id).map(|r| data.hydrate(r)))
    }

    async fn results_for_owner(&self, owner: &str) -> Result<Vec<ResultRecord>, StoreError> {
        let data = self.lock()?;
        let mut records: Vec<ResultRecord> = data
            .results
            .values()
            .filter(|r| r.owner.as_deref() == Some(owner))
            .map(|r| data.hydrate(r))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn attach_raster_output(
        &self,
        result_id: Uuid,
        raster_output_id: Uuid,
        position: usize,
    ) -> Result<bool, StoreError> {
        let mut data = self.lock()?;
        if !data.results.contains_key(&result_id) || !data.rasters.contains_key(&raster_output_id)
        {
            return Ok(false);
        }
        let already = data
            .links
            .iter()
            .any(|l| l.result_id == result_id && l.raster_output_id == raster_output_id);
        if already {
            return Ok(false);
        }
        data.links.push(Link {
            result_id,
            raster_output_id,
            position,
        });
        Ok(true)
    }

    async fn set_result_payload(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut data = self.lock()?;
        Ok(match data.results.get_mut(&id) {
            Some(record) => {
                record.payload = Some(payload.clone());
                true
            }
            None => false,
        })
    }

    async fn set_result_raster_path(
        &self,
        id: Uuid,
        path: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut data = self.lock()?;
        Ok(match data.results.get_mut(&id) {
            Some(record) => {
                record.raster_output_path = path.map(str::to_string);
                true
            }
            None => false,
        })
    }

    async fn delete_result(&self, id: Uuid) -> Result<Option<RemovedResult>, StoreError> {
        let mut data = self.lock()?;
        let Some(stored) = data.results.remove(&id) else {
            return Ok(None);
        };

        let linked = data.linked_ids(id);
        data.links.retain(|l| l.result_id != id);

        let orphaned_raster_output_ids = linked
            .iter()
            .copied()
            .filter(|raster_id| !data.links.iter().any(|l| l.raster_output_id == *raster_id))
            .collect();

        let mut record = stored;
        record.raster_output_ids = linked;

        Ok(Some(RemovedResult {
            record,
            orphaned_raster_output_ids,
        }))
    }
}
