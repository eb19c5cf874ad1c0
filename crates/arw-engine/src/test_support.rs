//! Fixtures and fake collaborators shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use arw_core::{
    AnalysisDescriptor, Asset, AssetMetadata, AssetType, CacheEntry, ComparisonPeriod,
    ComparisonRequest, Period, RasterOutput, RasterStatus, ResultRecord, TemporalResolution,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{ComputeError, StorageError, StoreError};
use crate::ports::{BlobStore, ComputeJob, ComputeOutput, ComputeService};
use crate::store::{
    AssetStore, CacheStore, MemoryStore, OrphanDeletion, RasterStore, RasterTransition,
    RemovedResult, ResultStore, TransitionOutcome,
};

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) fn asset(key: &str, start: NaiveDate, end: NaiveDate, variables: &[&str]) -> Asset {
    Asset {
        key: key.to_string(),
        source: format!("projects/arw/assets/{key}"),
        asset_type: AssetType::ImageCollection,
        metadata: AssetMetadata {
            start_date: Some(start),
            end_date: Some(end),
            variables: variables.iter().map(ToString::to_string).collect(),
            attributes: serde_json::Map::new(),
        },
    }
}

pub(crate) fn descriptor(year: i32) -> AnalysisDescriptor {
    AnalysisDescriptor {
        analysis_type: "Spatial".to_string(),
        variable: "NDVI".to_string(),
        landscape: "Bahine".to_string(),
        temporal_resolution: TemporalResolution::Yearly,
        year,
        month: None,
        quarter: None,
        community_name: "North Block".to_string(),
    }
}

pub(crate) fn yearly_request(primary: i32, comparison: &[i32]) -> ComparisonRequest {
    ComparisonRequest {
        analysis_type: "Spatial".to_string(),
        variable: "NDVI".to_string(),
        landscape: "Bahine".to_string(),
        temporal_resolution: TemporalResolution::Yearly,
        period: Period {
            year: primary,
            month: None,
            quarter: None,
        },
        comparison_period: ComparisonPeriod {
            year: comparison.to_vec(),
            month: None,
            quarter: None,
        },
        community_name: "North Block".to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum BlobMode {
    #[default]
    Present,
    Absent,
    Failing,
}

/// Records every deletion it is asked for.
#[derive(Debug, Default)]
pub(crate) struct RecordingBlobStore {
    mode: BlobMode,
    deleted: Mutex<Vec<String>>,
}

impl RecordingBlobStore {
    pub(crate) fn absent() -> Self {
        Self {
            mode: BlobMode::Absent,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            mode: BlobMode::Failing,
            ..Self::default()
        }
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn delete(&self, filename: &str) -> Result<bool, StorageError> {
        self.deleted.lock().unwrap().push(filename.to_string());
        match self.mode {
            BlobMode::Present => Ok(true),
            BlobMode::Absent => Ok(false),
            BlobMode::Failing => Err(StorageError::Unavailable("connection refused".to_string())),
        }
    }
}

/// Compute fake answering per descriptor year, optionally pausing inside the
/// call until released.
#[derive(Debug, Default)]
pub(crate) struct ScriptedCompute {
    failures: Mutex<HashMap<i32, ComputeError>>,
    jobs: Mutex<Vec<ComputeJob>>,
    pause: bool,
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

impl ScriptedCompute {
    pub(crate) fn paused() -> Self {
        Self {
            pause: true,
            ..Self::default()
        }
    }

    pub(crate) fn fail_year(&self, year: i32, err: ComputeError) {
        self.failures.lock().unwrap().insert(year, err);
    }

    pub(crate) fn jobs(&self) -> Vec<ComputeJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeService for ScriptedCompute {
    async fn compute(&self, job: &ComputeJob) -> Result<ComputeOutput, ComputeError> {
        self.jobs.lock().unwrap().push(job.clone());
        if self.pause {
            self.entered.notify_one();
            self.release.notified().await;
        }

        let failure = self.failures.lock().unwrap().get(&job.descriptor.year).cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(ComputeOutput {
                payload: json!({
                    "year": job.descriptor.year,
                    "start": job.range.start,
                    "end": job.range.end,
                    "mean": 0.5,
                }),
                size_bytes: Some(1024),
            }),
        }
    }
}

/// A [`MemoryStore`] whose cache writes or `generating` transitions can be
/// made to fail.
#[derive(Default)]
pub(crate) struct FaultyStore {
    pub(crate) inner: MemoryStore,
    pub(crate) fail_cache_writes: AtomicBool,
    pub(crate) fail_generating: AtomicBool,
}

impl FaultyStore {
    pub(crate) fn with_assets(assets: impl IntoIterator<Item = Asset>) -> Self {
        Self {
            inner: MemoryStore::with_assets(assets),
            ..Self::default()
        }
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Backend(format!("{what}: connection reset"))
}

#[async_trait]
impl AssetStore for FaultyStore {
    async fn asset_by_key(&self, key: &str) -> Result<Option<Asset>, StoreError> {
        self.inner.asset_by_key(key).await
    }

    async fn asset_for_variable(&self, variable: &str) -> Result<Option<Asset>, StoreError> {
        self.inner.asset_for_variable(variable).await
    }
}

#[async_trait]
impl CacheStore for FaultyStore {
    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        if self.fail_cache_writes.load(Ordering::SeqCst) {
            return Err(injected("cache write"));
        }
        self.inner.put_cache_entry(entry).await
    }

    async fn cache_entry(&self, shape_hash: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.inner.cache_entry(shape_hash).await
    }

    async fn purge_cache_entries(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_cache_entries(now).await
    }
}

#[async_trait]
impl RasterStore for FaultyStore {
    async fn insert_raster_output(&self, output: &RasterOutput) -> Result<(), StoreError> {
        self.inner.insert_raster_output(output).await
    }

    async fn raster_output(&self, id: Uuid) -> Result<Option<RasterOutput>, StoreError> {
        self.inner.raster_output(id).await
    }

    async fn transition_raster_output(
        &self,
        id: Uuid,
        transition: &RasterTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        if transition.to == RasterStatus::Generating && self.fail_generating.load(Ordering::SeqCst)
        {
            return Err(injected("transition"));
        }
        self.inner.transition_raster_output(id, transition).await
    }

    async fn delete_raster_output(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_raster_output(id).await
    }

    async fn delete_unreferenced_raster_output(
        &self,
        id: Uuid,
    ) -> Result<OrphanDeletion, StoreError> {
        self.inner.delete_unreferenced_raster_output(id).await
    }

    async fn raster_output_link_count(&self, id: Uuid) -> Result<u64, StoreError> {
        self.inner.raster_output_link_count(id).await
    }
}

#[async_trait]
impl ResultStore for FaultyStore {
    async fn insert_result(&self, record: &ResultRecord) -> Result<(), StoreError> {
        self.inner.insert_result(record).await
    }

    async fn result(&self, id: Uuid) -> Result<Option<ResultRecord>, StoreError> {
        self.inner.result(id).await
    }

    async fn results_for_owner(&self, owner: &str) -> Result<Vec<ResultRecord>, StoreError> {
        self.inner.results_for_owner(owner).await
    }

    async fn attach_raster_output(
        &self,
        result_id: Uuid,
        raster_output_id: Uuid,
        position: usize,
    ) -> Result<bool, StoreError> {
        self.inner
            .attach_raster_output(result_id, raster_output_id, position)
            .await
    }

    async fn set_result_payload(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        self.inner.set_result_payload(id, payload).await
    }

    async fn set_result_raster_path(
        &self,
        id: Uuid,
        path: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.inner.set_result_raster_path(id, path).await
    }

    async fn delete_result(&self, id: Uuid) -> Result<Option<RemovedResult>, StoreError> {
        self.inner.delete_result(id).await
    }
}
