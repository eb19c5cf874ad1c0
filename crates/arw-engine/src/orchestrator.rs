//! Top-level coordination of an analysis run.
//!
//! A [`ComparisonRequest`] expands into ordered descriptors which are resolved,
//! cached and dispatched independently. One descriptor failing never aborts
//! its siblings; the failure is recorded on that descriptor's raster output
//! and in the run's aggregate payload.

use std::sync::Arc;

use arw_core::{
    AnalysisDescriptor, AppConfig, Asset, ComparisonRequest, DateRange, RasterOutput,
    RasterStatus, RequestShape, ResultRecord,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::catalog::AssetCatalog;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::period::PeriodResolver;
use crate::ports::{BlobStore, ComputeJob, ComputeService};
use crate::store::Store;
use crate::tracker::RasterOutputTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// `None` resolves to the cache's one-hour default.
    pub cache_ttl_hours: Option<u32>,
    pub max_concurrent_descriptors: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_hours: None,
            max_concurrent_descriptors: 4,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            cache_ttl_hours: config.cache_ttl_hours,
            max_concurrent_descriptors: config.max_concurrent_descriptors.max(1),
        }
    }
}

/// What happened to one descriptor of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorOutcome {
    pub descriptor: AnalysisDescriptor,
    pub raster_output_id: Option<Uuid>,
    pub status: RasterStatus,
    /// Served from the result cache without calling the compute service.
    pub cached: bool,
    /// Effective range after clamping to the asset's coverage.
    pub range: Option<DateRange>,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl DescriptorOutcome {
    fn failed(descriptor: AnalysisDescriptor, raster_output_id: Option<Uuid>, error: String) -> Self {
        Self {
            descriptor,
            raster_output_id,
            status: RasterStatus::Failed,
            cached: false,
            range: None,
            payload: None,
            error: Some(error),
        }
    }
}

/// The aggregate payload stored on a [`ResultRecord`], outcomes in
/// descriptor order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub results: Vec<DescriptorOutcome>,
}

/// What [`AnalysisOrchestrator::delete_result`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub result_id: Uuid,
    /// Outputs the result linked to, in order.
    pub detached_raster_output_ids: Vec<Uuid>,
    /// Orphaned terminal outputs removed along with their files.
    pub deleted_raster_output_ids: Vec<Uuid>,
    /// Orphaned outputs still pending or generating; collected by the
    /// running task once they reach a terminal state.
    pub deferred_raster_output_ids: Vec<Uuid>,
}

/// Cache slot value for one descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAnalysis {
    payload: Value,
    raster_output_id: Uuid,
}

#[derive(Serialize)]
struct CacheKey<'a> {
    descriptor: &'a AnalysisDescriptor,
    asset: &'a str,
    range: &'a DateRange,
}

pub struct AnalysisOrchestrator<S> {
    store: Arc<S>,
    catalog: AssetCatalog<S>,
    resolver: PeriodResolver<S>,
    cache: ResultCache<S>,
    tracker: RasterOutputTracker<S>,
    compute: Arc<dyn ComputeService>,
    blob: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl<S: Store> AnalysisOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        compute: Arc<dyn ComputeService>,
        blob: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog: AssetCatalog::new(Arc::clone(&store)),
            resolver: PeriodResolver::new(Arc::clone(&store)),
            cache: ResultCache::new(Arc::clone(&store), Arc::clone(&clock)),
            tracker: RasterOutputTracker::new(
                Arc::clone(&store),
                Arc::clone(&blob),
                Arc::clone(&clock),
            ),
            store,
            compute,
            blob,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &RasterOutputTracker<S> {
        &self.tracker
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache<S> {
        &self.cache
    }

    /// Run every descriptor of `request` and persist a [`ResultRecord`]
    /// linking the raster outputs in descriptor order.
    ///
    /// The record is created before any work starts, so a concurrent
    /// [`delete_result`](Self::delete_result) can cancel the run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the request does not expand,
    /// [`EngineError::ResultNotFound`] if the record was deleted while the run
    /// was in flight, or [`EngineError::Store`] on persistence failure.
    /// Per-descriptor failures are not errors; inspect the payload.
    pub async fn run_analysis(
        &self,
        request: &ComparisonRequest,
        owner: Option<String>,
        source: Option<String>,
    ) -> Result<ResultRecord, EngineError> {
        let descriptors = self.tracker.expand(request)?;
        let record = ResultRecord::new(owner, source, self.clock.now());
        self.store.insert_result(&record).await?;

        let result_id = record.id;
        tracing::info!(
            result_id = %result_id,
            descriptors = descriptors.len(),
            "analysis run started"
        );

        let mut outcomes: Vec<(usize, DescriptorOutcome)> =
            stream::iter(descriptors.into_iter().enumerate())
                .map(|(position, descriptor)| async move {
                    let outcome = match self
                        .run_descriptor(result_id, position, descriptor.clone())
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(
                                result_id = %result_id,
                                position,
                                error = %e,
                                "descriptor processing failed"
                            );
                            DescriptorOutcome::failed(descriptor, None, e.to_string())
                        }
                    };
                    (position, outcome)
                })
                .buffer_unordered(self.config.max_concurrent_descriptors.max(1))
                .collect()
                .await;

        outcomes.sort_by_key(|(position, _)| *position);
        let results: Vec<DescriptorOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
        let failed = results
            .iter()
            .filter(|o| o.status == RasterStatus::Failed)
            .count();
        let cached = results.iter().filter(|o| o.cached).count();

        let payload = serde_json::to_value(AnalysisPayload { results })?;
        if !self.store.set_result_payload(result_id, &payload).await? {
            tracing::info!(result_id = %result_id, "result deleted while the analysis was running");
            return Err(EngineError::ResultNotFound(result_id));
        }

        tracing::info!(result_id = %result_id, failed, cached, "analysis run finished");
        self.get_result(result_id).await
    }

    /// Run the analysis on a Tokio task so the caller never waits on compute.
    pub fn spawn_analysis(
        self: &Arc<Self>,
        request: ComparisonRequest,
        owner: Option<String>,
        source: Option<String>,
    ) -> JoinHandle<Result<ResultRecord, EngineError>>
    where
        S: 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_analysis(&request, owner, source).await })
    }

    async fn run_descriptor(
        &self,
        result_id: Uuid,
        position: usize,
        descriptor: AnalysisDescriptor,
    ) -> Result<DescriptorOutcome, EngineError> {
        let (asset, range) = match self.resolve(&descriptor).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_descriptor_failure() => {
                return self.record_skipped(result_id, position, descriptor, &e).await;
            }
            Err(e) => return Err(e),
        };

        let shape = RequestShape::from_serializable(&CacheKey {
            descriptor: &descriptor,
            asset: &asset.key,
            range: &range,
        })?;

        if let Some(outcome) = self
            .reuse_cached(result_id, position, &descriptor, &shape, range)
            .await?
        {
            return Ok(outcome);
        }

        self.dispatch(result_id, position, descriptor, &asset, range, &shape)
            .await
    }

    /// Find the asset serving the descriptor and clamp its period to that
    /// asset's coverage.
    async fn resolve(
        &self,
        descriptor: &AnalysisDescriptor,
    ) -> Result<(Asset, DateRange), EngineError> {
        let requested = descriptor.period_range()?;
        let asset = self.catalog.asset_for_variable(&descriptor.variable).await?;
        let range = self
            .resolver
            .clamp_range(&asset.key, requested.start, requested.end)
            .await?
            .ok_or_else(|| EngineError::OutOfCoverage {
                key: asset.key.clone(),
                start: requested.start,
                end: requested.end,
            })?;
        Ok((asset, range))
    }

    /// Register a raster output for a descriptor that cannot run and fail it
    /// straight from `pending`.
    async fn record_skipped(
        &self,
        result_id: Uuid,
        position: usize,
        descriptor: AnalysisDescriptor,
        reason: &EngineError,
    ) -> Result<DescriptorOutcome, EngineError> {
        tracing::info!(
            result_id = %result_id,
            variable = %descriptor.variable,
            year = descriptor.year,
            reason = %reason,
            "descriptor skipped"
        );

        let output = self.tracker.register(descriptor.clone()).await?;
        if let Err(e) = self
            .store
            .attach_raster_output(result_id, output.id, position)
            .await
        {
            tracing::warn!(raster_output_id = %output.id, error = %e, "linking skipped descriptor failed");
        }
        self.fail_best_effort(output.id, reason).await;
        self.collect_if_orphaned(output.id).await;

        Ok(DescriptorOutcome::failed(
            descriptor,
            Some(output.id),
            reason.to_string(),
        ))
    }

    async fn reuse_cached(
        &self,
        result_id: Uuid,
        position: usize,
        descriptor: &AnalysisDescriptor,
        shape: &RequestShape,
        range: DateRange,
    ) -> Result<Option<DescriptorOutcome>, EngineError> {
        let Some(value) = self.cache.lookup(shape).await? else {
            return Ok(None);
        };

        let cached: CachedAnalysis = match serde_json::from_value(value) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(shape_hash = %shape.hash(), error = %e, "unreadable cache entry; recomputing");
                return Ok(None);
            }
        };

        match self.store.raster_output(cached.raster_output_id).await? {
            Some(output) if output.status == RasterStatus::Ready => {}
            _ => {
                tracing::debug!(
                    raster_output_id = %cached.raster_output_id,
                    "cached raster output is gone or not ready; recomputing"
                );
                return Ok(None);
            }
        }

        // The output may be collected between the status check and the link.
        match self
            .store
            .attach_raster_output(result_id, cached.raster_output_id, position)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    raster_output_id = %cached.raster_output_id,
                    "cached raster output could not be linked; recomputing"
                );
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(
                    raster_output_id = %cached.raster_output_id,
                    error = %e,
                    "linking cached raster output failed; recomputing"
                );
                return Ok(None);
            }
        }

        Ok(Some(DescriptorOutcome {
            descriptor: descriptor.clone(),
            raster_output_id: Some(cached.raster_output_id),
            status: RasterStatus::Ready,
            cached: true,
            range: Some(range),
            payload: Some(cached.payload),
            error: None,
        }))
    }

    /// Register an output and run it. Once the output exists, every error is
    /// folded into a failed outcome carrying its id, after a best-effort
    /// attempt to fail the stored output.
    async fn dispatch(
        &self,
        result_id: Uuid,
        position: usize,
        descriptor: AnalysisDescriptor,
        asset: &Asset,
        range: DateRange,
        shape: &RequestShape,
    ) -> Result<DescriptorOutcome, EngineError> {
        let output = self.tracker.register(descriptor).await?;
        let raster_output_id = output.id;

        match self
            .generate(result_id, position, &output, asset, range, shape)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(
                    raster_output_id = %raster_output_id,
                    error = %e,
                    "descriptor aborted after registration"
                );
                self.fail_best_effort(raster_output_id, &e).await;
                self.collect_if_orphaned(raster_output_id).await;

                let mut failed =
                    DescriptorOutcome::failed(output.analysis, Some(raster_output_id), e.to_string());
                failed.range = Some(range);
                Ok(failed)
            }
        }
    }

    async fn generate(
        &self,
        result_id: Uuid,
        position: usize,
        output: &RasterOutput,
        asset: &Asset,
        range: DateRange,
        shape: &RequestShape,
    ) -> Result<DescriptorOutcome, EngineError> {
        let raster_output_id = output.id;
        let descriptor = output.analysis.clone();

        let attached = self
            .store
            .attach_raster_output(result_id, raster_output_id, position)
            .await?;
        if !attached {
            let reason = "result deleted before dispatch";
            self.tracker.mark_failed(raster_output_id, reason).await?;
            self.collect_if_orphaned(raster_output_id).await;
            return Ok(DescriptorOutcome::failed(
                descriptor,
                Some(raster_output_id),
                reason.to_string(),
            ));
        }

        self.tracker.mark_generating(raster_output_id).await?;

        let job = ComputeJob {
            raster_output_id,
            descriptor: descriptor.clone(),
            asset_key: asset.key.clone(),
            asset_source: asset.source.clone(),
            range,
            filename: output.raster_filename(),
        };
        tracing::info!(
            raster_output_id = %raster_output_id,
            asset = %asset.key,
            start = %range.start,
            end = %range.end,
            "dispatching to compute service"
        );

        match self.compute.compute(&job).await {
            Ok(computed) => {
                let size = computed.size_bytes.unwrap_or(0);
                self.tracker.mark_ready(raster_output_id, size).await?;

                if self.collect_if_orphaned(raster_output_id).await {
                    return Ok(DescriptorOutcome::failed(
                        descriptor,
                        Some(raster_output_id),
                        "result deleted during generation".to_string(),
                    ));
                }

                self.store_in_cache(shape, &computed.payload, raster_output_id)
                    .await;

                Ok(DescriptorOutcome {
                    descriptor,
                    raster_output_id: Some(raster_output_id),
                    status: RasterStatus::Ready,
                    cached: false,
                    range: Some(range),
                    payload: Some(computed.payload),
                    error: None,
                })
            }
            Err(e) => {
                tracing::warn!(
                    raster_output_id = %raster_output_id,
                    transient = e.is_transient(),
                    error = %e,
                    "compute service failed"
                );
                self.tracker
                    .mark_failed(raster_output_id, &e.to_string())
                    .await?;
                self.collect_if_orphaned(raster_output_id).await;

                let mut failed =
                    DescriptorOutcome::failed(descriptor, Some(raster_output_id), e.to_string());
                failed.range = Some(range);
                Ok(failed)
            }
        }
    }

    /// A cache write failure only costs a future recompute; the output is
    /// already ready and linked.
    async fn store_in_cache(&self, shape: &RequestShape, payload: &Value, raster_output_id: Uuid) {
        let slot = match serde_json::to_value(CachedAnalysis {
            payload: payload.clone(),
            raster_output_id,
        }) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(shape_hash = %shape.hash(), error = %e, "could not encode cache entry");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .store(shape, slot, self.config.cache_ttl_hours)
            .await
        {
            tracing::warn!(
                shape_hash = %shape.hash(),
                raster_output_id = %raster_output_id,
                error = %e,
                "cache write failed; result kept"
            );
        }
    }

    async fn fail_best_effort(&self, raster_output_id: Uuid, cause: &EngineError) {
        if let Err(e) = self
            .tracker
            .mark_failed(raster_output_id, &cause.to_string())
            .await
        {
            tracing::warn!(
                raster_output_id = %raster_output_id,
                error = %e,
                "could not mark raster output failed"
            );
        }
    }

    /// Delete the output if no result links to it any more. Returns whether
    /// it is gone.
    async fn collect_if_orphaned(&self, raster_output_id: Uuid) -> bool {
        match self.tracker.delete_if_unreferenced(raster_output_id).await {
            Ok(true) => {
                tracing::info!(raster_output_id = %raster_output_id, "orphaned raster output collected");
                true
            }
            Ok(false) => false,
            Err(EngineError::RasterOutputNotFound(_)) => true,
            Err(e) => {
                tracing::warn!(
                    raster_output_id = %raster_output_id,
                    error = %e,
                    "orphaned raster output collection failed"
                );
                false
            }
        }
    }

    /// Delete a result record, then clean up after it.
    ///
    /// The combined raster file (if any) and the files of raster outputs no
    /// other result references are deleted best-effort; blob failures and
    /// already-absent files are logged, never returned. Orphans still in
    /// flight are left for the running task to collect, and an orphan that
    /// another run links to before it is collected is kept.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ResultNotFound`] for an unknown id, or
    /// [`EngineError::Store`] if the record delete itself fails.
    pub async fn delete_result(&self, id: Uuid) -> Result<DeletionReport, EngineError> {
        let removed = self
            .store
            .delete_result(id)
            .await?
            .ok_or(EngineError::ResultNotFound(id))?;

        if let Some(path) = removed.record.raster_output_path.as_deref() {
            match self.blob.delete(path).await {
                Ok(true) => tracing::debug!(result_id = %id, path = %path, "combined raster deleted"),
                Ok(false) => tracing::info!(result_id = %id, path = %path, "combined raster already absent"),
                Err(e) => tracing::warn!(
                    result_id = %id,
                    path = %path,
                    error = %e,
                    "combined raster deletion failed"
                ),
            }
        }

        let mut report = DeletionReport {
            result_id: id,
            detached_raster_output_ids: removed.record.raster_output_ids.clone(),
            ..DeletionReport::default()
        };

        for raster_output_id in removed.orphaned_raster_output_ids {
            match self.tracker.get(raster_output_id).await {
                Ok(output) if output.status.is_terminal() => {
                    match self.tracker.delete_if_unreferenced(raster_output_id).await {
                        Ok(true) => report.deleted_raster_output_ids.push(raster_output_id),
                        Ok(false) => tracing::info!(
                            raster_output_id = %raster_output_id,
                            "orphaned raster output re-linked by another result; kept"
                        ),
                        Err(EngineError::RasterOutputNotFound(_)) => {}
                        Err(e) => tracing::warn!(
                            raster_output_id = %raster_output_id,
                            error = %e,
                            "orphaned raster output deletion failed"
                        ),
                    }
                }
                Ok(output) => {
                    tracing::info!(
                        raster_output_id = %raster_output_id,
                        status = %output.status,
                        "orphaned raster output still in flight; deletion deferred"
                    );
                    report.deferred_raster_output_ids.push(raster_output_id);
                }
                Err(EngineError::RasterOutputNotFound(_)) => {}
                Err(e) => tracing::warn!(
                    raster_output_id = %raster_output_id,
                    error = %e,
                    "could not load orphaned raster output"
                ),
            }
        }

        tracing::info!(
            result_id = %id,
            deleted = report.deleted_raster_output_ids.len(),
            deferred = report.deferred_raster_output_ids.len(),
            "result deleted"
        );
        Ok(report)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::ResultNotFound`] for an unknown id.
    pub async fn get_result(&self, id: Uuid) -> Result<ResultRecord, EngineError> {
        self.store
            .result(id)
            .await?
            .ok_or(EngineError::ResultNotFound(id))
    }

    /// Results owned by `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the query fails.
    pub async fn list_results(&self, owner: &str) -> Result<Vec<ResultRecord>, EngineError> {
        Ok(self.store.results_for_owner(owner).await?)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::RasterOutputNotFound`] for an unknown id.
    pub async fn get_raster_output(&self, id: Uuid) -> Result<RasterOutput, EngineError> {
        self.tracker.get(id).await
    }

    /// The result's `ready` outputs in descriptor order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ResultNotFound`] for an unknown id.
    pub async fn ready_outputs(&self, result_id: Uuid) -> Result<Vec<RasterOutput>, EngineError> {
        let record = self.get_result(result_id).await?;
        let mut ready = Vec::with_capacity(record.raster_output_ids.len());
        for id in record.raster_output_ids {
            match self.tracker.get(id).await {
                Ok(output) if output.status == RasterStatus::Ready => ready.push(output),
                Ok(_) | Err(EngineError::RasterOutputNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ready)
    }

    /// The live cached payload for a single descriptor, if any.
    ///
    /// # Errors
    ///
    /// Returns the descriptor's resolution error (unknown variable, no
    /// coverage) or [`EngineError::Store`].
    pub async fn cached_payload(
        &self,
        descriptor: &AnalysisDescriptor,
    ) -> Result<Option<Value>, EngineError> {
        let (asset, range) = self.resolve(descriptor).await?;
        let shape = RequestShape::from_serializable(&CacheKey {
            descriptor,
            asset: &asset.key,
            range: &range,
        })?;
        Ok(self
            .cache
            .lookup(&shape)
            .await?
            .and_then(|value| serde_json::from_value::<CachedAnalysis>(value).ok())
            .map(|cached| cached.payload))
    }

    /// Record (or clear) the blob path of a result's combined raster.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ResultNotFound`] for an unknown id.
    pub async fn set_combined_raster(
        &self,
        result_id: Uuid,
        path: Option<&str>,
    ) -> Result<(), EngineError> {
        if self.store.set_result_raster_path(result_id, path).await? {
            Ok(())
        } else {
            Err(EngineError::ResultNotFound(result_id))
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
