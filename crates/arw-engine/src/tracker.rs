//! Lifecycle tracking for generated raster artifacts.
//!
//! Status changes are linearizable per output: the store applies each
//! transition as a compare-and-set against the legal predecessor states, so
//! of two concurrent writers on one id at most one succeeds and the other
//! gets [`EngineError::InvalidTransition`].

use std::sync::Arc;

use arw_core::{
    AnalysisDescriptor, ComparisonRequest, RasterOutput, RasterStatus, StatusLogEntry,
};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::ports::BlobStore;
use crate::store::{OrphanDeletion, RasterStore, RasterTransition, TransitionOutcome};

pub struct RasterOutputTracker<S> {
    store: Arc<S>,
    blob: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl<S: RasterStore> RasterOutputTracker<S> {
    pub fn new(store: Arc<S>, blob: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, blob, clock }
    }

    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the descriptor lacks the
    /// month or quarter its resolution needs.
    pub fn derive_filename(&self, descriptor: &AnalysisDescriptor) -> Result<String, EngineError> {
        Ok(arw_core::derive_filename(descriptor)?)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] for mismatched comparison
    /// arrays or an invalid period.
    pub fn expand(&self, request: &ComparisonRequest) -> Result<Vec<AnalysisDescriptor>, EngineError> {
        Ok(arw_core::expand(request)?)
    }

    /// Create and persist a `pending` output for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the descriptor cannot be
    /// named, or [`EngineError::Store`] if the insert fails.
    pub async fn register(&self, descriptor: AnalysisDescriptor) -> Result<RasterOutput, EngineError> {
        let output = RasterOutput::pending(descriptor, self.clock.now())?;
        self.store.insert_raster_output(&output).await?;
        tracing::debug!(raster_output_id = %output.id, name = %output.name, "raster output registered");
        Ok(output)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::RasterOutputNotFound`] for an unknown id.
    pub async fn get(&self, id: Uuid) -> Result<RasterOutput, EngineError> {
        self.store
            .raster_output(id)
            .await?
            .ok_or(EngineError::RasterOutputNotFound(id))
    }

    /// `pending -> generating`; records the generation start time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the output is pending.
    pub async fn mark_generating(&self, id: Uuid) -> Result<RasterOutput, EngineError> {
        let now = self.clock.now();
        self.transition(
            id,
            RasterTransition {
                to: RasterStatus::Generating,
                log_entry: StatusLogEntry::new(now, RasterStatus::Generating, "generation started"),
                size: None,
                generate_start_time: Some(now),
                generate_end_time: None,
            },
        )
        .await
    }

    /// `generating -> ready`; records the artifact size and end time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the output is generating.
    pub async fn mark_ready(&self, id: Uuid, size: i64) -> Result<RasterOutput, EngineError> {
        let now = self.clock.now();
        self.transition(
            id,
            RasterTransition {
                to: RasterStatus::Ready,
                log_entry: StatusLogEntry::new(
                    now,
                    RasterStatus::Ready,
                    format!("generated ({size} bytes)"),
                ),
                size: Some(size),
                generate_start_time: None,
                generate_end_time: Some(now),
            },
        )
        .await
    }

    /// `pending | generating -> failed`, keeping `reason` in the log.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] if the output is already
    /// terminal.
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<RasterOutput, EngineError> {
        let now = self.clock.now();
        self.transition(
            id,
            RasterTransition {
                to: RasterStatus::Failed,
                log_entry: StatusLogEntry::new(now, RasterStatus::Failed, reason),
                size: None,
                generate_start_time: None,
                generate_end_time: Some(now),
            },
        )
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: RasterTransition,
    ) -> Result<RasterOutput, EngineError> {
        let to = transition.to;
        match self.store.transition_raster_output(id, &transition).await? {
            TransitionOutcome::Applied(output) => {
                tracing::debug!(raster_output_id = %id, status = %to, "raster output transitioned");
                Ok(output)
            }
            TransitionOutcome::NotFound => Err(EngineError::RasterOutputNotFound(id)),
            TransitionOutcome::Rejected { current } => Err(EngineError::InvalidTransition {
                id,
                from: current,
                to,
            }),
        }
    }

    /// Remove the tracking record, then ask the blob store to delete the
    /// backing file. The blob call is best-effort: an absent file or a blob
    /// store failure is logged and does not fail the delete.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RasterOutputNotFound`] if there is no such
    /// record, or [`EngineError::Store`] if the record delete fails.
    pub async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        if !self.store.delete_raster_output(id).await? {
            return Err(EngineError::RasterOutputNotFound(id));
        }
        self.delete_file(id).await;
        Ok(())
    }

    /// Like [`delete`](Self::delete), but only if no result links to the
    /// output at the moment of deletion. Returns `Ok(false)` and leaves both
    /// the record and the file alone when the output is referenced.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RasterOutputNotFound`] if there is no such
    /// record, or [`EngineError::Store`] if the record delete fails.
    pub async fn delete_if_unreferenced(&self, id: Uuid) -> Result<bool, EngineError> {
        match self.store.delete_unreferenced_raster_output(id).await? {
            OrphanDeletion::Deleted => {
                self.delete_file(id).await;
                Ok(true)
            }
            OrphanDeletion::Referenced => {
                tracing::debug!(raster_output_id = %id, "raster output still linked; kept");
                Ok(false)
            }
            OrphanDeletion::NotFound => Err(EngineError::RasterOutputNotFound(id)),
        }
    }

    async fn delete_file(&self, id: Uuid) {
        let filename = RasterOutput::deletion_filename(id);
        match self.blob.delete(&filename).await {
            Ok(true) => {
                tracing::debug!(raster_output_id = %id, filename = %filename, "raster file deleted");
            }
            Ok(false) => {
                tracing::info!(
                    raster_output_id = %id,
                    filename = %filename,
                    "raster file already absent from blob store"
                );
            }
            Err(e) => {
                tracing::warn!(
                    raster_output_id = %id,
                    filename = %filename,
                    error = %e,
                    "raster file deletion failed; record removed anyway"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, ResultStore};
    use crate::test_support::{descriptor, RecordingBlobStore};

    struct Fixture {
        tracker: RasterOutputTracker<MemoryStore>,
        store: Arc<MemoryStore>,
        blob: Arc<RecordingBlobStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(blob: RecordingBlobStore) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let blob = Arc::new(blob);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 12, 6, 0, 0).unwrap(),
        ));
        let tracker = RasterOutputTracker::new(Arc::clone(&store), blob.clone(), clock.clone());
        Fixture {
            tracker,
            store,
            blob,
            clock,
        }
    }

    #[tokio::test]
    async fn full_lifecycle_appends_history() {
        let f = fixture(RecordingBlobStore::default());
        let output = f.tracker.register(descriptor(2024)).await.unwrap();
        assert_eq!(output.status, RasterStatus::Pending);

        let generating = f.tracker.mark_generating(output.id).await.unwrap();
        assert_eq!(generating.generate_start_time, Some(f.clock.now()));

        f.clock.advance(Duration::seconds(90));
        let ready = f.tracker.mark_ready(output.id, 4096).await.unwrap();
        assert_eq!(ready.status, RasterStatus::Ready);
        assert_eq!(ready.size, 4096);
        assert_eq!(ready.generate_end_time, Some(f.clock.now()));

        let statuses: Vec<RasterStatus> = ready.status_logs.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![RasterStatus::Pending, RasterStatus::Generating, RasterStatus::Ready]
        );
    }

    #[tokio::test]
    async fn terminal_outputs_reject_further_transitions() {
        let f = fixture(RecordingBlobStore::default());
        let output = f.tracker.register(descriptor(2023)).await.unwrap();
        f.tracker.mark_failed(output.id, "no coverage").await.unwrap();

        let err = f.tracker.mark_generating(output.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: RasterStatus::Failed,
                to: RasterStatus::Generating,
                ..
            }
        ));
        assert!(f.tracker.mark_ready(output.id, 1).await.is_err());
        assert!(f.tracker.mark_failed(output.id, "again").await.is_err());

        let stored = f.tracker.get(output.id).await.unwrap();
        assert_eq!(stored.status, RasterStatus::Failed);
        assert_eq!(stored.status_logs.len(), 2);
        assert_eq!(stored.status_logs[1].message, "no coverage");
    }

    #[tokio::test]
    async fn ready_requires_generating_first() {
        let f = fixture(RecordingBlobStore::default());
        let output = f.tracker.register(descriptor(2022)).await.unwrap();
        assert!(matches!(
            f.tracker.mark_ready(output.id, 10).await,
            Err(EngineError::InvalidTransition {
                from: RasterStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn concurrent_terminal_transitions_have_one_winner() {
        let f = fixture(RecordingBlobStore::default());
        let output = f.tracker.register(descriptor(2021)).await.unwrap();
        f.tracker.mark_generating(output.id).await.unwrap();

        let (ready, failed) = tokio::join!(
            f.tracker.mark_ready(output.id, 5),
            f.tracker.mark_failed(output.id, "timeout")
        );
        assert!(ready.is_ok() ^ failed.is_ok());

        let stored = f.tracker.get(output.id).await.unwrap();
        assert_eq!(stored.status_logs.len(), 3);
    }

    #[tokio::test]
    async fn delete_targets_the_tiff_name() {
        let f = fixture(RecordingBlobStore::default());
        let output = f.tracker.register(descriptor(2020)).await.unwrap();

        f.tracker.delete(output.id).await.unwrap();

        assert_eq!(f.blob.deleted(), vec![format!("{}.tiff", output.id)]);
        assert_ne!(f.blob.deleted()[0], output.raster_filename());
        assert_eq!(f.store.raster_output_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_file_and_blob_failures() {
        let absent = fixture(RecordingBlobStore::absent());
        let output = absent.tracker.register(descriptor(2019)).await.unwrap();
        absent.tracker.delete(output.id).await.unwrap();

        let failing = fixture(RecordingBlobStore::failing());
        let output = failing.tracker.register(descriptor(2019)).await.unwrap();
        failing.tracker.delete(output.id).await.unwrap();
        assert_eq!(failing.store.raster_output_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_of_unknown_output_is_not_found() {
        let f = fixture(RecordingBlobStore::default());
        assert!(matches!(
            f.tracker.delete(Uuid::new_v4()).await,
            Err(EngineError::RasterOutputNotFound(_))
        ));
        assert!(f.blob.deleted().is_empty());
    }

    #[tokio::test]
    async fn unreferenced_delete_spares_linked_outputs() {
        let f = fixture(RecordingBlobStore::default());
        let output = f.tracker.register(descriptor(2018)).await.unwrap();
        let record = arw_core::ResultRecord::new(None, None, f.clock.now());
        f.store.insert_result(&record).await.unwrap();
        assert!(f.store.attach_raster_output(record.id, output.id, 0).await.unwrap());

        assert!(!f.tracker.delete_if_unreferenced(output.id).await.unwrap());
        assert!(f.tracker.get(output.id).await.is_ok());
        assert!(f.blob.deleted().is_empty());

        f.store.delete_result(record.id).await.unwrap();
        assert!(f.tracker.delete_if_unreferenced(output.id).await.unwrap());
        assert_eq!(f.blob.deleted(), vec![format!("{}.tiff", output.id)]);
        assert!(matches!(
            f.tracker.delete_if_unreferenced(output.id).await,
            Err(EngineError::RasterOutputNotFound(_))
        ));
    }
}
