use chrono::{Duration, TimeZone, Utc};

use super::*;
use crate::clock::ManualClock;
use crate::error::ComputeError;
use std::sync::atomic::Ordering;

use crate::store::{MemoryStore, RasterStore, ResultStore};
use crate::test_support::{
    asset, date, yearly_request, FaultyStore, RecordingBlobStore, ScriptedCompute,
};

struct Fixture {
    orchestrator: Arc<AnalysisOrchestrator<MemoryStore>>,
    store: Arc<MemoryStore>,
    compute: Arc<ScriptedCompute>,
    blob: Arc<RecordingBlobStore>,
    clock: Arc<ManualClock>,
}

fn fixture_with(
    compute: ScriptedCompute,
    blob: RecordingBlobStore,
    config: OrchestratorConfig,
) -> Fixture {
    let store = Arc::new(MemoryStore::with_assets([asset(
        "landsat_ndvi",
        date(2010, 1, 1),
        date(2022, 7, 1),
        &["NDVI", "EVI"],
    )]));
    let compute = Arc::new(compute);
    let blob = Arc::new(blob);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 12, 6, 0, 0).unwrap(),
    ));
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        Arc::clone(&store),
        compute.clone(),
        blob.clone(),
        clock.clone(),
        config,
    ));
    Fixture {
        orchestrator,
        store,
        compute,
        blob,
        clock,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        ScriptedCompute::default(),
        RecordingBlobStore::default(),
        OrchestratorConfig::default(),
    )
}

fn payload_of(record: &ResultRecord) -> AnalysisPayload {
    serde_json::from_value(record.payload.clone().expect("payload written")).unwrap()
}

#[tokio::test]
async fn run_links_outputs_in_descriptor_order() {
    let f = fixture();
    let record = f
        .orchestrator
        .run_analysis(&yearly_request(2020, &[2016, 2018]), Some("analyst".to_string()), None)
        .await
        .unwrap();

    let payload = payload_of(&record);
    let years: Vec<i32> = payload.results.iter().map(|o| o.descriptor.year).collect();
    assert_eq!(years, vec![2020, 2016, 2018]);
    assert!(payload
        .results
        .iter()
        .all(|o| o.status == RasterStatus::Ready && !o.cached));

    let linked: Vec<Uuid> = payload
        .results
        .iter()
        .map(|o| o.raster_output_id.unwrap())
        .collect();
    assert_eq!(record.raster_output_ids, linked);
    assert_eq!(record.owner.as_deref(), Some("analyst"));

    for id in &record.raster_output_ids {
        let output = f.orchestrator.get_raster_output(*id).await.unwrap();
        assert_eq!(output.status, RasterStatus::Ready);
        assert_eq!(output.size, 1024);
    }
    assert_eq!(f.compute.jobs().len(), 3);
}

#[tokio::test]
async fn partially_covered_periods_are_clamped_and_uncovered_ones_fail_alone() {
    let f = fixture();
    let record = f
        .orchestrator
        .run_analysis(&yearly_request(2021, &[2005, 2022]), None, None)
        .await
        .unwrap();
    let payload = payload_of(&record);

    assert_eq!(payload.results[0].status, RasterStatus::Ready);

    let uncovered = &payload.results[1];
    assert_eq!(uncovered.status, RasterStatus::Failed);
    assert!(uncovered
        .error
        .as_deref()
        .unwrap()
        .contains("outside the coverage window"));
    let failed_output = f
        .orchestrator
        .get_raster_output(uncovered.raster_output_id.unwrap())
        .await
        .unwrap();
    assert_eq!(failed_output.status, RasterStatus::Failed);
    assert!(failed_output.generate_start_time.is_none());

    let clamped = &payload.results[2];
    assert_eq!(clamped.status, RasterStatus::Ready);
    assert_eq!(
        clamped.range,
        Some(DateRange {
            start: date(2022, 1, 1),
            end: date(2022, 7, 1)
        })
    );

    let dispatched: Vec<i32> = f.compute.jobs().iter().map(|j| j.descriptor.year).collect();
    assert!(!dispatched.contains(&2005));
    assert_eq!(record.raster_output_ids.len(), 3);
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let f = fixture();
    let request = yearly_request(2020, &[2019]);

    let first = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let second = f.orchestrator.run_analysis(&request, None, None).await.unwrap();

    assert_eq!(f.compute.jobs().len(), 2);
    assert_eq!(first.raster_output_ids, second.raster_output_ids);
    let payload = payload_of(&second);
    assert!(payload.results.iter().all(|o| o.cached));
    assert_eq!(payload.results[0].payload, payload_of(&first).results[0].payload);

    let cached = f
        .orchestrator
        .cached_payload(&payload.results[1].descriptor)
        .await
        .unwrap();
    assert_eq!(cached, payload.results[1].payload);
}

#[tokio::test]
async fn expired_cache_entries_trigger_recompute() {
    let f = fixture_with(
        ScriptedCompute::default(),
        RecordingBlobStore::default(),
        OrchestratorConfig {
            cache_ttl_hours: Some(2),
            max_concurrent_descriptors: 2,
        },
    );
    let request = yearly_request(2020, &[]);

    f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    f.clock.advance(Duration::minutes(119));
    f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    assert_eq!(f.compute.jobs().len(), 1);

    f.clock.advance(Duration::minutes(1));
    let third = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    assert_eq!(f.compute.jobs().len(), 2);
    assert!(!payload_of(&third).results[0].cached);
}

#[tokio::test]
async fn compute_failures_are_isolated_and_not_cached() {
    let f = fixture();
    f.compute
        .fail_year(2017, ComputeError::Permanent("band missing".to_string()));
    let request = yearly_request(2020, &[2017, 2018]);

    let record = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let statuses: Vec<RasterStatus> = payload_of(&record)
        .results
        .iter()
        .map(|o| o.status)
        .collect();
    assert_eq!(
        statuses,
        vec![RasterStatus::Ready, RasterStatus::Failed, RasterStatus::Ready]
    );

    let failed = f
        .orchestrator
        .get_raster_output(record.raster_output_ids[1])
        .await
        .unwrap();
    let last_log = failed.status_logs.last().unwrap();
    assert_eq!(last_log.status, RasterStatus::Failed);
    assert!(last_log.message.contains("band missing"));

    let ready = f.orchestrator.ready_outputs(record.id).await.unwrap();
    assert_eq!(ready.len(), 2);

    f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    assert_eq!(f.compute.jobs().len(), 4);
}

#[tokio::test]
async fn unknown_variable_fails_every_descriptor_without_aborting() {
    let f = fixture();
    let mut request = yearly_request(2020, &[2019]);
    request.variable = "Rainfall".to_string();

    let record = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let payload = payload_of(&record);
    assert_eq!(payload.results.len(), 2);
    assert!(payload
        .results
        .iter()
        .all(|o| o.status == RasterStatus::Failed && o.error.is_some()));
    assert!(f.compute.jobs().is_empty());
}

#[tokio::test]
async fn invalid_request_is_rejected_before_anything_is_stored() {
    let f = fixture();
    let mut request = yearly_request(2020, &[2018, 2019]);
    request.comparison_period.month = Some(vec![Some(1)]);

    let err = f
        .orchestrator
        .run_analysis(&request, Some("analyst".to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert!(f.orchestrator.list_results("analyst").await.unwrap().is_empty());
    assert_eq!(f.store.raster_output_count().unwrap(), 0);
}

#[tokio::test]
async fn deleting_a_result_whose_files_are_absent_succeeds() {
    let f = fixture_with(
        ScriptedCompute::default(),
        RecordingBlobStore::absent(),
        OrchestratorConfig::default(),
    );
    let record = f
        .orchestrator
        .run_analysis(&yearly_request(2020, &[2019]), None, None)
        .await
        .unwrap();

    let report = f.orchestrator.delete_result(record.id).await.unwrap();

    assert_eq!(report.deleted_raster_output_ids, record.raster_output_ids);
    assert!(report.deferred_raster_output_ids.is_empty());
    assert_eq!(f.store.raster_output_count().unwrap(), 0);
    let expected: Vec<String> = record
        .raster_output_ids
        .iter()
        .map(|id| format!("{id}.tiff"))
        .collect();
    assert_eq!(f.blob.deleted(), expected);
    assert!(matches!(
        f.orchestrator.get_result(record.id).await,
        Err(EngineError::ResultNotFound(_))
    ));
}

#[tokio::test]
async fn shared_outputs_survive_until_their_last_result_is_deleted() {
    let f = fixture();
    let request = yearly_request(2020, &[]);
    let first = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let second = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let shared = first.raster_output_ids[0];
    assert_eq!(second.raster_output_ids, vec![shared]);

    let report = f.orchestrator.delete_result(first.id).await.unwrap();
    assert_eq!(report.detached_raster_output_ids, vec![shared]);
    assert!(report.deleted_raster_output_ids.is_empty());
    assert!(f.blob.deleted().is_empty());
    assert_eq!(f.store.raster_output_link_count(shared).await.unwrap(), 1);

    let report = f.orchestrator.delete_result(second.id).await.unwrap();
    assert_eq!(report.deleted_raster_output_ids, vec![shared]);
    assert_eq!(f.blob.deleted(), vec![format!("{shared}.tiff")]);
}

#[tokio::test]
async fn combined_raster_deletion_failure_is_swallowed() {
    let f = fixture_with(
        ScriptedCompute::default(),
        RecordingBlobStore::failing(),
        OrchestratorConfig::default(),
    );
    let record = f
        .orchestrator
        .run_analysis(&yearly_request(2020, &[]), None, None)
        .await
        .unwrap();
    f.orchestrator
        .set_combined_raster(record.id, Some("combined/north_block_2020.tif"))
        .await
        .unwrap();

    let report = f.orchestrator.delete_result(record.id).await.unwrap();

    assert_eq!(report.deleted_raster_output_ids.len(), 1);
    assert!(f
        .blob
        .deleted()
        .contains(&"combined/north_block_2020.tif".to_string()));
    assert_eq!(f.store.raster_output_count().unwrap(), 0);
}

#[tokio::test]
async fn deleting_mid_generation_defers_then_collects_the_output() {
    let f = fixture_with(
        ScriptedCompute::paused(),
        RecordingBlobStore::absent(),
        OrchestratorConfig::default(),
    );

    let handle = f.orchestrator.spawn_analysis(
        yearly_request(2020, &[]),
        Some("canceller".to_string()),
        None,
    );
    f.compute.entered.notified().await;

    let results = f.orchestrator.list_results("canceller").await.unwrap();
    assert_eq!(results.len(), 1);
    let in_flight = results[0].raster_output_ids[0];
    assert_eq!(
        f.orchestrator.get_raster_output(in_flight).await.unwrap().status,
        RasterStatus::Generating
    );

    let report = f.orchestrator.delete_result(results[0].id).await.unwrap();
    assert_eq!(report.deferred_raster_output_ids, vec![in_flight]);
    assert_eq!(f.store.raster_output_count().unwrap(), 1);

    f.compute.release.notify_one();
    let outcome = handle.await.unwrap();

    assert!(matches!(outcome, Err(EngineError::ResultNotFound(_))));
    assert_eq!(f.store.raster_output_count().unwrap(), 0);
    assert_eq!(f.blob.deleted(), vec![format!("{in_flight}.tiff")]);
    assert_eq!(f.store.cache_entry_count().unwrap(), 0);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let f = fixture();
    let id = Uuid::new_v4();
    assert!(matches!(
        f.orchestrator.delete_result(id).await,
        Err(EngineError::ResultNotFound(_))
    ));
    assert!(matches!(
        f.orchestrator.set_combined_raster(id, None).await,
        Err(EngineError::ResultNotFound(_))
    ));
    assert!(matches!(
        f.orchestrator.get_raster_output(id).await,
        Err(EngineError::RasterOutputNotFound(_))
    ));
}

#[tokio::test]
async fn orphan_relinked_by_a_cache_hit_is_not_collected() {
    let f = fixture();
    let request = yearly_request(2020, &[]);
    let first = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let output = first.raster_output_ids[0];

    // Unlink without collecting, as a concurrent delete would before its
    // cleanup step runs.
    let removed = f.store.delete_result(first.id).await.unwrap().unwrap();
    assert_eq!(removed.orphaned_raster_output_ids, vec![output]);

    let second = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    assert_eq!(second.raster_output_ids, vec![output]);
    assert!(payload_of(&second).results[0].cached);

    assert!(!f
        .orchestrator
        .tracker()
        .delete_if_unreferenced(output)
        .await
        .unwrap());
    assert_eq!(
        f.orchestrator.get_raster_output(output).await.unwrap().status,
        RasterStatus::Ready
    );
    assert_eq!(
        f.orchestrator.get_result(second.id).await.unwrap().raster_output_ids,
        vec![output]
    );
    assert!(f.blob.deleted().is_empty());
    assert_eq!(f.compute.jobs().len(), 1);
}

#[tokio::test]
async fn collected_cached_output_is_recomputed_for_the_next_run() {
    let f = fixture();
    let request = yearly_request(2020, &[]);
    let first = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let output = first.raster_output_ids[0];

    f.store.delete_result(first.id).await.unwrap().unwrap();
    assert!(f
        .orchestrator
        .tracker()
        .delete_if_unreferenced(output)
        .await
        .unwrap());
    assert!(!f.store.attach_raster_output(first.id, output, 0).await.unwrap());

    let second = f.orchestrator.run_analysis(&request, None, None).await.unwrap();
    let outcome = &payload_of(&second).results[0];
    assert_eq!(outcome.status, RasterStatus::Ready);
    assert!(!outcome.cached);
    assert_ne!(second.raster_output_ids, vec![output]);
    assert_eq!(f.compute.jobs().len(), 2);
}

fn faulty_fixture() -> (Arc<AnalysisOrchestrator<FaultyStore>>, Arc<FaultyStore>) {
    let store = Arc::new(FaultyStore::with_assets([asset(
        "landsat_ndvi",
        date(2010, 1, 1),
        date(2022, 7, 1),
        &["NDVI"],
    )]));
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        Arc::clone(&store),
        Arc::new(ScriptedCompute::default()),
        Arc::new(RecordingBlobStore::default()),
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 12, 6, 0, 0).unwrap(),
        )),
        OrchestratorConfig::default(),
    ));
    (orchestrator, store)
}

#[tokio::test]
async fn cache_write_failure_keeps_the_ready_outcome() {
    let (orchestrator, store) = faulty_fixture();
    store.fail_cache_writes.store(true, Ordering::SeqCst);

    let record = orchestrator
        .run_analysis(&yearly_request(2020, &[]), None, None)
        .await
        .unwrap();

    let outcome = &payload_of(&record).results[0];
    assert_eq!(outcome.status, RasterStatus::Ready);
    assert!(outcome.error.is_none());
    let id = outcome.raster_output_id.unwrap();
    assert_eq!(record.raster_output_ids, vec![id]);
    assert_eq!(
        orchestrator.get_raster_output(id).await.unwrap().status,
        RasterStatus::Ready
    );
    assert_eq!(store.inner.cache_entry_count().unwrap(), 0);
}

#[tokio::test]
async fn store_failure_after_registration_fails_the_output_it_created() {
    let (orchestrator, store) = faulty_fixture();
    store.fail_generating.store(true, Ordering::SeqCst);

    let record = orchestrator
        .run_analysis(&yearly_request(2020, &[]), None, None)
        .await
        .unwrap();

    let outcome = &payload_of(&record).results[0];
    assert_eq!(outcome.status, RasterStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("connection reset"));
    let id = outcome.raster_output_id.expect("registered output id");
    assert_eq!(record.raster_output_ids, vec![id]);

    let stored = orchestrator.get_raster_output(id).await.unwrap();
    assert_eq!(stored.status, RasterStatus::Failed);
    assert!(stored.generate_start_time.is_none());
}
