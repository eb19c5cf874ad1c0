//! Analysis command handlers for the CLI.
//!
//! `run` drives a comparison request to completion in the foreground; the
//! remaining subcommands read or delete stored results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arw_core::{AppConfig, ComparisonRequest};
use arw_engine::{
    AnalysisOrchestrator, BlobStore, ComputeService, OrchestratorConfig, PgStore, SystemClock,
};
use arw_remote::{ClientSettings, DisabledBlobStore, HttpBlobClient, HttpComputeClient};
use clap::Subcommand;
use sqlx::PgPool;
use uuid::Uuid;

/// Sub-commands available under `analysis`.
#[derive(Debug, Subcommand)]
pub enum AnalysisCommands {
    /// Run a comparison request read from a JSON file
    Run {
        /// Path to the request JSON
        #[arg(long)]
        request: PathBuf,
        /// User the result belongs to
        #[arg(long)]
        owner: Option<String>,
        /// Free-form origin tag stored with the result
        #[arg(long)]
        source: Option<String>,
    },
    /// Print a stored result and its ready raster outputs
    Show { id: Uuid },
    /// List an owner's results, newest first
    List {
        #[arg(long)]
        owner: String,
    },
    /// Delete a result and any raster outputs no other result uses
    Delete { id: Uuid },
}

pub(crate) async fn run(
    pool: PgPool,
    config: &AppConfig,
    command: AnalysisCommands,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(pool, config)?;
    match command {
        AnalysisCommands::Run {
            request,
            owner,
            source,
        } => {
            let request = read_request(&request)?;
            let record = orchestrator.run_analysis(&request, owner, source).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        AnalysisCommands::Show { id } => {
            let record = orchestrator.get_result(id).await?;
            let ready = orchestrator.ready_outputs(id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("ready raster outputs: {}", ready.len());
            for output in &ready {
                println!("  {}  {}  {} bytes", output.id, output.name, output.size);
            }
        }
        AnalysisCommands::List { owner } => {
            let records = orchestrator.list_results(&owner).await?;
            if records.is_empty() {
                println!("no results for {owner}");
            }
            for record in &records {
                println!(
                    "{}  {}  {} raster outputs",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.raster_output_ids.len()
                );
            }
        }
        AnalysisCommands::Delete { id } => {
            let report = orchestrator.delete_result(id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn read_request(path: &Path) -> anyhow::Result<ComparisonRequest> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("invalid comparison request in {}: {e}", path.display()))
}

/// Wire the orchestrator to Postgres and the configured remote services.
///
/// Read-only subcommands work without a compute service; `run` fails on the
/// first dispatch if `ARW_COMPUTE_URL` is unset.
pub(crate) fn build_orchestrator(
    pool: PgPool,
    config: &AppConfig,
) -> anyhow::Result<AnalysisOrchestrator<PgStore>> {
    let compute: Arc<dyn ComputeService> = match ClientSettings::compute_from_app_config(config) {
        Some(settings) => Arc::new(
            HttpComputeClient::new(&settings)
                .map_err(|e| anyhow::anyhow!("failed to build compute client: {e}"))?,
        ),
        None => Arc::new(UnconfiguredCompute),
    };

    let blob: Arc<dyn BlobStore> = match ClientSettings::blob_from_app_config(config) {
        Some(settings) => Arc::new(
            HttpBlobClient::new(&settings)
                .map_err(|e| anyhow::anyhow!("failed to build blob client: {e}"))?,
        ),
        None => {
            tracing::warn!("ARW_BLOB_URL is not set; raster files will not be deleted");
            Arc::new(DisabledBlobStore)
        }
    };

    Ok(AnalysisOrchestrator::new(
        Arc::new(PgStore::new(pool)),
        compute,
        blob,
        Arc::new(SystemClock),
        OrchestratorConfig::from_app_config(config),
    ))
}

struct UnconfiguredCompute;

#[async_trait::async_trait]
impl ComputeService for UnconfiguredCompute {
    async fn compute(
        &self,
        _job: &arw_engine::ComputeJob,
    ) -> Result<arw_engine::ComputeOutput, arw_engine::ComputeError> {
        Err(arw_engine::ComputeError::Permanent(
            "ARW_COMPUTE_URL is not set".to_string(),
        ))
    }
}
