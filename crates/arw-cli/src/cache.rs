//! Result cache maintenance commands.

use std::sync::Arc;

use arw_engine::{PgStore, ResultCache, SystemClock};
use clap::Subcommand;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Sub-commands available under `cache`.
#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// Delete every expired cache entry once
    Purge,
    /// Purge expired entries on a cron schedule until interrupted
    Schedule {
        /// Six-field cron expression (seconds first), UTC
        #[arg(long, default_value = "0 0 * * * *")]
        cron: String,
    },
}

pub(crate) async fn run(pool: PgPool, command: CacheCommands) -> anyhow::Result<()> {
    let cache = Arc::new(ResultCache::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(SystemClock),
    ));
    match command {
        CacheCommands::Purge => {
            let removed = cache.purge_expired().await?;
            println!("purged {removed} expired cache entries");
        }
        CacheCommands::Schedule { cron } => run_schedule(cache, &cron).await?,
    }
    Ok(())
}

async fn run_schedule(cache: Arc<ResultCache<PgStore>>, cron: &str) -> anyhow::Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let cache = Arc::clone(&cache);
        Box::pin(async move {
            match cache.purge_expired().await {
                Ok(removed) => tracing::info!(removed, "scheduler: cache purge complete"),
                Err(e) => tracing::error!(error = %e, "scheduler: cache purge failed"),
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!(cron, "cache purge scheduled; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal, stopping scheduler");
    scheduler.shutdown().await?;
    Ok(())
}
