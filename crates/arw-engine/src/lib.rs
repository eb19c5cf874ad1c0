//! Analysis computation and output caching pipeline.
//!
//! [`AnalysisOrchestrator`] drives a run end to end on top of
//! [`AssetCatalog`], [`PeriodResolver`], [`ResultCache`] and
//! [`RasterOutputTracker`]. Persistence, compute and blob storage are ports
//! so the same engine runs over Postgres or fully in memory.

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod period;
pub mod ports;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use cache::ResultCache;
pub use catalog::AssetCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ComputeError, EngineError, StorageError, StoreError};
pub use orchestrator::{
    AnalysisOrchestrator, AnalysisPayload, DeletionReport, DescriptorOutcome, OrchestratorConfig,
};
pub use period::{clamp_to_asset, PeriodResolver};
pub use ports::{BlobStore, ComputeJob, ComputeOutput, ComputeService};
pub use store::{MemoryStore, PgStore, Store};
