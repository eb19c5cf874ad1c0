//! Domain types shared by every crate in the analysis pipeline.
//!
//! Holds the asset registry model, the comparison-request expansion and
//! raster naming rules, raster output lifecycle states, result records,
//! cache entries, and environment configuration.

pub mod analysis;
pub mod app_config;
pub mod assets;
pub mod cache;
pub mod config;
pub mod raster;
pub mod results;

use thiserror::Error;

pub use analysis::{
    derive_filename, expand, AnalysisDescriptor, ComparisonPeriod, ComparisonRequest, DateRange,
    Period, RequestError, TemporalResolution,
};
pub use app_config::{AppConfig, Environment};
pub use assets::{load_assets, Asset, AssetMetadata, AssetType, AssetsFile, CoverageError};
pub use cache::{CacheEntry, RequestShape, DEFAULT_TTL_HOURS};
pub use config::{load_app_config, load_app_config_from_env};
pub use raster::{RasterOutput, RasterStatus, StatusLogEntry};
pub use results::ResultRecord;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read assets file {path}: {source}")]
    AssetsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse assets file: {0}")]
    AssetsFileParse(#[from] serde_yaml::Error),

    #[error("assets validation failed: {0}")]
    Validation(String),
}
