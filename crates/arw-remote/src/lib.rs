//! HTTP adapters for the services the analysis pipeline depends on.
//!
//! [`HttpComputeClient`] implements [`arw_engine::ComputeService`] and
//! [`HttpBlobClient`] implements [`arw_engine::BlobStore`]. Both retry
//! transient failures with exponential back-off.

pub mod blob;
pub mod compute;
pub mod error;
mod retry;
pub mod settings;

pub use blob::{DisabledBlobStore, HttpBlobClient};
pub use compute::HttpComputeClient;
pub use error::RemoteError;
pub use settings::ClientSettings;
