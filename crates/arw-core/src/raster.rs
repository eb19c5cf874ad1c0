use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{derive_filename, AnalysisDescriptor, RequestError};

/// Lifecycle of a generated raster artifact.
///
/// `pending -> generating -> {ready, failed}`; a pending output may also fail
/// before it is ever dispatched. `ready` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl RasterStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RasterStatus::Pending => "pending",
            RasterStatus::Generating => "generating",
            RasterStatus::Ready => "ready",
            RasterStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RasterStatus::Ready | RasterStatus::Failed)
    }

    /// States from which a transition into `self` is legal.
    #[must_use]
    pub fn allowed_predecessors(self) -> &'static [RasterStatus] {
        match self {
            RasterStatus::Pending => &[],
            RasterStatus::Generating => &[RasterStatus::Pending],
            RasterStatus::Ready => &[RasterStatus::Generating],
            RasterStatus::Failed => &[RasterStatus::Pending, RasterStatus::Generating],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: RasterStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

impl std::fmt::Display for RasterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RasterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RasterStatus::Pending),
            "generating" => Ok(RasterStatus::Generating),
            "ready" => Ok(RasterStatus::Ready),
            "failed" => Ok(RasterStatus::Failed),
            other => Err(format!("unknown raster status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub at: DateTime<Utc>,
    pub status: RasterStatus,
    pub message: String,
}

impl StatusLogEntry {
    #[must_use]
    pub fn new(at: DateTime<Utc>, status: RasterStatus, message: impl Into<String>) -> Self {
        Self {
            at,
            status,
            message: message.into(),
        }
    }
}

/// One generated raster artifact and its lifecycle history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterOutput {
    pub id: Uuid,
    pub name: String,
    /// Bytes; stays `0` until the artifact is ready.
    pub size: i64,
    pub status: RasterStatus,
    pub generate_start_time: Option<DateTime<Utc>>,
    pub generate_end_time: Option<DateTime<Utc>>,
    pub status_logs: Vec<StatusLogEntry>,
    pub analysis: AnalysisDescriptor,
    pub created_at: DateTime<Utc>,
}

impl RasterOutput {
    /// A fresh `pending` output named after `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the descriptor cannot be named.
    pub fn pending(descriptor: AnalysisDescriptor, now: DateTime<Utc>) -> Result<Self, RequestError> {
        let name = derive_filename(&descriptor)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            size: 0,
            status: RasterStatus::Pending,
            generate_start_time: None,
            generate_end_time: None,
            status_logs: vec![StatusLogEntry::new(now, RasterStatus::Pending, "registered")],
            analysis: descriptor,
            created_at: now,
        })
    }

    /// Name of the generated file in the blob store.
    #[must_use]
    pub fn raster_filename(&self) -> String {
        format!("{}.tif", self.id)
    }

    /// Name passed to the blob store when the output is deleted.
    ///
    /// Uses `.tiff` while generated files use `.tif`; the two only agree if the
    /// blob store normalises extensions.
    #[must_use]
    pub fn deletion_filename(id: Uuid) -> String {
        format!("{id}.tiff")
    }
}
