use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A computed analysis run owned by a user, or by nobody for system runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: Uuid,
    pub owner: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub source: Option<String>,
    /// Blob path of a combined raster covering every period of the run.
    pub raster_output_path: Option<String>,
    /// Linked raster outputs in descriptor order.
    pub raster_output_ids: Vec<Uuid>,
}

impl ResultRecord {
    #[must_use]
    pub fn new(owner: Option<String>, source: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            payload: None,
            created_at: now,
            source,
            raster_output_path: None,
            raster_output_ids: Vec::new(),
        }
    }
}
