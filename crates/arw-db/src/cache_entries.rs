//! Database operations for `analysis_results_cache`.

use arw_core::CacheEntry;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `analysis_results_cache` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheEntryRow {
    pub id: i64,
    pub shape_hash: String,
    pub analysis_inputs: serde_json::Value,
    /// Nullable in the schema; a stored `null` payload reads back as `None`.
    pub analysis_results: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<CacheEntryRow> for CacheEntry {
    fn from(row: CacheEntryRow) -> Self {
        Self {
            shape_hash: row.shape_hash,
            inputs: row.analysis_inputs,
            payload: row.analysis_results.unwrap_or(serde_json::Value::Null),
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

const CACHE_COLUMNS: &str =
    "id, shape_hash, analysis_inputs, analysis_results, created_at, expires_at";

/// Writes a cache entry keyed by `shape_hash`.
///
/// An existing entry for the same hash is overwritten in place, so concurrent
/// writers resolve to whichever commits last.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_cache_entry(pool: &PgPool, entry: &CacheEntry) -> Result<CacheEntryRow, DbError> {
    let row = sqlx::query_as::<_, CacheEntryRow>(&format!(
        "INSERT INTO analysis_results_cache \
             (shape_hash, analysis_inputs, analysis_results, created_at, expires_at) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (shape_hash) DO UPDATE SET \
             analysis_inputs = EXCLUDED.analysis_inputs, \
             analysis_results = EXCLUDED.analysis_results, \
             created_at = EXCLUDED.created_at, \
             expires_at = EXCLUDED.expires_at \
         RETURNING {CACHE_COLUMNS}"
    ))
    .bind(&entry.shape_hash)
    .bind(&entry.inputs)
    .bind(&entry.payload)
    .bind(entry.created_at)
    .bind(entry.expires_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches the entry for `shape_hash`, live or expired. Callers decide
/// liveness against their own clock.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_cache_entry(
    pool: &PgPool,
    shape_hash: &str,
) -> Result<Option<CacheEntryRow>, DbError> {
    let row = sqlx::query_as::<_, CacheEntryRow>(&format!(
        "SELECT {CACHE_COLUMNS} FROM analysis_results_cache WHERE shape_hash = $1"
    ))
    .bind(shape_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Deletes every entry whose `expires_at` is at or before `now`.
///
/// Returns the number of rows removed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_expired_cache_entries(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM analysis_results_cache WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_payload_maps_to_json_null() {
        let now = Utc::now();
        let entry: CacheEntry = CacheEntryRow {
            id: 3,
            shape_hash: "ab".repeat(32),
            analysis_inputs: json!({"year": 2024}),
            analysis_results: None,
            created_at: now,
            expires_at: now,
        }
        .into();

        assert_eq!(entry.payload, serde_json::Value::Null);
        assert_eq!(entry.inputs, json!({"year": 2024}));
        assert_eq!(entry.shape_hash.len(), 64);
    }
}
