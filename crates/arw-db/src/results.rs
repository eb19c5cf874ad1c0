//! Database operations for `user_analysis_results` and the ordered
//! `user_analysis_result_raster_outputs` link table.

use arw_core::ResultRecord;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `user_analysis_results` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResultRow {
    pub id: Uuid,
    pub created_by: Option<String>,
    pub analysis_results: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub source: Option<String>,
    pub raster_output_path: Option<String>,
}

impl ResultRow {
    /// Combine the row with its linked raster output ids (in position order).
    #[must_use]
    pub fn into_record(self, raster_output_ids: Vec<Uuid>) -> ResultRecord {
        ResultRecord {
            id: self.id,
            owner: self.created_by,
            payload: self.analysis_results,
            created_at: self.created_at,
            source: self.source,
            raster_output_path: self.raster_output_path,
            raster_output_ids,
        }
    }
}

/// Outcome of [`delete_result`].
#[derive(Debug, Clone)]
pub struct DeletedResult {
    pub result: ResultRow,
    /// Every raster output the result linked to, in position order.
    pub raster_output_ids: Vec<Uuid>,
    /// The subset no other result links to after the delete.
    pub orphaned_raster_output_ids: Vec<Uuid>,
}

const RESULT_COLUMNS: &str =
    "id, created_by, analysis_results, created_at, source, raster_output_path";

/// Inserts a result record. Links in `record.raster_output_ids` are not
/// written; use [`attach_raster_output`].
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_result(pool: &PgPool, record: &ResultRecord) -> Result<ResultRow, DbError> {
    let row = sqlx::query_as::<_, ResultRow>(&format!(
        "INSERT INTO user_analysis_results \
             (id, created_by, analysis_results, created_at, source, raster_output_path) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {RESULT_COLUMNS}"
    ))
    .bind(record.id)
    .bind(&record.owner)
    .bind(&record.payload)
    .bind(record.created_at)
    .bind(&record.source)
    .bind(&record.raster_output_path)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a result row by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_result(pool: &PgPool, id: Uuid) -> Result<Option<ResultRow>, DbError> {
    let row = sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {RESULT_COLUMNS} FROM user_analysis_results WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Raster output ids linked to a result, ordered by link position.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_result_raster_output_ids(
    pool: &PgPool,
    result_id: Uuid,
) -> Result<Vec<Uuid>, DbError> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT raster_output_id FROM user_analysis_result_raster_outputs \
         WHERE result_id = $1 \
         ORDER BY position, raster_output_id",
    )
    .bind(result_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Results created by `owner`, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_results_for_owner(pool: &PgPool, owner: &str) -> Result<Vec<ResultRow>, DbError> {
    let rows = sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {RESULT_COLUMNS} FROM user_analysis_results \
         WHERE created_by = $1 \
         ORDER BY created_at DESC, id"
    ))
    .bind(owner)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Links a raster output to a result at `position`.
///
/// Returns `false` when the result or the raster output no longer exists
/// (e.g. the result was deleted while the analysis was running) or the pair is
/// already linked.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn attach_raster_output(
    pool: &PgPool,
    result_id: Uuid,
    raster_output_id: Uuid,
    position: i32,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO user_analysis_result_raster_outputs (result_id, raster_output_id, position) \
         SELECT r.id, o.id, $3 FROM user_analysis_results r \
         JOIN analysis_raster_outputs o ON o.id = $2 \
         WHERE r.id = $1 \
         ON CONFLICT (result_id, raster_output_id) DO NOTHING",
    )
    .bind(result_id)
    .bind(raster_output_id)
    .bind(position)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Replaces the aggregate payload of a result.
///
/// Returns `false` if the result does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_result_payload(
    pool: &PgPool,
    id: Uuid,
    payload: &serde_json::Value,
) -> Result<bool, DbError> {
    let result = sqlx::query("UPDATE user_analysis_results SET analysis_results = $2 WHERE id = $1")
        .bind(id)
        .bind(payload)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Records the blob path of the combined raster for a result.
///
/// Returns `false` if the result does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_result_raster_output_path(
    pool: &PgPool,
    id: Uuid,
    path: Option<&str>,
) -> Result<bool, DbError> {
    let result =
        sqlx::query("UPDATE user_analysis_results SET raster_output_path = $2 WHERE id = $1")
            .bind(id)
            .bind(path)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes a result and its links in one transaction and reports which of
/// its raster outputs are no longer referenced by any result.
///
/// The raster outputs themselves are left in place; collecting them is the
/// caller's decision.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no result has `id`, or [`DbError::Sqlx`]
/// if any statement fails (the transaction is rolled back).
pub async fn delete_result(pool: &PgPool, id: Uuid) -> Result<DeletedResult, DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {RESULT_COLUMNS} FROM user_analysis_results WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let raster_output_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT raster_output_id FROM user_analysis_result_raster_outputs \
         WHERE result_id = $1 \
         ORDER BY position, raster_output_id",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM user_analysis_results WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let orphaned_raster_output_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT t.id FROM unnest($1::uuid[]) WITH ORDINALITY AS t(id, ord) \
         WHERE NOT EXISTS ( \
             SELECT 1 FROM user_analysis_result_raster_outputs l \
             WHERE l.raster_output_id = t.id \
         ) \
         ORDER BY t.ord",
    )
    .bind(&raster_output_ids)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(DeletedResult {
        result,
        raster_output_ids,
        orphaned_raster_output_ids,
    })
}
