//! Database operations for `analysis_raster_outputs`.
//!
//! Status changes go through [`transition_raster_output`], a conditional
//! `UPDATE` that only applies while the row is still in one of the expected
//! predecessor states. Two workers racing on the same output therefore cannot
//! both move it.

use arw_core::{AnalysisDescriptor, RasterOutput, RasterStatus, StatusLogEntry};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `analysis_raster_outputs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RasterOutputRow {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    pub status: String,
    pub generate_start_time: Option<DateTime<Utc>>,
    pub generate_end_time: Option<DateTime<Utc>>,
    pub status_logs: serde_json::Value,
    pub analysis: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl RasterOutputRow {
    /// Convert the row into the domain [`RasterOutput`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidColumn`] if `status`, `status_logs` or
    /// `analysis` does not decode.
    pub fn into_raster_output(self) -> Result<RasterOutput, DbError> {
        let status: RasterStatus =
            self.status
                .parse()
                .map_err(|reason: String| DbError::InvalidColumn {
                    column: "analysis_raster_outputs.status",
                    reason,
                })?;
        let status_logs: Vec<StatusLogEntry> = serde_json::from_value(self.status_logs)
            .map_err(|e| DbError::InvalidColumn {
                column: "analysis_raster_outputs.status_logs",
                reason: e.to_string(),
            })?;
        let analysis: AnalysisDescriptor =
            serde_json::from_value(self.analysis).map_err(|e| DbError::InvalidColumn {
                column: "analysis_raster_outputs.analysis",
                reason: e.to_string(),
            })?;

        Ok(RasterOutput {
            id: self.id,
            name: self.name,
            size: self.size,
            status,
            generate_start_time: self.generate_start_time,
            generate_end_time: self.generate_end_time,
            status_logs,
            analysis,
            created_at: self.created_at,
        })
    }
}

/// Column updates applied alongside a status change. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone)]
pub struct RasterTransitionParams {
    pub to: RasterStatus,
    pub log_entry: StatusLogEntry,
    pub size: Option<i64>,
    pub generate_start_time: Option<DateTime<Utc>>,
    pub generate_end_time: Option<DateTime<Utc>>,
}

const RASTER_COLUMNS: &str = "id, name, size, status, generate_start_time, generate_end_time, \
                              status_logs, analysis, created_at";

fn encode_json<T: serde::Serialize>(
    column: &'static str,
    value: &T,
) -> Result<serde_json::Value, DbError> {
    serde_json::to_value(value).map_err(|e| DbError::InvalidColumn {
        column,
        reason: e.to_string(),
    })
}

/// Inserts a new raster output exactly as given.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including a duplicate id).
pub async fn insert_raster_output(
    pool: &PgPool,
    output: &RasterOutput,
) -> Result<RasterOutputRow, DbError> {
    let status_logs = encode_json("analysis_raster_outputs.status_logs", &output.status_logs)?;
    let analysis = encode_json("analysis_raster_outputs.analysis", &output.analysis)?;

    let row = sqlx::query_as::<_, RasterOutputRow>(&format!(
        "INSERT INTO analysis_raster_outputs \
             (id, name, size, status, generate_start_time, generate_end_time, \
              status_logs, analysis, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {RASTER_COLUMNS}"
    ))
    .bind(output.id)
    .bind(&output.name)
    .bind(output.size)
    .bind(output.status.as_str())
    .bind(output.generate_start_time)
    .bind(output.generate_end_time)
    .bind(status_logs)
    .bind(analysis)
    .bind(output.created_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a raster output by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_raster_output(pool: &PgPool, id: Uuid) -> Result<Option<RasterOutputRow>, DbError> {
    let row = sqlx::query_as::<_, RasterOutputRow>(&format!(
        "SELECT {RASTER_COLUMNS} FROM analysis_raster_outputs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Moves a raster output to `params.to` if it is currently in one of that
/// status's legal predecessors, appending `params.log_entry` to its history.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row has `id`,
/// [`DbError::RejectedTransition`] if the row is in a state the transition is
/// not legal from, or [`DbError::Sqlx`] if a query fails.
pub async fn transition_raster_output(
    pool: &PgPool,
    id: Uuid,
    params: &RasterTransitionParams,
) -> Result<RasterOutputRow, DbError> {
    let expected: Vec<String> = params
        .to
        .allowed_predecessors()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();
    let log_entry = encode_json("analysis_raster_outputs.status_logs", &params.log_entry)?;

    let updated = sqlx::query_as::<_, RasterOutputRow>(&format!(
        "UPDATE analysis_raster_outputs SET \
             status = $2, \
             status_logs = status_logs || jsonb_build_array($3::jsonb), \
             size = COALESCE($4, size), \
             generate_start_time = COALESCE($5, generate_start_time), \
             generate_end_time = COALESCE($6, generate_end_time) \
         WHERE id = $1 AND status = ANY($7) \
         RETURNING {RASTER_COLUMNS}"
    ))
    .bind(id)
    .bind(params.to.as_str())
    .bind(log_entry)
    .bind(params.size)
    .bind(params.generate_start_time)
    .bind(params.generate_end_time)
    .bind(&expected)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = updated {
        return Ok(row);
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM analysis_raster_outputs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    match current {
        Some(current) => Err(DbError::RejectedTransition {
            id,
            current,
            expected,
        }),
        None => Err(DbError::NotFound),
    }
}

/// Deletes a raster output. Links to results are removed by cascade.
///
/// Returns `true` if a row was deleted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_raster_output(pool: &PgPool, id: Uuid) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM analysis_raster_outputs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Result of [`delete_unreferenced_raster_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreferencedDelete {
    Deleted,
    /// At least one result still links to the output; nothing was removed.
    StillReferenced,
    NotFound,
}

/// Deletes a raster output only if no result links to it.
///
/// The row is locked `FOR UPDATE` before the link check, so a concurrent
/// link insert (whose foreign key check takes a conflicting share lock)
/// either commits first and is seen by the check, or waits and then fails
/// against the deleted row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn delete_unreferenced_raster_output(
    pool: &PgPool,
    id: Uuid,
) -> Result<UnreferencedDelete, DbError> {
    let mut tx = pool.begin().await?;

    let locked = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM analysis_raster_outputs WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;
    if locked.is_none() {
        tx.rollback().await?;
        return Ok(UnreferencedDelete::NotFound);
    }

    let result = sqlx::query(
        "DELETE FROM analysis_raster_outputs o WHERE o.id = $1 \
         AND NOT EXISTS ( \
             SELECT 1 FROM user_analysis_result_raster_outputs l \
             WHERE l.raster_output_id = o.id)",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(if result.rows_affected() > 0 {
        UnreferencedDelete::Deleted
    } else {
        UnreferencedDelete::StillReferenced
    })
}

/// Number of results currently linking to the raster output.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_raster_output_links(pool: &PgPool, id: Uuid) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM user_analysis_result_raster_outputs WHERE raster_output_id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
