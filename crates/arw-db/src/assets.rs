//! Database operations for `gee_assets`.

use arw_core::{Asset, AssetMetadata};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `gee_assets` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AssetRow {
    pub id: i64,
    pub key: String,
    pub source: String,
    pub asset_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRow {
    /// Convert the row into the domain [`Asset`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidColumn`] if `asset_type` or `metadata` does not
    /// decode.
    pub fn into_asset(self) -> Result<Asset, DbError> {
        let asset_type = self
            .asset_type
            .parse()
            .map_err(|reason: String| DbError::InvalidColumn {
                column: "gee_assets.asset_type",
                reason,
            })?;
        let metadata: AssetMetadata =
            serde_json::from_value(self.metadata).map_err(|e| DbError::InvalidColumn {
                column: "gee_assets.metadata",
                reason: e.to_string(),
            })?;

        Ok(Asset {
            key: self.key,
            source: self.source,
            asset_type,
            metadata,
        })
    }
}

const ASSET_COLUMNS: &str = "id, key, source, asset_type, metadata, created_at, updated_at";

/// Fetches an asset by its unique key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_asset_by_key(pool: &PgPool, key: &str) -> Result<Option<AssetRow>, DbError> {
    let row = sqlx::query_as::<_, AssetRow>(&format!(
        "SELECT {ASSET_COLUMNS} FROM gee_assets WHERE key = $1"
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Finds the asset whose `metadata.variables` lists `variable`, compared
/// case-insensitively. When several match, the lowest key wins.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_asset_for_variable(
    pool: &PgPool,
    variable: &str,
) -> Result<Option<AssetRow>, DbError> {
    let row = sqlx::query_as::<_, AssetRow>(&format!(
        "SELECT {ASSET_COLUMNS} FROM gee_assets \
         WHERE EXISTS ( \
             SELECT 1 FROM jsonb_array_elements_text( \
                 CASE WHEN jsonb_typeof(metadata -> 'variables') = 'array' \
                      THEN metadata -> 'variables' ELSE '[]'::jsonb END \
             ) AS v(name) \
             WHERE lower(v.name) = lower($1) \
         ) \
         ORDER BY key \
         LIMIT 1"
    ))
    .bind(variable)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns every registered asset ordered by key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_assets(pool: &PgPool) -> Result<Vec<AssetRow>, DbError> {
    let rows = sqlx::query_as::<_, AssetRow>(&format!(
        "SELECT {ASSET_COLUMNS} FROM gee_assets ORDER BY key"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
