use arw_core::Asset;
use sqlx::PgPool;

use crate::DbError;

/// Upsert assets from the registry file into `gee_assets`, keyed by `key`.
///
/// Returns the number of assets processed (inserted or updated).
/// All upserts run inside a single transaction; if any operation fails
/// the entire batch is rolled back.
///
/// # Errors
///
/// Returns [`DbError::InvalidColumn`] if an asset's metadata cannot be
/// encoded, or [`DbError::Sqlx`] if any database operation fails.
pub async fn seed_assets(pool: &PgPool, assets: &[Asset]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;

    for asset in assets {
        let metadata =
            serde_json::to_value(&asset.metadata).map_err(|e| DbError::InvalidColumn {
                column: "gee_assets.metadata",
                reason: e.to_string(),
            })?;

        sqlx::query(
            "INSERT INTO gee_assets (key, source, asset_type, metadata) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (key) DO UPDATE SET \
                 source = EXCLUDED.source, \
                 asset_type = EXCLUDED.asset_type, \
                 metadata = EXCLUDED.metadata, \
                 updated_at = NOW()",
        )
        .bind(&asset.key)
        .bind(&asset.source)
        .bind(asset.asset_type.as_str())
        .bind(metadata)
        .execute(&mut *tx)
        .await?;

        count += 1;
    }

    tx.commit().await?;
    Ok(count)
}
