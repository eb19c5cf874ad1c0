//! Clamping requested date ranges to an asset's temporal coverage.

use std::sync::Arc;

use arw_core::{Asset, DateRange};
use chrono::NaiveDate;

use crate::catalog::{asset_covers, invalid_metadata, AssetCatalog};
use crate::error::EngineError;
use crate::store::AssetStore;

/// Narrows requested date ranges to what an asset can actually serve.
pub struct PeriodResolver<S> {
    catalog: AssetCatalog<S>,
}

impl<S: AssetStore> PeriodResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            catalog: AssetCatalog::new(store),
        }
    }

    /// Clamp `[start, end]` to the coverage of the asset with `key`.
    ///
    /// `None` means neither endpoint is covered and the range must be
    /// rejected. See [`clamp_to_asset`] for the exact policy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AssetNotFound`] for an unknown key, or
    /// [`EngineError::InvalidMetadata`] if the asset lacks coverage dates.
    pub async fn clamp_range(
        &self,
        key: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<DateRange>, EngineError> {
        let asset = self.catalog.asset(key).await?;
        clamp_to_asset(&asset, start, end)
    }
}

/// Each endpoint is tested independently against the asset's half-open
/// window:
///
/// - neither covered: `None`
/// - only `start` covered: `start ..= asset end_date`
/// - only `end` covered: `asset start_date ..= end`
/// - both covered: the input, unchanged
///
/// A range that straddles the whole window (start before it, end after it)
/// has neither endpoint covered and is rejected.
///
/// # Errors
///
/// Returns [`EngineError::InvalidMetadata`] if the asset lacks coverage dates.
pub fn clamp_to_asset(
    asset: &Asset,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Option<DateRange>, EngineError> {
    let window = asset
        .coverage_window()
        .map_err(|e| invalid_metadata(asset, &e))?;
    let start_covered = asset_covers(asset, start)?;
    let end_covered = asset_covers(asset, end)?;

    Ok(match (start_covered, end_covered) {
        (false, false) => None,
        (true, false) => Some(DateRange {
            start,
            end: window.end,
        }),
        (false, true) => Some(DateRange {
            start: window.start,
            end,
        }),
        (true, true) => Some(DateRange { start, end }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{asset, date};

    fn resolver() -> PeriodResolver<MemoryStore> {
        let store = MemoryStore::with_assets([asset(
            "landsat_ndvi",
            date(2010, 1, 1),
            date(2020, 1, 1),
            &["NDVI"],
        )]);
        PeriodResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn neither_endpoint_covered_is_rejected() {
        let r = resolver();
        assert_eq!(
            r.clamp_range("landsat_ndvi", date(2001, 1, 1), date(2002, 1, 1))
                .await
                .unwrap(),
            None
        );
        // Straddling the whole window still fails both endpoint checks.
        assert_eq!(
            r.clamp_range("landsat_ndvi", date(2005, 1, 1), date(2025, 1, 1))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn only_start_covered_clamps_end_to_asset_end() {
        let r = resolver();
        assert_eq!(
            r.clamp_range("landsat_ndvi", date(2019, 6, 1), date(2020, 6, 1))
                .await
                .unwrap(),
            Some(DateRange {
                start: date(2019, 6, 1),
                end: date(2020, 1, 1)
            })
        );
    }

    #[tokio::test]
    async fn only_end_covered_clamps_start_to_asset_start() {
        let r = resolver();
        assert_eq!(
            r.clamp_range("landsat_ndvi", date(2009, 6, 1), date(2010, 6, 1))
                .await
                .unwrap(),
            Some(DateRange {
                start: date(2010, 1, 1),
                end: date(2010, 6, 1)
            })
        );
    }

    #[tokio::test]
    async fn both_covered_is_unchanged() {
        let r = resolver();
        assert_eq!(
            r.clamp_range("landsat_ndvi", date(2012, 1, 1), date(2012, 12, 31))
                .await
                .unwrap(),
            Some(DateRange {
                start: date(2012, 1, 1),
                end: date(2012, 12, 31)
            })
        );
    }

    #[tokio::test]
    async fn end_bound_is_exclusive() {
        let r = resolver();
        assert_eq!(
            r.clamp_range("landsat_ndvi", date(2019, 1, 1), date(2020, 1, 1))
                .await
                .unwrap(),
            Some(DateRange {
                start: date(2019, 1, 1),
                end: date(2020, 1, 1)
            })
        );
    }

    #[tokio::test]
    async fn unknown_asset_propagates_not_found() {
        assert!(matches!(
            resolver()
                .clamp_range("nope", date(2012, 1, 1), date(2013, 1, 1))
                .await,
            Err(EngineError::AssetNotFound(_))
        ));
    }
}
