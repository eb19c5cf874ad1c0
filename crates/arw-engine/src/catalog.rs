//! Asset lookup by key or by provided variable, plus coverage checks.

use std::sync::Arc;

use arw_core::{Asset, AssetMetadata, CoverageError};
use chrono::NaiveDate;

use crate::error::{EngineError, StoreError};
use crate::store::AssetStore;

/// Read-only view over the registered geospatial datasets.
pub struct AssetCatalog<S> {
    store: Arc<S>,
}

impl<S> Clone for AssetCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AssetStore> AssetCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Returns [`EngineError::AssetNotFound`] for an unknown key, or
    /// [`EngineError::InvalidMetadata`] if the stored record does not decode.
    pub async fn asset(&self, key: &str) -> Result<Asset, EngineError> {
        match self.store.asset_by_key(key).await {
            Ok(Some(asset)) => Ok(asset),
            Ok(None) => Err(EngineError::AssetNotFound(key.to_string())),
            Err(StoreError::InvalidRecord(reason)) => Err(EngineError::InvalidMetadata {
                key: key.to_string(),
                reason,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns [`EngineError::AssetNotFound`] for an unknown key.
    pub async fn get_source(&self, key: &str) -> Result<String, EngineError> {
        Ok(self.asset(key).await?.source)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::AssetNotFound`] for an unknown key.
    pub async fn get_metadata(&self, key: &str) -> Result<AssetMetadata, EngineError> {
        Ok(self.asset(key).await?.metadata)
    }

    /// Whether `date` lies in the asset's `[start_date, end_date)` window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AssetNotFound`] for an unknown key, or
    /// [`EngineError::InvalidMetadata`] if either coverage bound is missing.
    pub async fn is_date_covered(&self, key: &str, date: NaiveDate) -> Result<bool, EngineError> {
        let asset = self.asset(key).await?;
        asset_covers(&asset, date)
    }

    /// The asset serving `variable`, per its `metadata.variables`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoAssetForVariable`] when no asset lists it.
    pub async fn asset_for_variable(&self, variable: &str) -> Result<Asset, EngineError> {
        match self.store.asset_for_variable(variable).await {
            Ok(Some(asset)) => Ok(asset),
            Ok(None) => Err(EngineError::NoAssetForVariable(variable.to_string())),
            Err(StoreError::InvalidRecord(reason)) => Err(EngineError::InvalidMetadata {
                key: format!("(serving {variable})"),
                reason,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn asset_covers(asset: &Asset, date: NaiveDate) -> Result<bool, EngineError> {
    asset.covers(date).map_err(|e| invalid_metadata(asset, &e))
}

pub(crate) fn invalid_metadata(asset: &Asset, err: &CoverageError) -> EngineError {
    EngineError::InvalidMetadata {
        key: asset.key.clone(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{asset, date};

    fn catalog() -> AssetCatalog<MemoryStore> {
        let mut undated = asset("communities", date(2000, 1, 1), date(2001, 1, 1), &[]);
        undated.metadata.start_date = None;
        undated.metadata.end_date = None;
        let store = MemoryStore::with_assets([
            asset("landsat_ndvi", date(2000, 1, 1), date(2024, 1, 1), &["NDVI", "EVI"]),
            undated,
        ]);
        AssetCatalog::new(Arc::new(store))
    }

    #[tokio::test]
    async fn coverage_is_half_open() {
        let catalog = catalog();
        assert!(catalog
            .is_date_covered("landsat_ndvi", date(2000, 1, 1))
            .await
            .unwrap());
        assert!(catalog
            .is_date_covered("landsat_ndvi", date(2023, 12, 31))
            .await
            .unwrap());
        assert!(!catalog
            .is_date_covered("landsat_ndvi", date(2024, 1, 1))
            .await
            .unwrap());
        assert!(!catalog
            .is_date_covered("landsat_ndvi", date(1999, 12, 31))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let catalog = catalog();
        assert!(matches!(
            catalog.get_source("missing").await,
            Err(EngineError::AssetNotFound(ref k)) if k == "missing"
        ));
        assert!(matches!(
            catalog.is_date_covered("missing", date(2020, 1, 1)).await,
            Err(EngineError::AssetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_coverage_dates_are_invalid_metadata() {
        let catalog = catalog();
        assert!(matches!(
            catalog.is_date_covered("communities", date(2020, 1, 1)).await,
            Err(EngineError::InvalidMetadata { ref key, .. }) if key == "communities"
        ));
    }

    #[tokio::test]
    async fn source_and_metadata_lookups() {
        let catalog = catalog();
        assert_eq!(
            catalog.get_source("landsat_ndvi").await.unwrap(),
            "projects/arw/assets/landsat_ndvi"
        );
        let metadata = catalog.get_metadata("landsat_ndvi").await.unwrap();
        assert_eq!(metadata.end_date, Some(date(2024, 1, 1)));
    }

    #[tokio::test]
    async fn variables_resolve_case_insensitively() {
        let catalog = catalog();
        assert_eq!(
            catalog.asset_for_variable("evi").await.unwrap().key,
            "landsat_ndvi"
        );
        assert!(matches!(
            catalog.asset_for_variable("Rainfall").await,
            Err(EngineError::NoAssetForVariable(_))
        ));
    }
}
