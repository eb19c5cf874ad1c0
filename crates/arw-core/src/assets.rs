use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::DateRange;
use crate::ConfigError;

/// Longest key the `gee_assets` table accepts.
pub const MAX_ASSET_KEY_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Image,
    ImageCollection,
    Table,
    Classifier,
    FeatureView,
    Folder,
}

impl AssetType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::Image => "image",
            AssetType::ImageCollection => "image_collection",
            AssetType::Table => "table",
            AssetType::Classifier => "classifier",
            AssetType::FeatureView => "feature_view",
            AssetType::Folder => "folder",
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(AssetType::Image),
            "image_collection" => Ok(AssetType::ImageCollection),
            "table" => Ok(AssetType::Table),
            "classifier" => Ok(AssetType::Classifier),
            "feature_view" => Ok(AssetType::FeatureView),
            "folder" => Ok(AssetType::Folder),
            other => Err(format!("unknown asset type '{other}'")),
        }
    }
}

/// Free-form asset metadata with the coverage window pulled out as typed fields.
///
/// Any key other than `start_date`, `end_date` and `variables` is preserved
/// verbatim in `attributes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Analysis variables this dataset can serve (e.g. `NDVI`, `EVI`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// An externally hosted geospatial dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub key: String,
    pub source: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    #[serde(default)]
    pub metadata: AssetMetadata,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoverageError {
    #[error("asset '{key}' metadata must contain start_date and end_date")]
    MissingCoverageDates { key: String },
}

impl Asset {
    /// The half-open `[start_date, end_date)` window this asset has data for.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::MissingCoverageDates`] if either bound is absent.
    pub fn coverage_window(&self) -> Result<DateRange, CoverageError> {
        match (self.metadata.start_date, self.metadata.end_date) {
            (Some(start), Some(end)) => Ok(DateRange { start, end }),
            _ => Err(CoverageError::MissingCoverageDates {
                key: self.key.clone(),
            }),
        }
    }

    /// Whether `date` falls inside the coverage window. The end bound is exclusive.
    ///
    /// # Errors
    ///
    /// Returns [`CoverageError::MissingCoverageDates`] if either bound is absent.
    pub fn covers(&self, date: NaiveDate) -> Result<bool, CoverageError> {
        let window = self.coverage_window()?;
        Ok(window.start <= date && date < window.end)
    }

    /// Case-insensitive check against `metadata.variables`.
    #[must_use]
    pub fn serves_variable(&self, variable: &str) -> bool {
        self.metadata
            .variables
            .iter()
            .any(|v| v.eq_ignore_ascii_case(variable))
    }
}

#[derive(Debug, Deserialize)]
pub struct AssetsFile {
    pub assets: Vec<Asset>,
}

/// Load and validate the asset registry seed file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_assets(path: &Path) -> Result<AssetsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::AssetsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_assets(&content)
}

fn parse_assets(content: &str) -> Result<AssetsFile, ConfigError> {
    let assets_file: AssetsFile = serde_yaml::from_str(content)?;
    validate_assets(&assets_file)?;
    Ok(assets_file)
}

fn validate_assets(assets_file: &AssetsFile) -> Result<(), ConfigError> {
    let mut seen_keys = HashSet::new();

    for asset in &assets_file.assets {
        if asset.key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "asset key must be non-empty".to_string(),
            ));
        }

        if asset.key.len() > MAX_ASSET_KEY_LEN {
            return Err(ConfigError::Validation(format!(
                "asset key '{}' is longer than {MAX_ASSET_KEY_LEN} characters",
                asset.key
            )));
        }

        if asset.source.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "asset '{}' has an empty source",
                asset.key
            )));
        }

        if let (Some(start), Some(end)) = (asset.metadata.start_date, asset.metadata.end_date) {
            if start >= end {
                return Err(ConfigError::Validation(format!(
                    "asset '{}' has start_date {start} not before end_date {end}",
                    asset.key
                )));
            }
        }

        if !seen_keys.insert(asset.key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate asset key: '{}'",
                asset.key
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "assets_test.rs"]
mod tests;
