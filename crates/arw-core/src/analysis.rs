//! Comparison requests, the per-period descriptors they expand into, and the
//! raster file naming rule derived from a descriptor.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("comparison {field} array has {actual} entries but {expected} years were given")]
    MismatchedComparisonArrays {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{resolution} analysis for {year} requires a {field}")]
    MissingPeriodField {
        resolution: TemporalResolution,
        year: i32,
        field: &'static str,
    },

    #[error("month {0} is outside 1..=12")]
    InvalidMonth(u32),

    #[error("quarter {0} is outside 1..=4")]
    InvalidQuarter(u32),

    #[error("year {0} cannot be represented as a calendar date")]
    InvalidYear(i32),

    #[error("unknown temporal resolution '{0}'")]
    UnknownTemporalResolution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TemporalResolution {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Quarterly,
}

impl TemporalResolution {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TemporalResolution::Daily => "daily",
            TemporalResolution::Weekly => "weekly",
            TemporalResolution::Monthly => "monthly",
            TemporalResolution::Yearly => "yearly",
            TemporalResolution::Quarterly => "quarterly",
        }
    }
}

impl std::fmt::Display for TemporalResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemporalResolution {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(TemporalResolution::Daily),
            "weekly" => Ok(TemporalResolution::Weekly),
            "monthly" => Ok(TemporalResolution::Monthly),
            "yearly" => Ok(TemporalResolution::Yearly),
            "quarterly" => Ok(TemporalResolution::Quarterly),
            _ => Err(RequestError::UnknownTemporalResolution(s.to_string())),
        }
    }
}

impl TryFrom<String> for TemporalResolution {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TemporalResolution> for String {
    fn from(value: TemporalResolution) -> Self {
        value.as_str().to_string()
    }
}

/// A closed calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub quarter: Option<u32>,
}

/// Comparison years with optional month/quarter arrays paired by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonPeriod {
    #[serde(default)]
    pub year: Vec<i32>,
    #[serde(default)]
    pub month: Option<Vec<Option<u32>>>,
    #[serde(default)]
    pub quarter: Option<Vec<Option<u32>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRequest {
    pub analysis_type: String,
    pub variable: String,
    pub landscape: String,
    pub temporal_resolution: TemporalResolution,
    pub period: Period,
    #[serde(default)]
    pub comparison_period: ComparisonPeriod,
    pub community_name: String,
}

/// One fully resolved single-period analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDescriptor {
    pub analysis_type: String,
    pub variable: String,
    pub landscape: String,
    pub temporal_resolution: TemporalResolution,
    pub year: i32,
    pub month: Option<u32>,
    pub quarter: Option<u32>,
    pub community_name: String,
}

impl ComparisonRequest {
    fn descriptor(&self, year: i32, month: Option<u32>, quarter: Option<u32>) -> AnalysisDescriptor {
        AnalysisDescriptor {
            analysis_type: self.analysis_type.clone(),
            variable: self.variable.clone(),
            landscape: self.landscape.clone(),
            temporal_resolution: self.temporal_resolution,
            year,
            month,
            quarter,
            community_name: self.community_name.clone(),
        }
    }
}

impl AnalysisDescriptor {
    /// Checks that the period fields are in range and that the fields the
    /// temporal resolution depends on are present.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(RequestError::InvalidMonth(month));
            }
        }
        if let Some(quarter) = self.quarter {
            if !(1..=4).contains(&quarter) {
                return Err(RequestError::InvalidQuarter(quarter));
            }
        }
        match self.temporal_resolution {
            TemporalResolution::Monthly if self.month.is_none() => {
                Err(self.missing("month"))
            }
            TemporalResolution::Quarterly if self.quarter.is_none() => {
                Err(self.missing("quarter"))
            }
            _ => Ok(()),
        }
    }

    fn missing(&self, field: &'static str) -> RequestError {
        RequestError::MissingPeriodField {
            resolution: self.temporal_resolution,
            year: self.year,
            field,
        }
    }

    /// The calendar range the descriptor's period spans: the month for monthly
    /// analyses, the quarter for quarterly ones, otherwise the whole year.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the descriptor is invalid or the year is
    /// outside the representable calendar.
    pub fn period_range(&self) -> Result<DateRange, RequestError> {
        self.validate()?;
        let (first_month, month_count) = match self.temporal_resolution {
            TemporalResolution::Monthly => (self.month.unwrap_or(1), 1),
            TemporalResolution::Quarterly => ((self.quarter.unwrap_or(1) - 1) * 3 + 1, 3),
            _ => (1, 12),
        };

        let start = NaiveDate::from_ymd_opt(self.year, first_month, 1)
            .ok_or(RequestError::InvalidYear(self.year))?;
        let after = start
            .checked_add_months(chrono::Months::new(month_count))
            .ok_or(RequestError::InvalidYear(self.year))?;
        let end = after.pred_opt().ok_or(RequestError::InvalidYear(self.year))?;

        Ok(DateRange { start, end })
    }
}

/// Expand a comparison request into its ordered descriptors: the primary
/// period first, then one per comparison year in input order.
///
/// Absent or empty month/quarter arrays pair every comparison year with
/// `None`; non-empty arrays must be exactly as long as the year array.
///
/// # Errors
///
/// Returns [`RequestError`] if the arrays are mismatched or any resulting
/// descriptor fails [`AnalysisDescriptor::validate`].
pub fn expand(request: &ComparisonRequest) -> Result<Vec<AnalysisDescriptor>, RequestError> {
    let years = &request.comparison_period.year;
    let months = pad_positional("month", request.comparison_period.month.as_deref(), years.len())?;
    let quarters = pad_positional(
        "quarter",
        request.comparison_period.quarter.as_deref(),
        years.len(),
    )?;

    let mut descriptors = Vec::with_capacity(years.len() + 1);
    descriptors.push(request.descriptor(
        request.period.year,
        request.period.month,
        request.period.quarter,
    ));
    for ((year, month), quarter) in years.iter().zip(months).zip(quarters) {
        descriptors.push(request.descriptor(*year, month, quarter));
    }

    for descriptor in &descriptors {
        descriptor.validate()?;
    }

    Ok(descriptors)
}

fn pad_positional(
    field: &'static str,
    values: Option<&[Option<u32>]>,
    expected: usize,
) -> Result<Vec<Option<u32>>, RequestError> {
    match values {
        None | Some([]) => Ok(vec![None; expected]),
        Some(values) if values.len() == expected => Ok(values.to_vec()),
        Some(values) => Err(RequestError::MismatchedComparisonArrays {
            field,
            expected,
            actual: values.len(),
        }),
    }
}

/// Derive the stored raster file name for a descriptor:
/// `{community}_{variable}_{analysis_type}_{resolution}_{date}.tif`.
///
/// Community and variable have spaces replaced with underscores and are
/// lower-cased; no other punctuation is touched. The date component is
/// `Q{quarter}_{year}` for quarterly, `{month name}_{year}` for monthly and
/// `{year}` otherwise.
///
/// # Errors
///
/// Returns [`RequestError`] if the descriptor lacks the month or quarter its
/// resolution needs, or either is out of range.
pub fn derive_filename(descriptor: &AnalysisDescriptor) -> Result<String, RequestError> {
    descriptor.validate()?;

    let date = match descriptor.temporal_resolution {
        TemporalResolution::Quarterly => {
            format!("Q{}_{}", descriptor.quarter.unwrap_or_default(), descriptor.year)
        }
        TemporalResolution::Monthly => {
            let month = descriptor.month.unwrap_or(1);
            format!("{}_{}", MONTH_NAMES[(month - 1) as usize], descriptor.year)
        }
        _ => descriptor.year.to_string(),
    };

    let community = descriptor.community_name.replace(' ', "_").to_lowercase();
    let variable = descriptor.variable.to_lowercase().replace(' ', "_");
    let analysis_type = descriptor.analysis_type.to_lowercase();

    Ok(format!(
        "{community}_{variable}_{analysis_type}_{}_{date}.tif",
        descriptor.temporal_resolution
    ))
}

#[cfg(test)]
#[path = "analysis_test.rs"]
mod tests;
