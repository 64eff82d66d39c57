//! Runtime settings.
//!
//! Settings are read from an optional JSON file, then overridden by
//! environment variables (a `.env` file is honoured by the binary):
//!
//! ```json
//! {
//!   "data_url": "https://example.org/air_residence.csv",
//!   "cache_ttl_secs": 600,
//!   "banding": "decade",
//!   "population_reference": { "VIC": 6694884, "NSW": 8176368 }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::loader::ColumnMapping;

pub const DEFAULT_DATA_URL: &str =
    "https://vaccinedata.covid19nearme.com.au/data/air_residence.csv";
pub const DEFAULT_NATIONAL_REGION: &str = "AUS";

/// Fine 5-year bands as published, or coarse 10-year buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBanding {
    #[default]
    Fine,
    Decade,
}

/// Layout of the remote CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// One row per date, region and age band.
    #[default]
    Long,
    /// One row per date with a column group per region and band, described
    /// by `Settings::column_mappings`.
    Wide,
}

/// Parameters of the derived-metrics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of trailing observations in each moving average.
    pub ma_window: usize,
    /// Substituted for a moving average of exactly zero so projections stay finite.
    pub ma_floor: f64,
    /// Decimal places for percentages and rates.
    pub precision: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ma_window: 7,
            ma_floor: 0.01,
            precision: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_url: String,
    pub cache_ttl_secs: u64,
    pub source_format: SourceFormat,
    pub column_mappings: Vec<ColumnMapping>,
    pub banding: AgeBanding,
    /// Label of the nation-wide region, excluded when summing regions.
    pub national_region: String,
    /// Whole-of-population figures per region for the `total_population` cohort.
    pub population_reference: BTreeMap<String, u64>,
    pub engine: EngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_url: DEFAULT_DATA_URL.to_string(),
            cache_ttl_secs: 600,
            source_format: SourceFormat::default(),
            column_mappings: Vec::new(),
            banding: AgeBanding::default(),
            national_region: DEFAULT_NATIONAL_REGION.to_string(),
            population_reference: BTreeMap::new(),
            engine: EngineConfig::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file '{path}'"))?;
        Self::from_json(&content).with_context(|| format!("parsing settings file '{path}'"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Applies `VAC_RACE_DATA_URL` and `VAC_RACE_CACHE_TTL_SECS` when set.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("VAC_RACE_DATA_URL") {
            self.data_url = url;
        }
        if let Some(ttl) = lookup("VAC_RACE_CACHE_TTL_SECS") {
            self.cache_ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("VAC_RACE_CACHE_TTL_SECS is not a number: '{ttl}'"))?;
        }
        Ok(self)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.cache_ttl_secs, 600);
        assert_eq!(s.engine.ma_window, 7);
        assert_eq!(s.engine.ma_floor, 0.01);
        assert_eq!(s.banding, AgeBanding::Fine);
        assert_eq!(s.national_region, "AUS");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let s = Settings::from_json(
            r#"{
                "banding": "decade",
                "population_reference": { "VIC": 6694884 },
                "engine": { "precision": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(s.banding, AgeBanding::Decade);
        assert_eq!(s.population_reference.get("VIC"), Some(&6694884));
        assert_eq!(s.engine.precision, 3);
        assert_eq!(s.engine.ma_window, 7);
        assert_eq!(s.data_url, DEFAULT_DATA_URL);
    }

    #[test]
    fn test_overrides() {
        let s = Settings::default()
            .with_overrides(|key| match key {
                "VAC_RACE_DATA_URL" => Some("http://localhost/data.csv".to_string()),
                "VAC_RACE_CACHE_TTL_SECS" => Some("30".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(s.data_url, "http://localhost/data.csv");
        assert_eq!(s.cache_ttl(), chrono::Duration::seconds(30));
    }

    #[test]
    fn test_bad_ttl_override_is_an_error() {
        let result = Settings::default().with_overrides(|key| {
            (key == "VAC_RACE_CACHE_TTL_SECS").then(|| "ten minutes".to_string())
        });
        assert!(result.is_err());
    }
}
