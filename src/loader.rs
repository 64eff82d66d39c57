//! Raw table loader: turns a published CSV snapshot into [`Observation`] rows.
//!
//! Two layouts are understood. The long layout carries one row per report
//! date, region and age band. The wide layout carries one row per report
//! date and a group of columns per (region, band); its columns are described
//! declaratively by a list of [`ColumnMapping`]s rather than by code.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info, warn};

use crate::config::{Settings, SourceFormat};
use crate::types::Observation;
use crate::util::{parse_age, parse_count, parse_date};

pub const OPEN_ENDED_UPPER: u16 = 999;

/// Outcome counters for one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub total_rows: usize,
    pub kept_rows: usize,
    pub unvalidated_rows: usize,
    pub parse_errors: usize,
}

#[derive(Debug, Deserialize)]
struct LongRow {
    #[serde(rename = "DATE_AS_AT")]
    date: Option<String>,
    #[serde(rename = "STATE")]
    state: Option<String>,
    #[serde(rename = "AGE_LOWER")]
    age_lower: Option<String>,
    #[serde(rename = "AGE_UPPER")]
    age_upper: Option<String>,
    #[serde(rename = "AIR_RESIDENCE_FIRST_DOSE_COUNT", default)]
    first_dose_count: Option<String>,
    #[serde(rename = "AIR_RESIDENCE_SECOND_DOSE_COUNT", default)]
    second_dose_count: Option<String>,
    #[serde(rename = "AIR_RESIDENCE_FIRST_DOSE_APPROX_COUNT", default)]
    first_dose_approx_count: Option<String>,
    #[serde(rename = "AIR_RESIDENCE_SECOND_DOSE_APPROX_COUNT", default)]
    second_dose_approx_count: Option<String>,
    #[serde(rename = "ABS_ERP_JUN_2020_POP", default)]
    population: Option<String>,
    #[serde(rename = "VALIDATED", default)]
    validated: Option<String>,
}

impl LongRow {
    /// Exact counts are only published for the open-ended aggregates; the
    /// approximate columns cover every band.
    fn counts(&self, open_ended: bool) -> Option<(u64, u64)> {
        let exact = (
            parse_count(self.first_dose_count.as_deref()),
            parse_count(self.second_dose_count.as_deref()),
        );
        let approx = (
            parse_count(self.first_dose_approx_count.as_deref()),
            parse_count(self.second_dose_approx_count.as_deref()),
        );
        let (primary, fallback) = if open_ended { (exact, approx) } else { (approx, exact) };
        match primary {
            (Some(d1), Some(d2)) => Some((d1, d2)),
            _ => match fallback {
                (Some(d1), Some(d2)) => Some((d1, d2)),
                _ => None,
            },
        }
    }

    fn is_unvalidated(&self) -> bool {
        match self.validated.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(v) => !v.eq_ignore_ascii_case("Y"),
        }
    }
}

/// Loads the long layout.
pub fn load_long<R: Read>(reader: R) -> Result<(Vec<Observation>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    rdr.headers().context("reading CSV header")?;

    let mut report = LoadReport::default();
    let mut rows = Vec::new();

    for result in rdr.deserialize::<LongRow>() {
        report.total_rows += 1;
        let raw = match result {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, row = report.total_rows, "Skipping malformed row");
                report.parse_errors += 1;
                continue;
            }
        };

        if raw.is_unvalidated() {
            report.unvalidated_rows += 1;
            continue;
        }

        let (Some(date), Some(age_lower), Some(age_upper)) = (
            parse_date(raw.date.as_deref()),
            parse_age(raw.age_lower.as_deref()),
            parse_age(raw.age_upper.as_deref()),
        ) else {
            report.parse_errors += 1;
            continue;
        };
        let region = match raw.state.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                report.parse_errors += 1;
                continue;
            }
        };
        let Some((dose1_count, dose2_count)) = raw.counts(age_upper == OPEN_ENDED_UPPER) else {
            report.parse_errors += 1;
            continue;
        };

        rows.push(Observation {
            date,
            region,
            age_lower,
            age_upper,
            dose1_count,
            dose2_count,
            population: parse_count(raw.population.as_deref()),
        });
    }

    report.kept_rows = rows.len();
    Ok((rows, report))
}

/// Declares one column group of the wide layout.
///
/// For a mapping with prefix `VIC_30_34` the loader reads
/// `VIC_30_34_FIRST_DOSE`, `VIC_30_34_SECOND_DOSE` and, if present,
/// `VIC_30_34_POPULATION`; `population` is used when that column is absent or
/// blank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub prefix: String,
    pub region: String,
    pub age_lower: u16,
    pub age_upper: u16,
    #[serde(default)]
    pub population: Option<u64>,
}

pub const WIDE_DATE_COLUMN: &str = "DATE_AS_AT";

/// Loads the wide layout described by `mappings`.
pub fn load_wide<R: Read>(
    reader: R,
    mappings: &[ColumnMapping],
) -> Result<(Vec<Observation>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers().context("reading CSV header")?.clone();
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim(), i))
        .collect();

    let date_idx = *index
        .get(WIDE_DATE_COLUMN)
        .with_context(|| format!("wide CSV has no '{WIDE_DATE_COLUMN}' column"))?;
    let validated_idx = index.get("VALIDATED").copied();

    let columns: Vec<(&ColumnMapping, Option<usize>, Option<usize>, Option<usize>)> = mappings
        .iter()
        .map(|m| {
            let col = |suffix: &str| {
                index
                    .get(format!("{}_{}", m.prefix, suffix).as_str())
                    .copied()
            };
            (m, col("FIRST_DOSE"), col("SECOND_DOSE"), col("POPULATION"))
        })
        .collect();
    for (m, first, second, _) in &columns {
        if first.is_none() || second.is_none() {
            warn!(prefix = %m.prefix, "Column mapping has no matching dose columns");
        }
    }

    let mut report = LoadReport::default();
    let mut rows = Vec::new();
    let mut record = StringRecord::new();

    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                report.total_rows += 1;
                report.parse_errors += 1;
                debug!(error = %e, "Skipping malformed row");
                continue;
            }
        }
        report.total_rows += 1;

        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i));
        if let Some(v) = cell(validated_idx).map(str::trim) {
            if !v.is_empty() && !v.eq_ignore_ascii_case("Y") {
                report.unvalidated_rows += 1;
                continue;
            }
        }
        let Some(date) = parse_date(record.get(date_idx)) else {
            report.parse_errors += 1;
            continue;
        };

        for (m, first, second, pop) in &columns {
            let (Some(dose1_count), Some(dose2_count)) =
                (parse_count(cell(*first)), parse_count(cell(*second)))
            else {
                report.parse_errors += 1;
                continue;
            };
            rows.push(Observation {
                date,
                region: m.region.clone(),
                age_lower: m.age_lower,
                age_upper: m.age_upper,
                dose1_count,
                dose2_count,
                population: parse_count(cell(*pop)).or(m.population),
            });
        }
    }

    report.kept_rows = rows.len();
    Ok((rows, report))
}

/// Loads a fetched snapshot in the layout named by `settings`.
pub fn load_source(bytes: &[u8], settings: &Settings) -> Result<(Vec<Observation>, LoadReport)> {
    let (rows, report) = match settings.source_format {
        SourceFormat::Long => load_long(bytes)?,
        SourceFormat::Wide => load_wide(bytes, &settings.column_mappings)?,
    };
    info!(
        total_rows = report.total_rows,
        kept_rows = report.kept_rows,
        unvalidated_rows = report.unvalidated_rows,
        parse_errors = report.parse_errors,
        "Loaded observations"
    );
    Ok((rows, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LONG_HEADER: &str = "DATE_AS_AT,STATE,AGE_LOWER,AGE_UPPER,\
        AIR_RESIDENCE_FIRST_DOSE_COUNT,AIR_RESIDENCE_SECOND_DOSE_COUNT,\
        AIR_RESIDENCE_FIRST_DOSE_APPROX_COUNT,AIR_RESIDENCE_SECOND_DOSE_APPROX_COUNT,\
        ABS_ERP_JUN_2020_POP,VALIDATED,URL";

    fn long_csv(rows: &[&str]) -> String {
        let mut s = LONG_HEADER.to_string();
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s
    }

    #[test]
    fn test_load_long_basic_row() {
        let csv = long_csv(&["2021-09-01,VIC,30,34,,,250000,120000,480000,Y,http://x"]);
        let (rows, report) = load_long(csv.as_bytes()).unwrap();
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.kept_rows, 1);
        assert_eq!(
            rows[0],
            Observation {
                date: NaiveDate::from_ymd_opt(2021, 9, 1).unwrap(),
                region: "VIC".to_string(),
                age_lower: 30,
                age_upper: 34,
                dose1_count: 250000,
                dose2_count: 120000,
                population: Some(480000),
            }
        );
    }

    #[test]
    fn test_load_long_prefers_exact_counts_for_open_bands() {
        let csv = long_csv(&["2021-09-01,VIC,16,999,4100001,2500002,4100000,2500000,5400000,Y,"]);
        let (rows, _) = load_long(csv.as_bytes()).unwrap();
        assert_eq!(rows[0].dose1_count, 4100001);
        assert_eq!(rows[0].dose2_count, 2500002);
    }

    #[test]
    fn test_load_long_falls_back_to_exact_counts() {
        let csv = long_csv(&["2021-09-01,VIC,30,34,10,5,,,100,Y,"]);
        let (rows, _) = load_long(csv.as_bytes()).unwrap();
        assert_eq!((rows[0].dose1_count, rows[0].dose2_count), (10, 5));
    }

    #[test]
    fn test_load_long_skips_unvalidated_and_bad_rows() {
        let csv = long_csv(&[
            "2021-09-01,VIC,30,34,,,10,5,100,N,",
            "not-a-date,VIC,30,34,,,10,5,100,Y,",
            "2021-09-01,VIC,30,34,,,-10,5,100,Y,",
            "2021-09-01,NSW,30,34,,,10,5,,Y,",
        ]);
        let (rows, report) = load_long(csv.as_bytes()).unwrap();
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.unvalidated_rows, 1);
        assert_eq!(report.parse_errors, 2);
        assert_eq!(report.kept_rows, 1);
        assert_eq!(rows[0].region, "NSW");
        assert_eq!(rows[0].population, None);
    }

    #[test]
    fn test_load_wide_uses_mapping_table() {
        let csv = "DATE_AS_AT,VIC_30_34_FIRST_DOSE,VIC_30_34_SECOND_DOSE,\
                   VIC_16_PLUS_FIRST_DOSE,VIC_16_PLUS_SECOND_DOSE,VIC_16_PLUS_POPULATION\n\
                   2021-09-01,100,50,1000,400,5000\n\
                   2021-09-02,110,55,1100,,5000\n";
        let mappings = vec![
            ColumnMapping {
                prefix: "VIC_30_34".to_string(),
                region: "VIC".to_string(),
                age_lower: 30,
                age_upper: 34,
                population: Some(480),
            },
            ColumnMapping {
                prefix: "VIC_16_PLUS".to_string(),
                region: "VIC".to_string(),
                age_lower: 16,
                age_upper: 999,
                population: None,
            },
        ];
        let (rows, report) = load_wide(csv.as_bytes(), &mappings).unwrap();
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].population, Some(480));
        assert_eq!(rows[1].population, Some(5000));
        assert_eq!(rows[1].age_upper, 999);
        assert_eq!(rows[2].dose1_count, 110);
    }

    #[test]
    fn test_load_wide_requires_date_column() {
        let csv = "DAY,X_FIRST_DOSE\n2021-09-01,1\n";
        assert!(load_wide(csv.as_bytes(), &[]).is_err());
    }
}
