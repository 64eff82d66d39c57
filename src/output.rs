//! Output formatting and persistence for derived tables and rankings.
//!
//! Tables are written as CSV with the derived column names; rankings and
//! comparisons as JSON.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use tracing::{debug, info};

use crate::projection::MilestoneDate;
use crate::ranker::{RankMetric, RankRow};
use crate::types::{DerivedRow, Dose, Milestone};

/// Serializes `rows` as CSV with a header line.
pub fn write_csv<W: Write, S: Serialize>(writer: W, rows: &[S]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a derived table to `path`, replacing any existing file.
pub fn write_table_csv(path: &str, rows: &[DerivedRow]) -> Result<()> {
    debug!(path, rows = rows.len(), "Writing table CSV");
    let file = File::create(path).with_context(|| format!("creating '{path}'"))?;
    write_csv(file, rows).with_context(|| format!("writing '{path}'"))
}

/// Writes `value` as pretty-printed JSON to `path`.
pub fn write_json<S: Serialize + ?Sized>(path: &str, value: &S) -> Result<()> {
    debug!(path, "Writing JSON");
    let file = File::create(path).with_context(|| format!("creating '{path}'"))?;
    serde_json::to_writer_pretty(file, value).with_context(|| format!("writing '{path}'"))?;
    Ok(())
}

/// Logs `value` as pretty-printed JSON.
pub fn print_json<S: Serialize + ?Sized>(value: &S) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A [`RankRow`] flattened to one CSV line, with the dose-2 70% and 80%
/// milestones as columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankRecord {
    pub date: NaiveDate,
    pub region: String,
    pub age_group: String,
    pub vac_rate: Option<f64>,
    pub dose1_pct: Option<f64>,
    pub dose2_pct: Option<f64>,
    pub vac_rate_rank: Option<usize>,
    pub dose1_pct_rank: Option<usize>,
    pub dose2_pct_rank: Option<usize>,
    pub eta_dose2_70_date: Option<NaiveDate>,
    pub eta_dose2_70_reached: bool,
    pub eta_dose2_70_rank: Option<usize>,
    pub eta_dose2_80_date: Option<NaiveDate>,
    pub eta_dose2_80_reached: bool,
    pub eta_dose2_80_rank: Option<usize>,
}

impl From<&RankRow> for RankRecord {
    fn from(row: &RankRow) -> Self {
        let resolved = |m| row.resolution(Dose::Second, m);
        let reached = |m| matches!(resolved(m), MilestoneDate::Reached(_));
        RankRecord {
            date: row.date,
            region: row.region.clone(),
            age_group: row.age_group.clone(),
            vac_rate: row.vac_rate,
            dose1_pct: row.dose1_pct,
            dose2_pct: row.dose2_pct,
            vac_rate_rank: row.vac_rate_rank,
            dose1_pct_rank: row.dose1_pct_rank,
            dose2_pct_rank: row.dose2_pct_rank,
            eta_dose2_70_date: resolved(Milestone::P70).date(),
            eta_dose2_70_reached: reached(Milestone::P70),
            eta_dose2_70_rank: row.rank(RankMetric::Milestone(Dose::Second, Milestone::P70)),
            eta_dose2_80_date: resolved(Milestone::P80).date(),
            eta_dose2_80_reached: reached(Milestone::P80),
            eta_dose2_80_rank: row.rank(RankMetric::Milestone(Dose::Second, Milestone::P80)),
        }
    }
}

pub fn write_rank_csv(path: &str, rows: &[RankRow]) -> Result<()> {
    let records: Vec<RankRecord> = rows.iter().map(RankRecord::from).collect();
    let file = File::create(path).with_context(|| format!("creating '{path}'"))?;
    write_csv(file, &records).with_context(|| format!("writing '{path}'"))
}
