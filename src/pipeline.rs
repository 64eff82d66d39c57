//! Loader output to derived tables.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::age_band::normalize;
use crate::config::Settings;
use crate::metrics::derive_table;
use crate::ranker::latest_snapshot;
use crate::types::{AgeGroupKind, DerivedRow, GroupObservation, Observation};

/// The three derived tables consumed by ranking and charting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tables {
    /// Whole-region cohorts (`16_or_above`, `0-999`, `12_or_above`, ...).
    pub region: Vec<DerivedRow>,
    /// Age bands summed across regions, under the national label.
    pub age_group: Vec<DerivedRow>,
    /// Age bands per region.
    pub region_age_group: Vec<DerivedRow>,
}

impl Tables {
    pub fn latest_date(&self) -> Option<NaiveDate> {
        latest_snapshot(&self.region).or_else(|| latest_snapshot(&self.region_age_group))
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty() && self.age_group.is_empty() && self.region_age_group.is_empty()
    }
}

/// Sums every band across regions other than `national` and files the totals
/// under `national`. A band missing its population anywhere has no total
/// population.
pub fn national_band_totals(groups: &[GroupObservation], national: &str) -> Vec<GroupObservation> {
    let mut totals: BTreeMap<(NaiveDate, &str), GroupObservation> = BTreeMap::new();
    for g in groups
        .iter()
        .filter(|g| g.kind == AgeGroupKind::Band && g.region != national)
    {
        totals
            .entry((g.date, g.age_group.as_str()))
            .and_modify(|acc| {
                acc.dose1_count += g.dose1_count;
                acc.dose2_count += g.dose2_count;
                acc.population = acc.population.zip(g.population).map(|(a, b)| a + b);
            })
            .or_insert_with(|| GroupObservation {
                region: national.to_string(),
                ..g.clone()
            });
    }
    totals.into_values().collect()
}

/// Normalizes `observations` and derives the region, age-group and
/// region-by-age-group tables.
///
/// # Errors
///
/// Returns an error if any group reports the same date twice.
pub fn build_tables(observations: &[Observation], settings: &Settings) -> Result<Tables> {
    let groups = normalize(observations, settings.banding, &settings.population_reference);

    let (bands, cohorts): (Vec<GroupObservation>, Vec<GroupObservation>) =
        groups.into_iter().partition(|g| g.kind == AgeGroupKind::Band);
    let national = national_band_totals(&bands, &settings.national_region);

    let tables = Tables {
        region: derive_table(&cohorts, &settings.engine)?,
        age_group: derive_table(&national, &settings.engine)?,
        region_age_group: derive_table(&bands, &settings.engine)?,
    };
    info!(
        region_rows = tables.region.len(),
        age_group_rows = tables.age_group.len(),
        region_age_group_rows = tables.region_age_group.len(),
        latest = ?tables.latest_date(),
        "Built tables"
    );
    Ok(tables)
}
