//! Age-band normalizer.
//!
//! Maps raw `(age_lower, age_upper)` pairs onto named age groups, optionally
//! folds the 5-year bands into 10-year buckets, back-fills missing
//! populations and builds the synthetic `12_or_above` and
//! `total_population` cohorts.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::AgeBanding;
use crate::loader::OPEN_ENDED_UPPER;
use crate::types::{AgeGroupKind, GroupObservation, Observation};

pub const TWELVE_PLUS: &str = "12_or_above";
pub const SIXTEEN_PLUS: &str = "16_or_above";
pub const TWELVE_TO_FIFTEEN: &str = "12-15";
pub const TOTAL_POPULATION: &str = "total_population";

/// 5-year band → 10-year bucket. The two oldest raw bands both fold into `80+`.
static DECADE_BUCKETS: &[((u16, u16), &str)] = &[
    ((16, 19), "16-29"),
    ((20, 24), "16-29"),
    ((25, 29), "16-29"),
    ((30, 34), "30-39"),
    ((35, 39), "30-39"),
    ((40, 44), "40-49"),
    ((45, 49), "40-49"),
    ((50, 54), "50-59"),
    ((55, 59), "50-59"),
    ((60, 64), "60-69"),
    ((65, 69), "60-69"),
    ((70, 74), "70-79"),
    ((75, 79), "70-79"),
    ((80, 84), "80+"),
    ((85, 89), "80+"),
    ((90, 94), "80+"),
    ((95, OPEN_ENDED_UPPER), "80+"),
];

/// Canonical label for a raw band.
///
/// Open-ended bands read `"{lower}_or_above"`, except the whole-population
/// `0-999` row which keeps its numeric name.
pub fn age_group_label(lower: u16, upper: u16) -> String {
    if upper == OPEN_ENDED_UPPER && lower != 0 {
        format!("{lower}_or_above")
    } else {
        format!("{lower}-{upper}")
    }
}

pub fn decade_bucket(lower: u16, upper: u16) -> Option<&'static str> {
    DECADE_BUCKETS
        .iter()
        .find(|(bounds, _)| *bounds == (lower, upper))
        .map(|(_, label)| *label)
}

/// Inclusive bounds encoded in a label (`"30-34"`, `"80+"`, `"16_or_above"`).
pub fn age_bounds(label: &str) -> Option<(u16, u16)> {
    if let Some(lower) = label.strip_suffix('+').or_else(|| label.strip_suffix("_or_above")) {
        return Some((lower.parse().ok()?, OPEN_ENDED_UPPER));
    }
    let (lower, upper) = label.split_once('-')?;
    Some((lower.parse().ok()?, upper.parse().ok()?))
}

/// Finds the group containing `age`, defaulting to the last group when none does.
pub fn find_age_group<'a>(groups: &'a [String], age: u16) -> Option<&'a str> {
    groups
        .iter()
        .find(|g| matches!(age_bounds(g), Some((lo, hi)) if (lo..=hi).contains(&age)))
        .or_else(|| groups.last())
        .map(String::as_str)
}

/// Fills a band's missing population with the largest population reported
/// for the same region and band on any later date. Populations are assumed
/// not to shrink over the observation window.
pub fn backfill_population(rows: &mut [Observation]) -> usize {
    let mut by_band: HashMap<(String, u16, u16), Vec<usize>> = HashMap::new();
    for (i, r) in rows.iter().enumerate() {
        by_band
            .entry((r.region.clone(), r.age_lower, r.age_upper))
            .or_default()
            .push(i);
    }

    let mut filled = 0usize;
    for indices in by_band.values_mut() {
        indices.sort_by_key(|&i| std::cmp::Reverse(rows[i].date));
        let mut later_max: Option<u64> = None;
        let mut pending: Vec<usize> = Vec::new();
        let mut last_date: Option<NaiveDate> = None;
        for &i in indices.iter() {
            // Rows sharing a date do not count as "later" for each other.
            if last_date != Some(rows[i].date) {
                for &p in &pending {
                    later_max = later_max.max(rows[p].population);
                }
                pending.clear();
                last_date = Some(rows[i].date);
            }
            if rows[i].population.is_none() && later_max.is_some() {
                rows[i].population = later_max;
                filled += 1;
            } else {
                pending.push(i);
            }
        }
    }
    filled
}

fn sum_population(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    Some(a? + b?)
}

/// Classifies and labels each raw row.
fn classify(rows: &[Observation], banding: AgeBanding) -> Vec<GroupObservation> {
    // An open-ended row is the oldest band of the partition when it starts
    // above every bounded band of its region.
    let mut max_bounded_upper: HashMap<&str, u16> = HashMap::new();
    for r in rows.iter().filter(|r| r.age_upper != OPEN_ENDED_UPPER) {
        let e = max_bounded_upper.entry(r.region.as_str()).or_insert(0);
        *e = (*e).max(r.age_upper);
    }

    rows.iter()
        .map(|r| {
            let above_bounded = max_bounded_upper
                .get(r.region.as_str())
                .is_some_and(|&top| r.age_lower > top);
            let kind = if r.age_upper != OPEN_ENDED_UPPER {
                AgeGroupKind::Band
            } else if r.age_lower == 0 {
                AgeGroupKind::CatchAll
            } else if above_bounded {
                AgeGroupKind::Band
            } else {
                AgeGroupKind::Cohort
            };
            let age_group = match (banding, kind) {
                (AgeBanding::Decade, AgeGroupKind::Band) => decade_bucket(r.age_lower, r.age_upper)
                    .map(str::to_string)
                    .unwrap_or_else(|| age_group_label(r.age_lower, r.age_upper)),
                _ => age_group_label(r.age_lower, r.age_upper),
            };
            GroupObservation {
                date: r.date,
                region: r.region.clone(),
                age_group,
                kind,
                dose1_count: r.dose1_count,
                dose2_count: r.dose2_count,
                population: r.population,
            }
        })
        .collect()
}

/// `(date, region, age_group)`
type GroupDay = (NaiveDate, String, String);

/// Sums counts and populations of rows sharing (date, region, age_group).
fn aggregate(rows: Vec<GroupObservation>) -> BTreeMap<GroupDay, GroupObservation> {
    let mut out: BTreeMap<GroupDay, GroupObservation> = BTreeMap::new();
    for r in rows {
        let key = (r.date, r.region.clone(), r.age_group.clone());
        match out.get_mut(&key) {
            Some(acc) => {
                acc.dose1_count += r.dose1_count;
                acc.dose2_count += r.dose2_count;
                acc.population = sum_population(acc.population, r.population);
            }
            None => {
                out.insert(key, r);
            }
        }
    }
    out
}

/// Adds `12_or_above` (12-15 plus 16+) and, when a reference table is given,
/// `total_population` (the same counts over the whole-of-region population).
fn add_synthetic_cohorts(
    groups: &mut BTreeMap<GroupDay, GroupObservation>,
    population_reference: &BTreeMap<String, u64>,
) {
    let mut synthetic = Vec::new();
    for ((date, region, age_group), young) in groups.iter() {
        if age_group != TWELVE_TO_FIFTEEN {
            continue;
        }
        let Some(adult) = groups.get(&(*date, region.clone(), SIXTEEN_PLUS.to_string())) else {
            continue;
        };
        let twelve_plus = GroupObservation {
            date: *date,
            region: region.clone(),
            age_group: TWELVE_PLUS.to_string(),
            kind: AgeGroupKind::Synthetic,
            dose1_count: young.dose1_count + adult.dose1_count,
            dose2_count: young.dose2_count + adult.dose2_count,
            population: sum_population(young.population, adult.population),
        };
        if !population_reference.is_empty() {
            synthetic.push(GroupObservation {
                age_group: TOTAL_POPULATION.to_string(),
                population: population_reference.get(region).copied(),
                ..twelve_plus.clone()
            });
        }
        synthetic.push(twelve_plus);
    }
    for g in synthetic {
        groups.insert((g.date, g.region.clone(), g.age_group.clone()), g);
    }
}

/// Runs the full normalization: back-fill, labelling, re-aggregation and
/// synthetic cohorts. Output is ordered by (date, region, age_group).
pub fn normalize(
    observations: &[Observation],
    banding: AgeBanding,
    population_reference: &BTreeMap<String, u64>,
) -> Vec<GroupObservation> {
    let mut rows = observations.to_vec();
    let filled = backfill_population(&mut rows);
    if filled > 0 {
        debug!(filled, "Back-filled missing populations");
    }

    let mut groups = aggregate(classify(&rows, banding));
    add_synthetic_cohorts(&mut groups, population_reference);
    groups.into_values().collect()
}
