//! Derived-metrics engine.
//!
//! Every (region, age_group) series is derived independently from its own
//! date-sorted observations: day-over-day deltas, clipped deltas, trailing
//! moving averages, coverage percentages, daily rates and days-to-milestone
//! projections.
//!
//! Negative deltas come from upstream corrections (re-classification between
//! bands, retroactive fixes). They are clipped to zero before they reach any
//! average or rate, so a genuine administrative reversal is absorbed too.

use anyhow::{Result, bail};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::EngineConfig;
use crate::types::{DerivedRow, Dose, GroupObservation, Milestone};
use crate::util::{mean, percentage, round_to};

/// Mean of the `window` values ending at `i`, undefined unless every value
/// in the window is defined.
fn trailing_mean(values: &[Option<f64>], i: usize, window: usize) -> Option<f64> {
    if window == 0 || i + 1 < window {
        return None;
    }
    let slice = values[i + 1 - window..=i]
        .iter()
        .copied()
        .collect::<Option<Vec<f64>>>()?;
    mean(&slice)
}

/// Replaces an exactly-zero average with `floor` so later divisions stay finite.
fn floor_zero(value: Option<f64>, floor: f64) -> Option<f64> {
    value.map(|v| if v == 0.0 { floor } else { v })
}

/// Days until `count` reaches `milestone` of `population` at `pace` per day.
/// Negative once the milestone has already been passed.
pub fn eta_days(population: u64, count: u64, pace: f64, milestone: Milestone) -> Option<f64> {
    if !pace.is_finite() || pace <= 0.0 {
        return None;
    }
    let target = milestone.percent() / 100.0 * population as f64;
    let eta = (target - count as f64) / pace;
    eta.is_finite().then_some(eta)
}

/// Derives one series. `series` must hold a single (region, age_group) and be
/// sorted by date; use [`derive_table`] for unsorted, mixed input.
pub fn derive_series(series: &[GroupObservation], cfg: &EngineConfig) -> Vec<DerivedRow> {
    let mut rows: Vec<DerivedRow> = series.iter().map(DerivedRow::from_observation).collect();

    for i in 1..rows.len() {
        let d1 = rows[i].dose1_count as i64 - rows[i - 1].dose1_count as i64;
        let d2 = rows[i].dose2_count as i64 - rows[i - 1].dose2_count as i64;
        let row = &mut rows[i];
        row.delta_dose1 = Some(d1);
        row.delta_dose2 = Some(d2);
        row.delta_dose12 = Some(d1 + d2);
        row.delta_dose1_mod = Some(d1.max(0) as u64);
        row.delta_dose2_mod = Some(d2.max(0) as u64);
    }

    for row in rows.iter_mut() {
        // A zero population is as unusable as a missing one.
        let Some(pop) = row.population.filter(|&p| p > 0) else {
            continue;
        };
        let pop_f = pop as f64;
        let pct = |count: f64| percentage(count, pop_f).map(|p| round_to(p, cfg.precision));
        let rate = |count: Option<u64>| count.and_then(|c| pct(c as f64)).map(|r| r.max(0.0));

        row.dose1_pct = pct(row.dose1_count as f64);
        row.dose2_pct = pct(row.dose2_count as f64);
        let unvac = pop as i64 - row.dose1_count as i64;
        row.unvac = Some(unvac);
        row.unvac_pct = pct(unvac as f64);

        let combined = match (row.delta_dose1_mod, row.delta_dose2_mod) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        row.vac_rate = rate(combined);
        row.vac_rate_dose1 = rate(row.delta_dose1_mod);
        row.vac_rate_dose2 = rate(row.delta_dose2_mod);
    }

    let window = cfg.ma_window;
    let column = |f: fn(&DerivedRow) -> Option<f64>| rows.iter().map(f).collect::<Vec<_>>();
    let mod1 = column(|r| r.delta_dose1_mod.map(|v| v as f64));
    let mod2 = column(|r| r.delta_dose2_mod.map(|v| v as f64));
    let rate12 = column(|r| r.vac_rate);
    let rate1 = column(|r| r.vac_rate_dose1);
    let rate2 = column(|r| r.vac_rate_dose2);

    for i in 0..rows.len() {
        let smoothed_rate = |values: &[Option<f64>]| {
            floor_zero(trailing_mean(values, i, window), cfg.ma_floor)
                .map(|v| round_to(v, cfg.precision))
        };
        let row = &mut rows[i];
        row.ma7_dose1 = floor_zero(trailing_mean(&mod1, i, window), cfg.ma_floor);
        row.ma7_dose2 = floor_zero(trailing_mean(&mod2, i, window), cfg.ma_floor);
        row.ma7_vac_rate = smoothed_rate(&rate12);
        row.ma7_dose1_vac_rate = smoothed_rate(&rate1);
        row.ma7_dose2_vac_rate = smoothed_rate(&rate2);

        let Some(pop) = row.population.filter(|&p| p > 0) else {
            continue;
        };
        for dose in Dose::ALL {
            let Some(pace) = row.ma7(dose) else {
                continue;
            };
            let count = row.count(dose);
            for milestone in Milestone::ALL {
                *row.eta_mut(dose, milestone) = eta_days(pop, count, pace, milestone);
            }
        }
    }

    rows
}

/// Partitions `rows` by (region, age_group), sorts each partition by date and
/// derives it. Partitions are independent and derived in parallel; the
/// output is ordered by (date, region, age_group).
///
/// # Errors
///
/// Returns an error if a group reports the same date twice.
pub fn derive_table(rows: &[GroupObservation], cfg: &EngineConfig) -> Result<Vec<DerivedRow>> {
    let mut partitions: BTreeMap<(&str, &str), Vec<GroupObservation>> = BTreeMap::new();
    for r in rows {
        partitions
            .entry((r.region.as_str(), r.age_group.as_str()))
            .or_default()
            .push(r.clone());
    }

    for ((region, age_group), series) in partitions.iter_mut() {
        series.sort_by_key(|r| r.date);
        if let Some(pair) = series.windows(2).find(|w| w[0].date == w[1].date) {
            bail!(
                "duplicate observation for region '{}' age group '{}' on {}",
                region,
                age_group,
                pair[0].date
            );
        }
    }
    debug!(groups = partitions.len(), rows = rows.len(), "Deriving series");

    let mut derived: Vec<DerivedRow> = partitions
        .into_par_iter()
        .map(|(_, series)| derive_series(&series, cfg))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();
    derived.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.region.cmp(&b.region))
            .then_with(|| a.age_group.cmp(&b.age_group))
    });
    Ok(derived)
}
