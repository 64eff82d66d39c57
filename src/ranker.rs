//! Cross-sectional ranking of one snapshot date.

use anyhow::{Result, anyhow, bail};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

use crate::config::EngineConfig;
use crate::projection::{MilestoneDate, resolve_milestone};
use crate::types::{DerivedRow, Dose, Milestone};

/// Most recent date present in `table`.
pub fn latest_snapshot(table: &[DerivedRow]) -> Option<NaiveDate> {
    table.iter().map(|r| r.date).max()
}

/// Rows dated `date`, in table order.
pub fn snapshot_at(table: &[DerivedRow], date: NaiveDate) -> Vec<&DerivedRow> {
    table.iter().filter(|r| r.date == date).collect()
}

/// The date-sorted history of one group up to and including `upto`.
pub fn group_series(
    table: &[DerivedRow],
    region: &str,
    age_group: &str,
    upto: NaiveDate,
) -> Vec<DerivedRow> {
    let mut series: Vec<DerivedRow> = table
        .iter()
        .filter(|r| r.region == region && r.age_group == age_group && r.date <= upto)
        .cloned()
        .collect();
    series.sort_by_key(|r| r.date);
    series
}

/// 1-based ranks, highest value first. Equal values keep input order.
/// Missing (or NaN) values get no rank.
pub fn rank_first_desc(values: &[Option<f64>]) -> Vec<Option<usize>> {
    let mut order: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| !x.is_nan()).map(|x| (i, x)))
        .collect();
    // sort_by is stable, so ties stay in input order.
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut ranks = vec![None; values.len()];
    for (rank, (i, _)) in order.into_iter().enumerate() {
        ranks[i] = Some(rank + 1);
    }
    ranks
}

/// 1-based ranks, smallest value first. Equal values share the lowest rank
/// of their tie group. Missing values get no rank.
pub fn rank_min_asc<T: Ord>(values: &[Option<T>]) -> Vec<Option<usize>> {
    values
        .iter()
        .map(|v| {
            v.as_ref().map(|x| {
                1 + values
                    .iter()
                    .flatten()
                    .filter(|other| *other < x)
                    .count()
            })
        })
        .collect()
}

/// Resolved date and rank of one group for one dose milestone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneRank {
    pub dose: Dose,
    pub milestone: Milestone,
    pub resolution: MilestoneDate,
    pub rank: Option<usize>,
}

/// One group on the snapshot date with its ranks within the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankRow {
    pub date: NaiveDate,
    pub region: String,
    pub age_group: String,
    pub population: Option<u64>,
    pub vac_rate: Option<f64>,
    pub ma7_vac_rate: Option<f64>,
    pub dose1_pct: Option<f64>,
    pub dose2_pct: Option<f64>,
    pub vac_rate_rank: Option<usize>,
    pub dose1_pct_rank: Option<usize>,
    pub dose2_pct_rank: Option<usize>,
    pub milestones: Vec<MilestoneRank>,
}

/// A metric a snapshot is ranked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    VacRate,
    Dose1Pct,
    Dose2Pct,
    Milestone(Dose, Milestone),
}

impl std::fmt::Display for RankMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankMetric::VacRate => write!(f, "vac_rate"),
            RankMetric::Dose1Pct => write!(f, "dose1_pct"),
            RankMetric::Dose2Pct => write!(f, "dose2_pct"),
            RankMetric::Milestone(dose, m) => write!(f, "eta_{}_{}", dose.label(), m.percent()),
        }
    }
}

impl RankRow {
    pub fn milestone(&self, dose: Dose, milestone: Milestone) -> Option<&MilestoneRank> {
        self.milestones
            .iter()
            .find(|m| m.dose == dose && m.milestone == milestone)
    }

    pub fn resolution(&self, dose: Dose, milestone: Milestone) -> MilestoneDate {
        self.milestone(dose, milestone)
            .map(|m| m.resolution)
            .unwrap_or(MilestoneDate::NoProjection)
    }

    pub fn rank(&self, metric: RankMetric) -> Option<usize> {
        match metric {
            RankMetric::VacRate => self.vac_rate_rank,
            RankMetric::Dose1Pct => self.dose1_pct_rank,
            RankMetric::Dose2Pct => self.dose2_pct_rank,
            RankMetric::Milestone(dose, m) => self.milestone(dose, m).and_then(|r| r.rank),
        }
    }

    /// Where the group stands against the dose-2 milestones on its date.
    pub fn state(&self) -> MilestoneState {
        MilestoneState::classify(
            self.resolution(Dose::Second, Milestone::P70),
            self.resolution(Dose::Second, Milestone::P80),
            self.date,
        )
    }
}

/// Ranks every group present on `date` (the latest date when `None`).
///
/// Rate and coverage ranks put the highest value first with ties in table
/// order; milestone ranks order resolved dates with ties sharing a rank.
/// The result is sorted by `vac_rate_rank`, unranked rows last.
///
/// # Errors
///
/// Returns an error if the table is empty or has no rows on `date`.
pub fn rank_snapshot(
    table: &[DerivedRow],
    date: Option<NaiveDate>,
    cfg: &EngineConfig,
) -> Result<Vec<RankRow>> {
    let date = date
        .or_else(|| latest_snapshot(table))
        .ok_or_else(|| anyhow!("cannot rank an empty table"))?;
    let snapshot = snapshot_at(table, date);
    if snapshot.is_empty() {
        bail!("no observations on {date}");
    }
    debug!(%date, groups = snapshot.len(), "Ranking snapshot");

    let column =
        |f: fn(&DerivedRow) -> Option<f64>| snapshot.iter().map(|r| f(r)).collect::<Vec<_>>();
    let vac_rate_ranks = rank_first_desc(&column(|r| r.vac_rate));
    let dose1_ranks = rank_first_desc(&column(|r| r.dose1_pct));
    let dose2_ranks = rank_first_desc(&column(|r| r.dose2_pct));

    // resolutions[g][k] follows Dose::ALL x Milestone::ALL.
    let resolutions: Vec<Vec<MilestoneDate>> = snapshot
        .iter()
        .map(|row| {
            let series = group_series(table, &row.region, &row.age_group, date);
            let index = series.len().saturating_sub(1);
            Dose::ALL
                .into_iter()
                .flat_map(|dose| Milestone::ALL.into_iter().map(move |m| (dose, m)))
                .map(|(dose, m)| resolve_milestone(&series, index, dose, m, cfg))
                .collect()
        })
        .collect();

    let targets: Vec<(Dose, Milestone)> = Dose::ALL
        .into_iter()
        .flat_map(|dose| Milestone::ALL.into_iter().map(move |m| (dose, m)))
        .collect();
    let milestone_ranks: Vec<Vec<Option<usize>>> = (0..targets.len())
        .map(|k| {
            let dates: Vec<Option<NaiveDate>> = resolutions.iter().map(|r| r[k].date()).collect();
            rank_min_asc(&dates)
        })
        .collect();

    let mut rows: Vec<RankRow> = snapshot
        .iter()
        .enumerate()
        .map(|(g, row)| RankRow {
            date,
            region: row.region.clone(),
            age_group: row.age_group.clone(),
            population: row.population,
            vac_rate: row.vac_rate,
            ma7_vac_rate: row.ma7_vac_rate,
            dose1_pct: row.dose1_pct,
            dose2_pct: row.dose2_pct,
            vac_rate_rank: vac_rate_ranks[g],
            dose1_pct_rank: dose1_ranks[g],
            dose2_pct_rank: dose2_ranks[g],
            milestones: targets
                .iter()
                .enumerate()
                .map(|(k, &(dose, milestone))| MilestoneRank {
                    dose,
                    milestone,
                    resolution: resolutions[g][k],
                    rank: milestone_ranks[k][g],
                })
                .collect(),
        })
        .collect();
    rows.sort_by_key(|r| (r.vac_rate_rank.is_none(), r.vac_rate_rank));
    Ok(rows)
}

/// The leader on `metric`. When several rows share rank 1 the first in
/// `rows` is returned.
pub fn best_in_class(rows: &[RankRow], metric: RankMetric) -> Option<&RankRow> {
    rows.iter().find(|r| r.rank(metric) == Some(1))
}

/// Progress against the 70% and 80% dose-2 milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    Below70,
    Reached70,
    Reached80,
}

impl MilestoneState {
    pub fn classify(seventy: MilestoneDate, eighty: MilestoneDate, on: NaiveDate) -> Self {
        if eighty.is_reached_by(on) {
            MilestoneState::Reached80
        } else if seventy.is_reached_by(on) {
            MilestoneState::Reached70
        } else {
            MilestoneState::Below70
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::derive_table;
    use crate::types::{AgeGroupKind, GroupObservation};
    use chrono::Duration;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 9, 1).unwrap() + Duration::days(n)
    }

    fn group(
        region: &str,
        dose1: &[u64],
        dose2: &[u64],
        population: Option<u64>,
    ) -> Vec<GroupObservation> {
        dose1
            .iter()
            .zip(dose2)
            .enumerate()
            .map(|(i, (&d1, &d2))| GroupObservation {
                date: day(i as i64),
                region: region.to_string(),
                age_group: "16_or_above".to_string(),
                kind: AgeGroupKind::Cohort,
                dose1_count: d1,
                dose2_count: d2,
                population,
            })
            .collect()
    }

    fn linear(start: u64, step: u64, n: u64) -> Vec<u64> {
        (0..n).map(|i| start + i * step).collect()
    }

    #[test]
    fn test_rank_first_desc_ties_keep_input_order() {
        let ranks = rank_first_desc(&[Some(1.5), Some(3.0), None, Some(3.0), Some(0.2)]);
        assert_eq!(ranks, vec![Some(3), Some(1), None, Some(2), Some(4)]);
    }

    #[test]
    fn test_rank_min_asc_ties_share_rank() {
        let ranks = rank_min_asc(&[Some(day(5)), Some(day(2)), Some(day(2)), None, Some(day(9))]);
        assert_eq!(ranks, vec![Some(3), Some(1), Some(1), None, Some(4)]);
    }

    #[test]
    fn test_snapshot_helpers() {
        let obs = group("VIC", &[1, 2, 3], &[0, 1, 2], Some(10));
        let table = derive_table(&obs, &EngineConfig::default()).unwrap();
        assert_eq!(latest_snapshot(&table), Some(day(2)));
        assert_eq!(snapshot_at(&table, day(1)).len(), 1);
        assert!(latest_snapshot(&[]).is_none());
        assert_eq!(group_series(&table, "VIC", "16_or_above", day(1)).len(), 2);
    }

    #[test]
    fn test_rank_snapshot() {
        let mut obs = group("NSW", &linear(500, 20, 9), &linear(400, 10, 9), Some(1000));
        obs.extend(group("VIC", &linear(600, 10, 9), &linear(750, 10, 9), Some(1000)));
        obs.extend(group("WA", &linear(300, 5, 9), &[0; 9], None));
        let cfg = EngineConfig::default();
        let table = derive_table(&obs, &cfg).unwrap();

        let rows = rank_snapshot(&table, None, &cfg).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.date == day(8)));

        // Sorted by vac_rate rank; WA has no population, so no rate and no rank.
        let regions: Vec<&str> = rows.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(regions, vec!["NSW", "VIC", "WA"]);
        assert_eq!(rows[0].vac_rate, Some(3.0));
        assert_eq!(rows[1].vac_rate, Some(2.0));
        assert_eq!(rows[2].vac_rate_rank, None);

        // VIC leads on coverage: 68% and 83% against NSW's 66% and 48%.
        let vic = &rows[1];
        assert_eq!(vic.dose1_pct_rank, Some(1));
        assert_eq!(vic.dose2_pct_rank, Some(1));
        assert_eq!(best_in_class(&rows, RankMetric::Dose2Pct).unwrap().region, "VIC");
        assert_eq!(best_in_class(&rows, RankMetric::VacRate).unwrap().region, "NSW");

        // VIC crossed 80% on day 6, observed rather than projected.
        assert_eq!(vic.resolution(Dose::Second, Milestone::P80), MilestoneDate::Reached(day(6)));
        assert_eq!(vic.state(), MilestoneState::Reached80);
        assert_eq!(vic.rank(RankMetric::Milestone(Dose::Second, Milestone::P80)), Some(1));

        // NSW: (800 - 480) / 10 per day = 32 days out.
        let nsw = &rows[0];
        assert_eq!(nsw.resolution(Dose::Second, Milestone::P80), MilestoneDate::Projected(day(40)));
        assert_eq!(nsw.rank(RankMetric::Milestone(Dose::Second, Milestone::P80)), Some(2));
        assert_eq!(nsw.state(), MilestoneState::Below70);

        let wa = &rows[2];
        assert_eq!(wa.resolution(Dose::First, Milestone::P70), MilestoneDate::NoProjection);
        assert_eq!(wa.rank(RankMetric::Milestone(Dose::First, Milestone::P70)), None);
    }

    #[test]
    fn test_equal_rates_rank_in_table_order() {
        let mut obs = group("SA", &linear(100, 10, 3), &[0; 3], Some(1000));
        obs.extend(group("NT", &linear(100, 10, 3), &[0; 3], Some(1000)));
        let cfg = EngineConfig::default();
        let table = derive_table(&obs, &cfg).unwrap();
        let rows = rank_snapshot(&table, Some(day(2)), &cfg).unwrap();
        // Tables are ordered by region within a date, so NT comes first.
        assert_eq!(rows[0].region, "NT");
        assert_eq!(rows[0].vac_rate_rank, Some(1));
        assert_eq!(rows[1].vac_rate_rank, Some(2));
    }

    #[test]
    fn test_rank_snapshot_errors() {
        let cfg = EngineConfig::default();
        assert!(rank_snapshot(&[], None, &cfg).is_err());
        let table = derive_table(&group("VIC", &[1, 2], &[0, 1], Some(10)), &cfg).unwrap();
        assert!(rank_snapshot(&table, Some(day(30)), &cfg).is_err());
    }

    #[test]
    fn test_milestone_state() {
        let on = day(10);
        let none = MilestoneDate::NoProjection;
        let reached = MilestoneDate::Reached;
        assert_eq!(MilestoneState::classify(none, none, on), MilestoneState::Below70);
        assert_eq!(
            MilestoneState::classify(reached(day(3)), MilestoneDate::Projected(day(20)), on),
            MilestoneState::Reached70
        );
        assert_eq!(
            MilestoneState::classify(reached(day(3)), reached(day(8)), on),
            MilestoneState::Reached80
        );
    }
}
