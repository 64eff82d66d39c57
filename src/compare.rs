//! Comparative summaries for one person's cohort.
//!
//! A [`Cohort`] names where someone lives, their age band and how many doses
//! they have had. Its group is ranked against the same group in every other
//! region and the result is rendered as short narrative text.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;

use crate::age_band::{age_bounds, find_age_group};
use crate::config::EngineConfig;
use crate::projection::{MilestoneDate, ProjectionInterval, project_dose2};
use crate::ranker::{
    MilestoneState, RankMetric, RankRow, best_in_class, group_series, latest_snapshot,
    rank_snapshot,
};
use crate::types::{DerivedRow, Dose, Milestone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VacStatus {
    Unvaccinated,
    OneDose,
    FullyVaccinated,
}

impl TryFrom<u8> for VacStatus {
    type Error = anyhow::Error;

    fn try_from(doses: u8) -> Result<Self> {
        match doses {
            0 => Ok(VacStatus::Unvaccinated),
            1 => Ok(VacStatus::OneDose),
            2 => Ok(VacStatus::FullyVaccinated),
            n => bail!("dose count must be 0, 1 or 2, got {n}"),
        }
    }
}

impl VacStatus {
    /// People in `row` sharing this status, and their share of the population.
    fn headcount(self, row: &DerivedRow) -> (Option<i64>, Option<f64>) {
        match self {
            VacStatus::Unvaccinated => (row.unvac, row.unvac_pct),
            VacStatus::OneDose => (Some(row.dose1_count as i64), row.dose1_pct),
            VacStatus::FullyVaccinated => (Some(row.dose2_count as i64), row.dose2_pct),
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            VacStatus::Unvaccinated => "have not had a dose yet",
            VacStatus::OneDose => "have had their first dose",
            VacStatus::FullyVaccinated => "are fully vaccinated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cohort {
    pub region: String,
    pub age_group: String,
    pub vac_status: VacStatus,
}

/// Rank-1 groups per metric among the compared peers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaders {
    pub vac_rate: Option<RankRow>,
    pub dose1_pct: Option<RankRow>,
    pub dose2_pct: Option<RankRow>,
    /// First to 70% fully vaccinated.
    pub dose2_70: Option<RankRow>,
}

impl Leaders {
    fn of(rows: &[RankRow]) -> Self {
        let leader = |metric| best_in_class(rows, metric).cloned();
        Leaders {
            vac_rate: leader(RankMetric::VacRate),
            dose1_pct: leader(RankMetric::Dose1Pct),
            dose2_pct: leader(RankMetric::Dose2Pct),
            dose2_70: leader(RankMetric::Milestone(Dose::Second, Milestone::P70)),
        }
    }
}

/// Ranks of an age group among the other age groups of its own region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalRank {
    pub field_size: usize,
    pub vac_rate_rank: Option<usize>,
    pub dose1_pct_rank: Option<usize>,
    pub dose2_pct_rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub cohort: Cohort,
    pub date: NaiveDate,
    /// Display name of the compared group, e.g. `VIC` or `35-39 in VIC`.
    pub subject: String,
    /// Set when the subject is one age band, so leaders are qualified by it.
    pub age_qualifier: Option<String>,
    pub field_size: usize,
    pub own: RankRow,
    pub status_count: Option<i64>,
    pub status_pct: Option<f64>,
    pub administered: Option<i64>,
    pub state: MilestoneState,
    /// Both dose-2 estimates for the 70% and 80% milestones.
    pub dose2_70: ProjectionInterval,
    pub dose2_80: ProjectionInterval,
    pub leaders: Leaders,
    pub local: Option<LocalRank>,
}

fn rows_for_age_group(table: &[DerivedRow], age_group: &str) -> Vec<DerivedRow> {
    table.iter().filter(|r| r.age_group == age_group).cloned().collect()
}

fn find_own<'a>(rows: &'a [RankRow], region: &str, age_group: &str) -> Result<&'a RankRow> {
    rows.iter()
        .find(|r| r.region == region && r.age_group == age_group)
        .with_context(|| format!("no data for age group '{age_group}' in region '{region}'"))
}

fn snapshot_row<'a>(table: &'a [DerivedRow], own: &RankRow) -> Result<&'a DerivedRow> {
    table
        .iter()
        .find(|r| r.date == own.date && r.region == own.region && r.age_group == own.age_group)
        .with_context(|| format!("missing snapshot row for '{}' on {}", own.region, own.date))
}

fn build(
    cohort: &Cohort,
    peers: &[DerivedRow],
    age_group: &str,
    age_qualifier: Option<String>,
    local: Option<LocalRank>,
    cfg: &EngineConfig,
) -> Result<Comparison> {
    let rows = rank_snapshot(peers, latest_snapshot(peers), cfg)
        .with_context(|| format!("ranking age group '{age_group}'"))?;
    let own = find_own(&rows, &cohort.region, age_group)?.clone();
    let derived = snapshot_row(peers, &own)?;
    let (status_count, status_pct) = cohort.vac_status.headcount(derived);
    let series = group_series(peers, &own.region, &own.age_group, own.date);
    let last = series.len().saturating_sub(1);
    let subject = match &age_qualifier {
        Some(band) => format!("{band} in {}", cohort.region),
        None => cohort.region.clone(),
    };

    Ok(Comparison {
        cohort: cohort.clone(),
        date: own.date,
        subject,
        age_qualifier,
        field_size: rows.len(),
        status_count,
        status_pct,
        administered: derived.delta_dose12,
        state: own.state(),
        dose2_70: project_dose2(&series, last, Milestone::P70, cfg),
        dose2_80: project_dose2(&series, last, Milestone::P80, cfg),
        leaders: Leaders::of(&rows),
        local,
        own,
    })
}

/// Compares the cohort's region against every other region on the
/// whole-region group `cohort_label` (e.g. `16_or_above`).
pub fn compare_region(
    cohort: &Cohort,
    region_table: &[DerivedRow],
    cohort_label: &str,
    cfg: &EngineConfig,
) -> Result<Comparison> {
    let peers = rows_for_age_group(region_table, cohort_label);
    build(cohort, &peers, cohort_label, None, None, cfg)
}

/// Compares the cohort's age band in its region against the same band in
/// other regions, and against the other bands of its own region.
pub fn compare_age_group(
    cohort: &Cohort,
    region_age_group_table: &[DerivedRow],
    cfg: &EngineConfig,
) -> Result<Comparison> {
    let peers = rows_for_age_group(region_age_group_table, &cohort.age_group);

    let neighbours: Vec<DerivedRow> = region_age_group_table
        .iter()
        .filter(|r| r.region == cohort.region)
        .cloned()
        .collect();
    let local_rows = rank_snapshot(&neighbours, latest_snapshot(&neighbours), cfg)
        .with_context(|| format!("ranking age groups in region '{}'", cohort.region))?;
    let local_own = find_own(&local_rows, &cohort.region, &cohort.age_group)?;
    let local = LocalRank {
        field_size: local_rows.len(),
        vac_rate_rank: local_own.vac_rate_rank,
        dose1_pct_rank: local_own.dose1_pct_rank,
        dose2_pct_rank: local_own.dose2_pct_rank,
    };

    build(
        cohort,
        &peers,
        &cohort.age_group,
        Some(cohort.age_group.clone()),
        Some(local),
        cfg,
    )
}

/// The age bands reported for `region`, youngest first.
pub fn region_age_groups(region_age_group_table: &[DerivedRow], region: &str) -> Vec<String> {
    let mut groups: Vec<String> = region_age_group_table
        .iter()
        .filter(|r| r.region == region)
        .map(|r| r.age_group.clone())
        .collect();
    groups.sort_by_key(|g| age_bounds(g));
    groups.dedup();
    groups
}

/// The band of `region` that contains `age`; the oldest band when none does.
pub fn age_group_for(
    region_age_group_table: &[DerivedRow],
    region: &str,
    age: u16,
) -> Result<String> {
    let groups = region_age_groups(region_age_group_table, region);
    find_age_group(&groups, age)
        .map(str::to_string)
        .with_context(|| format!("no age groups reported for region '{region}'"))
}

fn show<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn show_date(date: MilestoneDate) -> String {
    date.date()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "no projected date".to_string())
}

impl Comparison {
    fn is_own(&self, leader: &RankRow) -> bool {
        leader.region == self.own.region && leader.age_group == self.own.age_group
    }

    fn leader_name(&self, leader: &RankRow) -> String {
        match &self.age_qualifier {
            Some(band) => format!("{band} in {}", leader.region),
            None => leader.region.clone(),
        }
    }

    /// `praise` when the subject leads, otherwise the leader and its value.
    fn versus(
        &self,
        leader: Option<&RankRow>,
        praise: &str,
        value: impl Fn(&RankRow) -> Option<f64>,
        what: &str,
    ) -> String {
        match leader {
            Some(l) if self.is_own(l) => praise.to_string(),
            Some(l) => format!("{} {what} at {}%.", self.leader_name(l), show(value(l))),
            None => String::new(),
        }
    }

    fn milestone_leader_line(&self) -> String {
        let Some(leader) = &self.leaders.dose2_70 else {
            return String::new();
        };
        let d70 = show_date(leader.resolution(Dose::Second, Milestone::P70));
        let d80 = show_date(leader.resolution(Dose::Second, Milestone::P80));
        if self.is_own(leader) {
            return match self.state {
                MilestoneState::Below70 => "First in line for 70%, mark the date.".to_string(),
                MilestoneState::Reached70 => "First past 70%, on to 80%.".to_string(),
                MilestoneState::Reached80 => "First past both marks, well done.".to_string(),
            };
        }
        let name = self.leader_name(leader);
        match leader.state() {
            MilestoneState::Below70 => {
                format!("{name} is on track for 70% on {d70} and 80% on {d80}.")
            }
            MilestoneState::Reached70 => {
                format!("{name} passed 70% on {d70} and is on track for 80% on {d80}.")
            }
            MilestoneState::Reached80 => format!("{name} passed 70% on {d70} and 80% on {d80}."),
        }
    }

    /// Renders the comparison as plain text, one statement per line.
    pub fn narrative(&self) -> String {
        let own = &self.own;
        let n = self.field_size;
        let subject = &self.subject;
        let mut lines = Vec::new();

        lines.push(format!(
            "As of {}, you are one of {} ({}%) in {subject} who {}.",
            self.date,
            show(self.status_count),
            show(self.status_pct),
            self.cohort.vac_status.phrase()
        ));
        lines.push(format!(
            "{subject} administered {} doses on {}, {}% of its population. Ranked #{} of {n}. {}",
            show(self.administered),
            self.date,
            show(own.vac_rate),
            show(own.vac_rate_rank),
            self.versus(
                self.leaders.vac_rate.as_ref(),
                "Fastest anywhere, keep it up!",
                |l| l.vac_rate,
                "is moving fastest",
            )
        ));
        lines.push(format!(
            "{}% of {subject} have had a first dose. Ranked #{} of {n}. {}",
            show(own.dose1_pct),
            show(own.dose1_pct_rank),
            self.versus(
                self.leaders.dose1_pct.as_ref(),
                "Nobody has more first doses!",
                |l| l.dose1_pct,
                "leads first doses",
            )
        ));
        lines.push(format!(
            "{}% of {subject} are fully vaccinated. Ranked #{} of {n}. {}",
            show(own.dose2_pct),
            show(own.dose2_pct_rank),
            self.versus(
                self.leaders.dose2_pct.as_ref(),
                "Closest to the finish line!",
                |l| l.dose2_pct,
                "leads second doses",
            )
        ));

        let d70 = show_date(own.resolution(Dose::Second, Milestone::P70));
        let d80 = show_date(own.resolution(Dose::Second, Milestone::P80));
        let rank70 = show(own.rank(RankMetric::Milestone(Dose::Second, Milestone::P70)));
        let reach = match self.state {
            MilestoneState::Below70 => format!(
                "At the 7-day average pace {subject} reaches 70% fully vaccinated on {d70} \
                 and 80% on {d80}."
            ),
            MilestoneState::Reached70 => {
                format!("{subject} passed 70% fully vaccinated on {d70} and reaches 80% on {d80}.")
            }
            MilestoneState::Reached80 => {
                format!("{subject} passed 70% fully vaccinated on {d70} and 80% on {d80}.")
            }
        };
        lines.push(format!(
            "{reach} Ranked #{rank70} of {n} to 70%. {}",
            self.milestone_leader_line()
        ));
        let intervals = [
            (Milestone::P70, &self.dose2_70),
            (Milestone::P80, &self.dose2_80),
        ];
        for (milestone, interval) in intervals {
            if let Some(alt) = interval.follow_prior_dose.filter(|_| !interval.agrees()) {
                lines.push(format!(
                    "Following the first-dose pace instead, {subject} reaches {milestone} \
                     fully vaccinated on {alt}."
                ));
            }
        }

        if let Some(local) = &self.local {
            lines.push(format!(
                "Among the {} age groups in {}: #{} on pace, #{} on first doses, \
                 #{} on second doses.",
                local.field_size,
                self.cohort.region,
                show(local.vac_rate_rank),
                show(local.dose1_pct_rank),
                show(local.dose2_pct_rank)
            ));
        }

        lines
            .into_iter()
            .map(|l| l.trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
