//! Milestone date resolution.
//!
//! A milestone already passed resolves to the first historical date on which
//! coverage exceeded it; only a milestone not yet reached is projected
//! forward from the moving-average ETA. Projecting an already-passed
//! milestone would report it as a future date.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::types::{DerivedRow, Dose, Milestone};
use crate::util::round_to;

/// When a group reached, or is expected to reach, a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "date", rename_all = "snake_case")]
pub enum MilestoneDate {
    /// Observed: the first date coverage exceeded the milestone.
    Reached(NaiveDate),
    /// Snapshot date plus the ETA at the current 7-day pace.
    Projected(NaiveDate),
    /// No usable pace (idle window, missing population or short history).
    NoProjection,
}

impl MilestoneDate {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            MilestoneDate::Reached(d) | MilestoneDate::Projected(d) => Some(*d),
            MilestoneDate::NoProjection => None,
        }
    }

    /// True when the resolved date is on or before `on`.
    pub fn is_reached_by(&self, on: NaiveDate) -> bool {
        self.date().is_some_and(|d| d <= on)
    }
}

/// First date in `series[..=upto]` whose coverage for `dose` satisfies `pred`.
fn first_date_where(
    series: &[DerivedRow],
    upto: usize,
    dose: Dose,
    pred: impl Fn(f64) -> bool,
) -> Option<NaiveDate> {
    series[..=upto.min(series.len().saturating_sub(1))]
        .iter()
        .find(|r| r.pct(dose).is_some_and(&pred))
        .map(|r| r.date)
}

/// True when no dose was administered on any day of the trailing window
/// ending at `series[index]`. The moving average of such a window holds the
/// floor value, not a real pace.
fn idle_window(series: &[DerivedRow], index: usize, dose: Dose, window: usize) -> bool {
    let start = (index + 1).saturating_sub(window.max(1));
    series[start..=index]
        .iter()
        .all(|r| r.delta_mod(dose).is_none_or(|d| d == 0))
}

/// Resolves the milestone date of `series[index]`.
///
/// `series` is one group's derived rows sorted by date.
pub fn resolve_milestone(
    series: &[DerivedRow],
    index: usize,
    dose: Dose,
    milestone: Milestone,
    cfg: &EngineConfig,
) -> MilestoneDate {
    let Some(row) = series.get(index) else {
        return MilestoneDate::NoProjection;
    };
    let target = milestone.percent();

    if row.pct(dose).is_some_and(|p| p > target) {
        return first_date_where(series, index, dose, |p| p > target)
            .map(MilestoneDate::Reached)
            .unwrap_or(MilestoneDate::NoProjection);
    }

    let stalled = row.ma7(dose).is_none() || idle_window(series, index, dose, cfg.ma_window);
    let Some(eta) = row.eta(dose, milestone).filter(|_| !stalled) else {
        return MilestoneDate::NoProjection;
    };
    // Whole days at the current pace. Coverage is rounded, so a row can sit
    // at the target with a slightly negative ETA.
    let days = round_to(eta, 6).floor().max(0.0);
    Duration::try_days(days as i64)
        .and_then(|d| row.date.checked_add_signed(d))
        .map(MilestoneDate::Projected)
        .unwrap_or(MilestoneDate::NoProjection)
}

/// Dose-2 estimate assuming dose 2 covers the span from its current coverage
/// to the milestone in as many days as dose 1 took for the same span.
///
/// Dose 1 must be seen crossing the current dose-2 coverage: a series whose
/// first row is already above it has no estimate.
pub fn follow_prior_dose(
    series: &[DerivedRow],
    index: usize,
    milestone: Milestone,
    cfg: &EngineConfig,
) -> Option<NaiveDate> {
    let row = series.get(index)?;
    let current = row.dose2_pct?;
    if current > milestone.percent() {
        return None;
    }
    let crossed = series[..=index]
        .iter()
        .position(|r| r.dose1_pct.is_some_and(|p| p > current))?;
    if crossed == 0 || series[crossed - 1].dose1_pct.is_none() {
        return None;
    }
    let start = series[crossed].date;
    let end = resolve_milestone(series, index, Dose::First, milestone, cfg).date()?;
    let span = (end - start).max(Duration::zero());
    row.date.checked_add_signed(span)
}

/// The two dose-2 estimates side by side. They are kept apart rather than
/// merged; their spread is the forecast uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectionInterval {
    pub moving_average: MilestoneDate,
    pub follow_prior_dose: Option<NaiveDate>,
}

impl ProjectionInterval {
    fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        self.moving_average.date().into_iter().chain(self.follow_prior_dose)
    }

    pub fn earliest(&self) -> Option<NaiveDate> {
        self.dates().min()
    }

    pub fn latest(&self) -> Option<NaiveDate> {
        self.dates().max()
    }

    /// True when only one estimate exists or both give the same date.
    pub fn agrees(&self) -> bool {
        self.earliest() == self.latest()
    }
}

/// Both dose-2 estimates for `series[index]`. A milestone already reached
/// has a single, observed answer.
pub fn project_dose2(
    series: &[DerivedRow],
    index: usize,
    milestone: Milestone,
    cfg: &EngineConfig,
) -> ProjectionInterval {
    let moving_average = resolve_milestone(series, index, Dose::Second, milestone, cfg);
    let follow_prior_dose = match moving_average {
        MilestoneDate::Reached(_) => None,
        _ => follow_prior_dose(series, index, milestone, cfg),
    };
    ProjectionInterval {
        moving_average,
        follow_prior_dose,
    }
}
