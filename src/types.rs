//! Row types flowing through the derivation pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single normalized observation as produced by the loader: one report
/// date for one region and one raw age band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub region: String,
    pub age_lower: u16,
    /// Inclusive; `999` marks an open-ended band.
    pub age_upper: u16,
    pub dose1_count: u64,
    pub dose2_count: u64,
    pub population: Option<u64>,
}

/// How an age group relates to the population partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeGroupKind {
    /// Partitions the population together with the other bands.
    Band,
    /// Open-ended aggregate such as `16_or_above`.
    Cohort,
    /// The `0-999` whole-population row.
    CatchAll,
    /// Built by the normalizer (`12_or_above`, `total_population`).
    Synthetic,
}

/// An observation after age-band normalization, keyed by (date, region, age_group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupObservation {
    pub date: NaiveDate,
    pub region: String,
    pub age_group: String,
    pub kind: AgeGroupKind,
    pub dose1_count: u64,
    pub dose2_count: u64,
    pub population: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dose {
    First,
    Second,
}

impl Dose {
    pub const ALL: [Dose; 2] = [Dose::First, Dose::Second];

    pub fn label(self) -> &'static str {
        match self {
            Dose::First => "dose1",
            Dose::Second => "dose2",
        }
    }
}

/// Coverage thresholds used as projection and ranking targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Milestone {
    #[serde(rename = "70")]
    P70,
    #[serde(rename = "80")]
    P80,
    #[serde(rename = "90")]
    P90,
    #[serde(rename = "95")]
    P95,
}

impl Milestone {
    pub const ALL: [Milestone; 4] = [
        Milestone::P70,
        Milestone::P80,
        Milestone::P90,
        Milestone::P95,
    ];

    pub fn percent(self) -> f64 {
        match self {
            Milestone::P70 => 70.0,
            Milestone::P80 => 80.0,
            Milestone::P90 => 90.0,
            Milestone::P95 => 95.0,
        }
    }
}

impl std::fmt::Display for Milestone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// An observation extended with every derived metric. Fields that cannot be
/// computed (first row, short history, missing population) are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRow {
    pub date: NaiveDate,
    pub region: String,
    pub age_group: String,
    pub kind: AgeGroupKind,
    pub dose1_count: u64,
    pub dose2_count: u64,
    pub population: Option<u64>,

    pub delta_dose1: Option<i64>,
    pub delta_dose2: Option<i64>,
    pub delta_dose12: Option<i64>,
    pub delta_dose1_mod: Option<u64>,
    pub delta_dose2_mod: Option<u64>,
    pub ma7_dose1: Option<f64>,
    pub ma7_dose2: Option<f64>,

    pub dose1_pct: Option<f64>,
    pub dose2_pct: Option<f64>,
    pub unvac: Option<i64>,
    pub unvac_pct: Option<f64>,

    pub vac_rate: Option<f64>,
    pub ma7_vac_rate: Option<f64>,
    pub vac_rate_dose1: Option<f64>,
    pub vac_rate_dose2: Option<f64>,
    pub ma7_dose1_vac_rate: Option<f64>,
    pub ma7_dose2_vac_rate: Option<f64>,

    pub eta_dose1_70: Option<f64>,
    pub eta_dose1_80: Option<f64>,
    pub eta_dose1_90: Option<f64>,
    pub eta_dose1_95: Option<f64>,
    pub eta_dose2_70: Option<f64>,
    pub eta_dose2_80: Option<f64>,
    pub eta_dose2_90: Option<f64>,
    pub eta_dose2_95: Option<f64>,
}

impl DerivedRow {
    /// A row carrying only the observed values.
    pub fn from_observation(obs: &GroupObservation) -> Self {
        DerivedRow {
            date: obs.date,
            region: obs.region.clone(),
            age_group: obs.age_group.clone(),
            kind: obs.kind,
            dose1_count: obs.dose1_count,
            dose2_count: obs.dose2_count,
            population: obs.population,
            delta_dose1: None,
            delta_dose2: None,
            delta_dose12: None,
            delta_dose1_mod: None,
            delta_dose2_mod: None,
            ma7_dose1: None,
            ma7_dose2: None,
            dose1_pct: None,
            dose2_pct: None,
            unvac: None,
            unvac_pct: None,
            vac_rate: None,
            ma7_vac_rate: None,
            vac_rate_dose1: None,
            vac_rate_dose2: None,
            ma7_dose1_vac_rate: None,
            ma7_dose2_vac_rate: None,
            eta_dose1_70: None,
            eta_dose1_80: None,
            eta_dose1_90: None,
            eta_dose1_95: None,
            eta_dose2_70: None,
            eta_dose2_80: None,
            eta_dose2_90: None,
            eta_dose2_95: None,
        }
    }

    pub fn count(&self, dose: Dose) -> u64 {
        match dose {
            Dose::First => self.dose1_count,
            Dose::Second => self.dose2_count,
        }
    }

    pub fn pct(&self, dose: Dose) -> Option<f64> {
        match dose {
            Dose::First => self.dose1_pct,
            Dose::Second => self.dose2_pct,
        }
    }

    pub fn delta_mod(&self, dose: Dose) -> Option<u64> {
        match dose {
            Dose::First => self.delta_dose1_mod,
            Dose::Second => self.delta_dose2_mod,
        }
    }

    pub fn ma7(&self, dose: Dose) -> Option<f64> {
        match dose {
            Dose::First => self.ma7_dose1,
            Dose::Second => self.ma7_dose2,
        }
    }

    pub fn eta(&self, dose: Dose, milestone: Milestone) -> Option<f64> {
        match (dose, milestone) {
            (Dose::First, Milestone::P70) => self.eta_dose1_70,
            (Dose::First, Milestone::P80) => self.eta_dose1_80,
            (Dose::First, Milestone::P90) => self.eta_dose1_90,
            (Dose::First, Milestone::P95) => self.eta_dose1_95,
            (Dose::Second, Milestone::P70) => self.eta_dose2_70,
            (Dose::Second, Milestone::P80) => self.eta_dose2_80,
            (Dose::Second, Milestone::P90) => self.eta_dose2_90,
            (Dose::Second, Milestone::P95) => self.eta_dose2_95,
        }
    }

    pub(crate) fn eta_mut(&mut self, dose: Dose, milestone: Milestone) -> &mut Option<f64> {
        match (dose, milestone) {
            (Dose::First, Milestone::P70) => &mut self.eta_dose1_70,
            (Dose::First, Milestone::P80) => &mut self.eta_dose1_80,
            (Dose::First, Milestone::P90) => &mut self.eta_dose1_90,
            (Dose::First, Milestone::P95) => &mut self.eta_dose1_95,
            (Dose::Second, Milestone::P70) => &mut self.eta_dose2_70,
            (Dose::Second, Milestone::P80) => &mut self.eta_dose2_80,
            (Dose::Second, Milestone::P90) => &mut self.eta_dose2_90,
            (Dose::Second, Milestone::P95) => &mut self.eta_dose2_95,
        }
    }
}
