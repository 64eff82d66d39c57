use chrono::NaiveDate;
use vac_race::age_band::{SIXTEEN_PLUS, TWELVE_PLUS};
use vac_race::compare::{Cohort, VacStatus, compare_age_group, compare_region};
use vac_race::config::{AgeBanding, Settings};
use vac_race::loader::load_source;
use vac_race::pipeline::build_tables;
use vac_race::projection::MilestoneDate;
use vac_race::ranker::{MilestoneState, RankMetric, best_in_class, rank_snapshot};
use vac_race::types::{AgeGroupKind, DerivedRow, Dose, Milestone};

const FIXTURE: &[u8] = include_bytes!("fixtures/air_residence_sample.csv");

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 9, day).unwrap()
}

fn adults(table: &[DerivedRow]) -> Vec<DerivedRow> {
    table.iter().filter(|r| r.age_group == SIXTEEN_PLUS).cloned().collect()
}

#[test]
fn test_load_fixture() {
    let (rows, report) =
        load_source(FIXTURE, &Settings::default()).expect("Failed to load fixture");

    assert_eq!(report.total_rows, 152);
    assert_eq!(report.kept_rows, 150);
    assert_eq!(report.unvalidated_rows, 1);
    assert_eq!(report.parse_errors, 1);
    assert_eq!(rows.len(), 150);
    assert!(rows.iter().all(|r| r.date <= date(10)));
}

#[test]
fn test_full_pipeline() {
    let settings = Settings::default();
    let (rows, _) = load_source(FIXTURE, &settings).unwrap();
    let tables = build_tables(&rows, &settings).unwrap();

    assert_eq!(tables.latest_date(), Some(date(10)));

    // 16_or_above and 12_or_above for three regions over ten days.
    assert_eq!(tables.region.len(), 60);
    assert!(
        tables
            .region
            .iter()
            .any(|r| r.age_group == TWELVE_PLUS && r.kind == AgeGroupKind::Synthetic)
    );

    // The open 65+ row sits above every bounded band, so it is a band too.
    assert!(tables.region_age_group.iter().any(|r| r.age_group == "65_or_above"));
    assert_eq!(tables.region_age_group.len(), 120);

    // VIC 40-64 had no population for two days; it is back-filled.
    let vic_40 = tables
        .region_age_group
        .iter()
        .find(|r| r.region == "VIC" && r.age_group == "40-64" && r.date == date(1))
        .unwrap();
    assert_eq!(vic_40.population, Some(2_000_000));

    // National bands sum NSW and VIC only.
    let national = tables
        .age_group
        .iter()
        .find(|r| r.age_group == "16-39" && r.date == date(1))
        .unwrap();
    assert_eq!(national.region, "AUS");
    assert_eq!(national.dose1_count, 3_600_000);
    assert_eq!(national.population, Some(5_100_000));

    let nsw = tables
        .region
        .iter()
        .find(|r| r.region == "NSW" && r.age_group == SIXTEEN_PLUS && r.date == date(10))
        .unwrap();
    assert_eq!(nsw.dose1_count, 5_617_000);
    assert_eq!(nsw.dose1_pct, Some(83.84));
    assert_eq!(nsw.dose2_pct, Some(70.79));
    assert_eq!(nsw.vac_rate, Some(0.6));
    assert_eq!(nsw.ma7_dose2, Some(27_000.0));
}

#[test]
fn test_rank_latest_snapshot() {
    let settings = Settings::default();
    let (rows, _) = load_source(FIXTURE, &settings).unwrap();
    let tables = build_tables(&rows, &settings).unwrap();
    let ranked = rank_snapshot(&adults(&tables.region), None, &settings.engine).unwrap();

    let order: Vec<&str> = ranked.iter().map(|r| r.region.as_str()).collect();
    assert_eq!(order, vec!["VIC", "AUS", "NSW"]);
    assert_eq!(ranked[0].vac_rate, Some(1.03));

    assert_eq!(best_in_class(&ranked, RankMetric::Dose1Pct).unwrap().region, "NSW");

    let to_70 = RankMetric::Milestone(Dose::Second, Milestone::P70);
    let first_to_70 = best_in_class(&ranked, to_70).unwrap();
    assert_eq!(first_to_70.region, "NSW");

    let nsw = ranked.iter().find(|r| r.region == "NSW").unwrap();
    // Crossed 70% on the 9th: the observed date, not a projection.
    assert_eq!(nsw.resolution(Dose::Second, Milestone::P70), MilestoneDate::Reached(date(9)));
    assert_eq!(
        nsw.resolution(Dose::Second, Milestone::P80),
        MilestoneDate::Projected(date(10) + chrono::Duration::days(22))
    );
    assert_eq!(nsw.state(), MilestoneState::Reached70);

    let vic = ranked.iter().find(|r| r.region == "VIC").unwrap();
    assert_eq!(vic.resolution(Dose::Second, Milestone::P70), MilestoneDate::Projected(date(21)));
    assert_eq!(vic.rank(to_70), Some(3));
}

#[test]
fn test_rank_earlier_snapshot() {
    let settings = Settings::default();
    let (rows, _) = load_source(FIXTURE, &settings).unwrap();
    let tables = build_tables(&rows, &settings).unwrap();
    let ranked = rank_snapshot(&adults(&tables.region), Some(date(5)), &settings.engine).unwrap();

    assert!(ranked.iter().all(|r| r.date == date(5)));
    // Fewer than seven daily changes by the 5th: nothing can be projected.
    let to_70 = RankMetric::Milestone(Dose::Second, Milestone::P70);
    for row in &ranked {
        assert_eq!(row.resolution(Dose::Second, Milestone::P70), MilestoneDate::NoProjection);
        assert_eq!(row.rank(to_70), None);
    }
}

#[test]
fn test_compare_cohort() {
    let settings = Settings::default();
    let (rows, _) = load_source(FIXTURE, &settings).unwrap();
    let tables = build_tables(&rows, &settings).unwrap();
    let cohort = Cohort {
        region: "VIC".to_string(),
        age_group: "16-39".to_string(),
        vac_status: VacStatus::OneDose,
    };

    let by_region =
        compare_region(&cohort, &tables.region, SIXTEEN_PLUS, &settings.engine).unwrap();
    assert_eq!(by_region.field_size, 3);
    assert_eq!(by_region.own.vac_rate_rank, Some(1));
    let text = by_region.narrative();
    assert!(text.contains("Fastest anywhere"));
    assert!(text.contains("NSW leads first doses at 83.84%."));

    let by_age_group =
        compare_age_group(&cohort, &tables.region_age_group, &settings.engine).unwrap();
    assert_eq!(by_age_group.subject, "16-39 in VIC");
    assert_eq!(by_age_group.local.as_ref().unwrap().field_size, 4);
    assert!(by_age_group.narrative().contains("Among the 4 age groups in VIC"));
}

#[test]
fn test_decade_banding() {
    let settings = Settings {
        banding: AgeBanding::Decade,
        ..Settings::default()
    };
    let (rows, _) = load_source(FIXTURE, &settings).unwrap();
    let tables = build_tables(&rows, &settings).unwrap();

    // The fixture's bands are not 5-year bands, so they keep their labels.
    assert!(tables.region_age_group.iter().any(|r| r.age_group == "16-39"));
    assert_eq!(tables.region.len(), 60);
}

#[test]
fn test_pipeline_is_deterministic() {
    let settings = Settings::default();
    let (rows, _) = load_source(FIXTURE, &settings).unwrap();
    let first = build_tables(&rows, &settings).unwrap();
    let second = build_tables(&rows, &settings).unwrap();
    assert_eq!(first, second);
}
